use anyhow::{ensure, Context, Result};

use crate::ControlConfig;

pub fn check_control(cfg: &ControlConfig) -> Result<()> {
    ensure!((1..=50).contains(&cfg.hz), "control.hz must be 1..=50, got {}", cfg.hz);
    ensure!(cfg.deadzone > 0.0 && cfg.deadzone < 1.0, "control.deadzone must be in (0, 1)");
    ensure!(
        cfg.hysteresis >= 0.0 && cfg.hysteresis < cfg.deadzone,
        "control.hysteresis must be >= 0 and below the deadzone"
    );
    cfg.alphabet.validate().context("control.alphabet")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_proto::command::CommandAlphabet;

    #[test]
    fn defaults_pass() {
        check_control(&ControlConfig::default()).unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let mut c = ControlConfig { hz: 0, ..ControlConfig::default() };
        assert!(check_control(&c).is_err());
        c.hz = 20;
        c.hysteresis = 0.5;
        assert!(check_control(&c).is_err());
        c.hysteresis = 0.05;
        c.alphabet = CommandAlphabet { left: "2".into(), ..CommandAlphabet::default() };
        assert!(check_control(&c).is_err());
    }
}
