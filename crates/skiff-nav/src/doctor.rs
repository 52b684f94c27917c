use anyhow::Result;

use crate::fence::{FenceConfig, Zone};
use crate::navigator::NavConfig;

pub fn check_nav(cfg: &NavConfig) -> Result<()> {
    anyhow::ensure!(cfg.breadcrumb_min_m >= 1.0, "nav.breadcrumb_min_m too small");
    anyhow::ensure!(cfg.arrival_m > 0.5 && cfg.arrival_m < 50.0, "nav.arrival_m out of range");
    anyhow::ensure!(cfg.steer_saturation_deg > 0.0 && cfg.steer_saturation_deg <= 180.0, "nav.steer_saturation_deg should be 0..180");
    anyhow::ensure!(cfg.cruise_throttle > 0.0 && cfg.cruise_throttle <= 1.0, "nav.cruise_throttle should be 0..1");
    anyhow::ensure!(cfg.control_period_ms >= 50 && cfg.control_period_ms <= 2000, "nav.control_period_ms should be 50..2000");
    anyhow::ensure!(cfg.lookahead_s >= 0.0 && cfg.lookahead_s <= 30.0, "nav.lookahead_s should be 0..30");
    Ok(())
}

pub fn check_fence(cfg: &FenceConfig) -> Result<()> {
    anyhow::ensure!(cfg.buffer_deg > 0.0 && cfg.buffer_deg < 0.01, "fence.buffer_deg out of range");
    for (i, zone) in cfg.zones.iter().enumerate() {
        match zone {
            Zone::Box { south, north, west, east } => {
                anyhow::ensure!(south < north, "fence.zones[{}]: south must be < north", i);
                anyhow::ensure!(west < east, "fence.zones[{}]: west must be < east", i);
                anyhow::ensure!(south.abs() <= 90.0 && north.abs() <= 90.0, "fence.zones[{}]: latitude invalid", i);
                anyhow::ensure!(west.abs() <= 180.0 && east.abs() <= 180.0, "fence.zones[{}]: longitude invalid", i);
            }
            Zone::Polygon { points } => {
                anyhow::ensure!(points.len() >= 3, "fence.zones[{}]: polygon must have >= 3 points", i);
                anyhow::ensure!(points.iter().all(|p| p.is_valid()), "fence.zones[{}]: polygon has invalid coordinates", i);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;

    #[test]
    fn defaults_pass() {
        check_nav(&NavConfig::default()).unwrap();
        check_fence(&FenceConfig::default()).unwrap();
    }

    #[test]
    fn bad_zones_fail() {
        let cfg = FenceConfig {
            zones: vec![Zone::Box { south: 2.0, north: 1.0, west: 0.0, east: 1.0 }],
            ..FenceConfig::default()
        };
        assert!(check_fence(&cfg).is_err());
        let cfg = FenceConfig {
            zones: vec![Zone::Polygon { points: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)] }],
            ..FenceConfig::default()
        };
        assert!(check_fence(&cfg).is_err());
    }
}
