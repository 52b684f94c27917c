pub mod command_loop;
pub mod doctor;
pub mod session;
pub mod sink;
pub mod timer;

pub use command_loop::{quantize, select_command, AxisSample, CommandLoop, TickOutcome};
pub use session::{Session, SessionConfig, SessionStatus};
pub use sink::{LogSink, MapSink};

use serde::Deserialize;
use skiff_proto::command::{CommandAlphabet, FrameStyle};
use std::time::Duration;

/// Shortest allowed command tick.
pub const MIN_TICK_MS: u64 = 20;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Command loop rate.
    pub hz: u32,

    /// Axis magnitude below which input counts as centred.
    pub deadzone: f64,

    /// Minimum change in a quantized axis before the command is re-evaluated.
    pub hysteresis: f64,

    /// Discrete tokens or CTRL frames; fixed for the whole session.
    pub frame: FrameStyle,

    pub alphabet: CommandAlphabet,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            hz: 20,
            deadzone: 0.25,
            hysteresis: 0.05,
            frame: FrameStyle::Discrete,
            alphabet: CommandAlphabet::default(),
        }
    }
}

impl ControlConfig {
    pub fn tick_period(&self) -> Duration {
        let ms = (1000.0 / self.hz.max(1) as f64).round() as u64;
        Duration::from_millis(ms.max(MIN_TICK_MS))
    }
}
