pub mod command;
pub mod telemetry;

pub use command::{AuxCommand, CommandAlphabet, CommandCode, DriveFrame, FrameStyle};
pub use telemetry::{parse_line, PositionFix, Telemetry, TelemetryDecoder};

/// Every frame on the wire, in both directions, ends with this byte.
pub const LINE_DELIMITER: char = '\n';
