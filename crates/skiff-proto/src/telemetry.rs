use serde::{Deserialize, Serialize};

/// Coordinates above this magnitude are fixed-point, scaled by [`E7_SCALE`].
pub const E7_THRESHOLD: f64 = 1000.0;
pub const E7_SCALE: f64 = 1e7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub lat: f64,
    pub lon: f64,
    /// Compass degrees in [0, 360) when the vehicle reports one.
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Telemetry {
    Position(PositionFix),
    Ack(String),
    Pong,
    Heartbeat,
    Status(String),
    System(String),
}

impl Telemetry {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Telemetry::Heartbeat)
    }
}

/// Decode one inbound line. Blank and malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Telemetry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let line = match line.strip_prefix("+RCV=") {
        Some(wrapped) => unwrap_lora(wrapped)?.trim(),
        None => line,
    };

    let Some(sep) = line.find(|c: char| c == ',' || c == ':') else {
        return match line.to_ascii_uppercase().as_str() {
            "PONG" => Some(Telemetry::Pong),
            "PING" | "HB" | "HEARTBEAT" => Some(Telemetry::Heartbeat),
            _ => None,
        };
    };
    let (head, rest) = (&line[..sep], line[sep + 1..].trim());

    match head.trim().to_ascii_uppercase().as_str() {
        "GPS" => parse_position(rest).map(Telemetry::Position),
        "ACK" if !rest.is_empty() => Some(Telemetry::Ack(rest.to_string())),
        "STATUS" if !rest.is_empty() => Some(Telemetry::Status(rest.to_string())),
        "SYSTEM" if !rest.is_empty() => Some(Telemetry::System(rest.to_string())),
        "HB" | "HEARTBEAT" => Some(Telemetry::Heartbeat),
        _ => None,
    }
}

// +RCV=<addr>,<len>,<payload>,<rssi>,<snr>
fn unwrap_lora(s: &str) -> Option<&str> {
    let mut parts = s.splitn(3, ',');
    let _addr = parts.next()?;
    let len: usize = parts.next()?.trim().parse().ok()?;
    let rest = parts.next()?;
    rest.get(..len)
}

fn parse_position(rest: &str) -> Option<PositionFix> {
    let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
    if fields.len() != 2 && fields.len() != 3 {
        return None;
    }
    let mut lat: f64 = fields[0].parse().ok()?;
    let mut lon: f64 = fields[1].parse().ok()?;
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    if lat.abs() > E7_THRESHOLD || lon.abs() > E7_THRESHOLD {
        lat /= E7_SCALE;
        lon /= E7_SCALE;
    }
    if lat.abs() > 90.0 || lon.abs() > 180.0 {
        return None;
    }
    let heading = match fields.get(2) {
        Some(h) => {
            let h: f64 = h.parse().ok()?;
            if !h.is_finite() {
                return None;
            }
            Some(h.rem_euclid(360.0))
        }
        None => None,
    };
    Some(PositionFix { lat, lon, heading })
}

/// Stateful front end to [`parse_line`] that keeps diagnostic counters.
#[derive(Debug, Default, Clone)]
pub struct TelemetryDecoder {
    pub decoded: u64,
    pub malformed: u64,
    pub heartbeats: u64,
}

impl TelemetryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, line: &str) -> Option<Telemetry> {
        if line.trim().is_empty() {
            return None;
        }
        match parse_line(line) {
            Some(t) => {
                self.decoded += 1;
                if t.is_heartbeat() {
                    self.heartbeats += 1;
                }
                Some(t)
            }
            None => {
                self.malformed += 1;
                None
            }
        }
    }
}
