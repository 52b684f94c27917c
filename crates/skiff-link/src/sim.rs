use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use skiff_nav::geo::{destination, GeoPoint};
use skiff_nav::sim::{MotionConfig, MotionSim};
use skiff_nav::AxisTarget;
use skiff_proto::command::{AuxCommand, CommandAlphabet, CommandCode, DriveFrame};

use crate::error::LinkError;
use crate::transport::{LineStream, Transport, LINE_BUFFER};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub start: GeoPoint,
    pub heading: f64,
    pub motion: MotionConfig,
    pub gps_period_ms: u64,
    /// Random horizontal error added to each reported fix.
    pub jitter_m: f64,
    /// Report fixes as E7 integers instead of decimal degrees.
    pub e7: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start: GeoPoint::new(36.137, -94.129),
            heading: 0.0,
            motion: MotionConfig::default(),
            gps_period_ms: 500,
            jitter_m: 0.0,
            e7: false,
        }
    }
}

struct Boat {
    motion: MotionSim,
    speed_pct: u8,
}

/// In-process boat. Applies received drive frames to a motion model and
/// reports GPS over the line stream, the way the radio firmware does.
pub struct SimTransport {
    cfg: SimConfig,
    alphabet: CommandAlphabet,
    boat: Arc<Mutex<Boat>>,
    tx: Mutex<Option<mpsc::Sender<String>>>,
    gps_task: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimTransport {
    pub fn new(cfg: SimConfig, alphabet: CommandAlphabet) -> Self {
        let motion = MotionSim::new(cfg.motion, cfg.start, cfg.heading);
        Self {
            cfg,
            alphabet,
            boat: Arc::new(Mutex::new(Boat { motion, speed_pct: 100 })),
            tx: Mutex::new(None),
            gps_task: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Current simulated position and heading.
    pub fn position(&self) -> (GeoPoint, f64) {
        lock(&self.boat).motion.position()
    }

    fn reply(&self, line: String) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            tx.try_send(line).ok();
        }
    }

    fn handle_frame(&self, line: &str) {
        let mut boat = lock(&self.boat);
        let scale = boat.speed_pct as f64 / 100.0;
        if let Some(frame) = DriveFrame::decode(line, &self.alphabet) {
            let axis = match frame {
                DriveFrame::Code(code) => code_axis(code),
                DriveFrame::Ctrl { throttle, steer } => AxisTarget {
                    steering: steer as f64 / 100.0,
                    throttle: throttle as f64 / 100.0,
                },
            };
            boat.motion.set_axis(AxisTarget { steering: axis.steering, throttle: axis.throttle * scale });
            drop(boat);
            self.reply(format!("ACK,{}", line));
            return;
        }
        let reply = match AuxCommand::parse(line) {
            Some(AuxCommand::Ping) => "PONG".to_string(),
            Some(AuxCommand::Status) => {
                let (p, h) = boat.motion.position();
                format!("STATUS,SIM lat={:.6} lon={:.6} hdg={:.0} speed={}%", p.lat, p.lon, h, boat.speed_pct)
            }
            Some(AuxCommand::SpeedMax(n)) => {
                boat.speed_pct = n.min(100);
                format!("ACK,{}", line)
            }
            Some(AuxCommand::Return) | Some(AuxCommand::Calibrate) => format!("ACK,{}", line),
            None => "ACK,UNKNOWN".to_string(),
        };
        drop(boat);
        self.reply(reply);
    }
}

fn code_axis(code: CommandCode) -> AxisTarget {
    match code {
        CommandCode::Neutral => AxisTarget::ZERO,
        CommandCode::Forward => AxisTarget { steering: 0.0, throttle: 1.0 },
        CommandCode::Reverse => AxisTarget { steering: 0.0, throttle: -1.0 },
        CommandCode::Left => AxisTarget { steering: -1.0, throttle: 0.0 },
        CommandCode::Right => AxisTarget { steering: 1.0, throttle: 0.0 },
    }
}

fn gps_line(cfg: &SimConfig, p: GeoPoint, heading: f64) -> String {
    let p = if cfg.jitter_m > 0.0 {
        let mut rng = rand::thread_rng();
        destination(&p, rng.gen_range(0.0..360.0), rng.gen_range(0.0..cfg.jitter_m))
    } else {
        p
    };
    if cfg.e7 {
        format!("GPS,{},{}", (p.lat * 1e7).round() as i64, (p.lon * 1e7).round() as i64)
    } else {
        format!("GPS:{:.7},{:.7},{:.1}", p.lat, p.lon, heading)
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn kind(&self) -> &'static str {
        "sim"
    }

    async fn connect(&self, address: &str) -> Result<LineStream, LinkError> {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        tx.try_send("SYSTEM,CONNECTED".to_string()).ok();
        *lock(&self.tx) = Some(tx.clone());

        let cfg = self.cfg.clone();
        let boat = self.boat.clone();
        let period = Duration::from_millis(cfg.gps_period_ms.max(10));
        let task = tokio::spawn(async move {
            let mut iv = tokio::time::interval(period);
            iv.tick().await;
            loop {
                iv.tick().await;
                let (p, h) = lock(&boat).motion.advance(period);
                if tx.send(gps_line(&cfg, p, h)).await.is_err() {
                    break;
                }
            }
        });
        if let Some(old) = lock(&self.gps_task).replace(task) {
            old.abort();
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!("sim: boat attached as {}", address);
        Ok(rx)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let text = String::from_utf8_lossy(bytes);
        for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
            self.handle_frame(line);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.gps_task).take() {
            task.abort();
        }
        lock(&self.tx).take();
        lock(&self.boat).motion.set_axis(AxisTarget::ZERO);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_proto::telemetry::{parse_line, Telemetry};

    fn sim() -> SimTransport {
        let motion = MotionConfig { max_speed_mps: 20.0, ..MotionConfig::default() };
        SimTransport::new(SimConfig { gps_period_ms: 20, motion, ..SimConfig::default() }, CommandAlphabet::default())
    }

    #[tokio::test]
    async fn answers_ping_and_acks_drive_codes() {
        let t = sim();
        let mut rx = t.connect("sim").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "SYSTEM,CONNECTED");

        t.write(b"PING\n").await.unwrap();
        t.write(b"2\n").await.unwrap();
        let mut seen = Vec::new();
        while seen.len() < 2 {
            let line = rx.recv().await.unwrap();
            if !line.starts_with("GPS") {
                seen.push(line);
            }
        }
        assert_eq!(seen, vec!["PONG".to_string(), "ACK,2".to_string()]);
        t.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn forward_command_moves_the_boat_north() {
        let t = sim();
        let mut rx = t.connect("sim").await.unwrap();
        t.write(b"2\n").await.unwrap();
        let mut fixes = Vec::new();
        while fixes.len() < 3 {
            if let Some(Telemetry::Position(p)) = parse_line(&rx.recv().await.unwrap()) {
                fixes.push(p);
            }
        }
        assert!(fixes[2].lat > fixes[0].lat);
        assert_eq!(fixes[2].heading, Some(0.0));
        t.disconnect().await.unwrap();
        assert!(matches!(t.write(b"0\n").await, Err(LinkError::NotConnected)));
    }

    #[test]
    fn e7_reporting() {
        let cfg = SimConfig { e7: true, ..SimConfig::default() };
        assert_eq!(gps_line(&cfg, GeoPoint::new(36.137, -94.129), 0.0), "GPS,361370000,-941290000");
    }
}
