use std::time::{Duration, Instant};
use tracing::{info, warn};

use skiff_proto::command::AuxCommand;
use skiff_proto::telemetry::{parse_line, Telemetry};

use crate::stream::StreamTransport;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub pong_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<String>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/rfcomm0".into(),
        "/dev/rfcomm1".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/serial0".into(),
    ]
}

/// Open each candidate in turn, send `PING` and pick the first that answers `PONG`.
pub async fn autodetect_link(candidate_devs: Vec<String>, baud: u32, probe_timeout: Duration) -> AutodetectResult {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        let start = Instant::now();
        let (pong_seen, note) = probe(&dev, baud, probe_timeout).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if pong_seen {
            info!("autodetect: PONG from {} ({}ms)", dev, elapsed_ms);
        } else {
            warn!("autodetect: {}: {}", dev, note);
        }
        probes.push(ProbeResult { dev: dev.clone(), pong_seen, elapsed_ms, note });
        if pong_seen {
            return AutodetectResult { chosen: Some(dev), probes };
        }
    }

    AutodetectResult { chosen: None, probes }
}

async fn probe(dev: &str, baud: u32, timeout: Duration) -> (bool, String) {
    let t = StreamTransport::serial(baud, timeout);
    let mut lines = match t.connect(dev).await {
        Ok(l) => l,
        Err(e) => return (false, e.to_string()),
    };
    if let Err(e) = t.write(AuxCommand::Ping.encode().as_bytes()).await {
        t.disconnect().await.ok();
        return (false, format!("ping write failed: {}", e));
    }
    let waited = tokio::time::timeout(timeout, async {
        while let Some(line) = lines.recv().await {
            if parse_line(&line) == Some(Telemetry::Pong) {
                return true;
            }
        }
        false
    })
    .await;
    t.disconnect().await.ok();
    match waited {
        Ok(true) => (true, "pong".to_string()),
        Ok(false) => (false, "stream closed before PONG".to_string()),
        Err(_) => (false, "no PONG within timeout".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_devices_are_reported_not_chosen() {
        let res = autodetect_link(
            vec!["/dev/skiff-does-not-exist0".into(), "/dev/skiff-does-not-exist1".into()],
            9600,
            Duration::from_millis(50),
        )
        .await;
        assert!(res.chosen.is_none());
        assert_eq!(res.probes.len(), 2);
        assert!(res.probes.iter().all(|p| !p.pong_seen));
    }
}
