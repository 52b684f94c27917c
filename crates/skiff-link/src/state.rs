use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected { address: String },
    Disconnecting,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected { .. })
    }
}

#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub state: LinkState,
    pub kind: &'static str,
    /// Last human-readable status string (from the boat or from the link itself).
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub last_rx: Option<Instant>,
    pub tx_ok: u64,
    pub tx_failed: u64,
}

impl LinkStatus {
    pub fn new(kind: &'static str) -> Self {
        Self {
            state: LinkState::Disconnected,
            kind,
            last_status: None,
            last_error: None,
            last_rx: None,
            tx_ok: 0,
            tx_failed: 0,
        }
    }

    pub fn rx_age(&self) -> Option<Duration> {
        self.last_rx.map(|t| t.elapsed())
    }
}
