use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{info, warn};

use crate::error::LinkError;
use crate::state::{LinkState, LinkStatus};
use crate::transport::{LineStream, Transport};

/// Connection manager. Owns the lifecycle of one transport session; the
/// command loop and the telemetry reader only borrow it.
pub struct Link {
    transport: Arc<dyn Transport>,
    status: Mutex<LinkStatus>,
}

impl Link {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let status = LinkStatus::new(transport.kind());
        Self { transport, status: Mutex::new(status) }
    }

    fn status_mut(&self) -> MutexGuard<'_, LinkStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn connect(&self, address: &str) -> Result<LineStream, LinkError> {
        {
            let mut st = self.status_mut();
            if st.state != LinkState::Disconnected {
                warn!("link: connect requested while {:?}", st.state);
                return Err(LinkError::AlreadyOpen);
            }
            st.state = LinkState::Connecting;
        }
        info!("link: connecting {} {}", self.transport.kind(), address);
        match self.transport.connect(address).await {
            Ok(lines) => {
                let mut st = self.status_mut();
                st.state = LinkState::Connected { address: address.to_string() };
                st.last_status = Some(format!("connected to {}", address));
                st.last_error = None;
                info!("link: connected to {}", address);
                Ok(lines)
            }
            Err(e) => {
                let mut st = self.status_mut();
                st.state = LinkState::Disconnected;
                st.last_error = Some(e.to_string());
                st.last_status = Some("connect failed".to_string());
                warn!("link: {}", e);
                Err(e)
            }
        }
    }

    /// Idempotent.
    pub async fn disconnect(&self) {
        {
            let mut st = self.status_mut();
            if st.state == LinkState::Disconnected {
                return;
            }
            st.state = LinkState::Disconnecting;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("link: disconnect: {}", e);
        }
        let mut st = self.status_mut();
        st.state = LinkState::Disconnected;
        st.last_status = Some("disconnected".to_string());
        info!("link: disconnected");
    }

    /// Connected per the manager and still alive per the transport. A transport
    /// that lost its peer moves the manager to `Disconnected`.
    pub fn is_connected(&self) -> bool {
        let mut st = self.status_mut();
        if !st.state.is_connected() {
            return false;
        }
        if !self.transport.is_connected() {
            warn!("link: transport dropped");
            st.state = LinkState::Disconnected;
            st.last_status = Some("link lost".to_string());
            return false;
        }
        true
    }

    pub async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let res = self.transport.write(bytes).await;
        let mut st = self.status_mut();
        match &res {
            Ok(()) => st.tx_ok += 1,
            Err(e) => {
                st.tx_failed += 1;
                st.last_error = Some(e.to_string());
            }
        }
        res
    }

    pub fn status(&self) -> LinkStatus {
        self.status_mut().clone()
    }

    pub fn state(&self) -> LinkState {
        self.status_mut().state.clone()
    }

    pub fn set_status_text(&self, text: impl Into<String>) {
        self.status_mut().last_status = Some(text.into());
    }

    pub fn note_rx(&self) {
        self.status_mut().last_rx = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, WriteBehavior};

    #[tokio::test]
    async fn lifecycle() {
        let mock = Arc::new(MockTransport::new());
        let link = Link::new(mock.clone());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(matches!(link.write(b"2\n").await, Err(LinkError::NotConnected)));
        assert_eq!(mock.write_count(), 0);

        let _lines = link.connect("AA:BB").await.unwrap();
        assert_eq!(link.state(), LinkState::Connected { address: "AA:BB".into() });
        assert!(matches!(link.connect("AA:BB").await, Err(LinkError::AlreadyOpen)));

        link.write(b"2\n").await.unwrap();
        mock.set_behavior(WriteBehavior::Fail);
        assert!(link.write(b"1\n").await.is_err());
        let st = link.status();
        assert_eq!((st.tx_ok, st.tx_failed), (1, 1));

        link.disconnect().await;
        link.disconnect().await;
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn refused_connect_returns_to_disconnected() {
        let mock = Arc::new(MockTransport::new());
        mock.refuse_connect(true);
        let link = Link::new(mock);
        assert!(link.connect("x").await.is_err());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.status().last_error.is_some());
    }

    #[tokio::test]
    async fn dropped_peer_is_noticed() {
        let mock = Arc::new(MockTransport::new());
        let link = Link::new(mock.clone());
        let _lines = link.connect("x").await.unwrap();
        mock.drop_connection();
        assert!(!link.is_connected());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.status().last_status.as_deref(), Some("link lost"));
    }
}
