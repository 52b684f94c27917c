pub mod autodetect;
pub mod error;
pub mod link;
pub mod mock;
pub mod sim;
pub mod state;
pub mod stream;
pub mod transport;

pub use error::LinkError;
pub use link::Link;
pub use state::{LinkState, LinkStatus};
pub use transport::{LineStream, Transport};

use serde::Deserialize;
use skiff_proto::command::CommandAlphabet;
use std::sync::Arc;
use std::time::Duration;

use crate::sim::{SimConfig, SimTransport};
use crate::stream::StreamTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// SPP/RFCOMM device node or USB serial radio.
    #[default]
    Serial,
    /// TCP-to-serial bridge, `host:port`.
    Tcp,
    /// In-process boat simulator.
    Sim,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub kind: LinkKind,

    /// Device node, `host:port`, or any label for the simulator.
    pub address: Option<String>,

    /// HC-05/JDY modules ship at 9600.
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Pairing PIN for the radio module. Pairing itself is done by the OS
    /// (bluetoothctl / rfcomm bind); kept here so it is not baked into code.
    pub pin: Option<String>,

    /// If true and kind=serial, probe `candidate_devs` for a PONG and use the first hit.
    #[serde(default)]
    pub autodetect: bool,
    pub candidate_devs: Option<Vec<String>>,

    /// Per-device wait for PONG during autodetect.
    pub probe_timeout_ms: Option<u64>,

    /// How long PING / STATUS wait for their reply.
    pub response_timeout_ms: Option<u64>,

    /// Upper bound on a single serial/TCP write.
    pub write_timeout_ms: Option<u64>,
}

fn default_baud() -> u32 {
    9600
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::default(),
            address: None,
            baud: default_baud(),
            pin: None,
            autodetect: false,
            candidate_devs: None,
            probe_timeout_ms: None,
            response_timeout_ms: None,
            write_timeout_ms: None,
        }
    }
}

impl LinkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.unwrap_or(1500))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms.unwrap_or(2000))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.unwrap_or(500))
    }
}

/// Build the transport named by the config. The alphabet and simulator
/// settings only matter for `kind = "sim"`.
pub fn open_transport(cfg: &LinkConfig, alphabet: &CommandAlphabet, sim: Option<&SimConfig>) -> Arc<dyn Transport> {
    match cfg.kind {
        LinkKind::Serial => Arc::new(StreamTransport::serial(cfg.baud, cfg.write_timeout())),
        LinkKind::Tcp => Arc::new(StreamTransport::tcp(cfg.write_timeout())),
        LinkKind::Sim => Arc::new(SimTransport::new(sim.cloned().unwrap_or_default(), alphabet.clone())),
    }
}
