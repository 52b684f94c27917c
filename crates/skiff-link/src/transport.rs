use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LinkError;

/// Inbound lines, delimiter stripped. Exactly one consumer per connection.
pub type LineStream = mpsc::Receiver<String>;

/// Inbound channel depth. A slow consumer drops lines rather than stalling the reader.
pub const LINE_BUFFER: usize = 64;

/// One physical link to the boat. Implemented per medium: serial device node,
/// TCP serial bridge, in-process simulator, test mock.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn connect(&self, address: &str) -> Result<LineStream, LinkError>;

    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;
}
