//! Scriptable transport for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::transport::{LineStream, Transport, LINE_BUFFER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBehavior {
    Succeed,
    Fail,
    /// The write future never resolves.
    Hang,
}

/// Records every write attempt; behaviour of each write is switchable.
///
/// ```
/// use skiff_link::mock::{MockTransport, WriteBehavior};
///
/// let t = MockTransport::new();
/// t.set_behavior(WriteBehavior::Fail);
/// assert_eq!(t.write_count(), 0);
/// ```
#[derive(Debug)]
pub struct MockTransport {
    writes: Mutex<Vec<String>>,
    behavior: Mutex<WriteBehavior>,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    inbound: Mutex<Option<mpsc::Sender<String>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            behavior: Mutex::new(WriteBehavior::Succeed),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            inbound: Mutex::new(None),
        }
    }

    pub fn set_behavior(&self, b: WriteBehavior) {
        *lock(&self.behavior) = b;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Every write attempted so far, including failed and hung ones.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// Deliver a line as if the boat had sent it.
    pub fn inject_line(&self, line: &str) -> bool {
        match lock(&self.inbound).as_ref() {
            Some(tx) => tx.try_send(line.to_string()).is_ok(),
            None => false,
        }
    }

    /// Simulate the peer vanishing.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.inbound).take();
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, address: &str) -> Result<LineStream, LinkError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(LinkError::Connect { address: address.to_string(), reason: "refused".into() });
        }
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        *lock(&self.inbound) = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        lock(&self.writes).push(String::from_utf8_lossy(bytes).into_owned());
        let behavior = *lock(&self.behavior);
        match behavior {
            WriteBehavior::Succeed => Ok(()),
            WriteBehavior::Fail => Err(LinkError::Write("mock failure".into())),
            WriteBehavior::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.drop_connection();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
