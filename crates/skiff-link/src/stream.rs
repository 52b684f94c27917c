use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::transport::{LineStream, Transport, LINE_BUFFER};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy)]
enum Medium {
    /// SPP device node (e.g. /dev/rfcomm0) or USB serial adapter.
    Serial { baud: u32 },
    /// host:port of a TCP-to-serial bridge.
    Tcp,
}

/// Byte-stream transport shared by the serial and TCP media.
pub struct StreamTransport {
    medium: Medium,
    write_timeout: Duration,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl StreamTransport {
    pub fn serial(baud: u32, write_timeout: Duration) -> Self {
        Self::with_medium(Medium::Serial { baud }, write_timeout)
    }

    pub fn tcp(write_timeout: Duration) -> Self {
        Self::with_medium(Medium::Tcp, write_timeout)
    }

    fn with_medium(medium: Medium, write_timeout: Duration) -> Self {
        Self {
            medium,
            write_timeout,
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn open(&self, address: &str) -> Result<(BoxedReader, BoxedWriter), LinkError> {
        let fail = |reason: String| LinkError::Connect { address: address.to_string(), reason };
        match self.medium {
            Medium::Serial { baud } => {
                let port = tokio_serial::new(address, baud)
                    .open_native_async()
                    .map_err(|e| fail(e.to_string()))?;
                let (rd, wr) = tokio::io::split(port);
                Ok((Box::new(rd), Box::new(wr)))
            }
            Medium::Tcp => {
                let tcp = TcpStream::connect(address).await.map_err(|e| fail(e.to_string()))?;
                tcp.set_nodelay(true).ok();
                let (rd, wr) = tcp.into_split();
                Ok((Box::new(rd), Box::new(wr)))
            }
        }
    }

    fn abort_reader(&self) {
        if let Some(h) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take() {
            h.abort();
        }
    }
}

// Lines are decoded lossily: a corrupted byte spoils one line, which the
// telemetry parser then drops, instead of ending the stream.
async fn pump_lines(rd: BoxedReader, tx: mpsc::Sender<String>, connected: Arc<AtomicBool>) {
    let mut rd = BufReader::new(rd);
    let mut buf = Vec::with_capacity(128);
    let mut dropped: u64 = 0;
    loop {
        buf.clear();
        match rd.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                info!("link: peer closed the stream");
                break;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(|c: char| c == '\r' || c == '\n').to_string();
                match tx.try_send(line) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(line)) => {
                        dropped += 1;
                        debug!("link: consumer behind, dropped {:?} ({} so far)", line, dropped);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            Err(e) => {
                warn!("link: read failed: {:#}", e);
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl Transport for StreamTransport {
    fn kind(&self) -> &'static str {
        match self.medium {
            Medium::Serial { .. } => "serial",
            Medium::Tcp => "tcp",
        }
    }

    async fn connect(&self, address: &str) -> Result<LineStream, LinkError> {
        self.abort_reader();
        let (rd, wr) = self.open(address).await?;
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        *self.writer.lock().await = Some(wr);
        self.connected.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(pump_lines(rd, tx, self.connected.clone()));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("link: {} stream open on {}", self.kind(), address);
        Ok(rx)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let wr = guard.as_mut().ok_or(LinkError::NotConnected)?;
        let io = async {
            wr.write_all(bytes).await?;
            wr.flush().await
        };
        match tokio::time::timeout(self.write_timeout, io).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.connected.store(false, Ordering::SeqCst);
        self.abort_reader();
        if let Some(mut wr) = self.writer.lock().await.take() {
            wr.shutdown().await.ok();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_bridge_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"SYSTEM,CONNECTED\nGPS,36.137,-94.129\n").await.unwrap();
            let mut buf = [0u8; 2];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        let t = StreamTransport::tcp(Duration::from_millis(500));
        let mut lines = t.connect(&addr).await.unwrap();
        assert!(t.is_connected());
        assert_eq!(lines.recv().await.unwrap(), "SYSTEM,CONNECTED");
        assert_eq!(lines.recv().await.unwrap(), "GPS,36.137,-94.129");
        t.write(b"2\n").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"2\n");

        t.disconnect().await.unwrap();
        assert!(!t.is_connected());
        assert!(matches!(t.write(b"0\n").await, Err(LinkError::NotConnected)));
        // stopping twice is fine
        t.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn corrupted_bytes_do_not_end_the_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"GPS,36.1,-94.1\n\xff\xfe noise\r\nGPS,36.2,-94.2\n").await.unwrap();
            // Hold the socket open until the client has read everything.
            let mut buf = [0u8; 1];
            let _ = sock.read(&mut buf).await;
        });

        let t = StreamTransport::tcp(Duration::from_millis(500));
        let mut lines = t.connect(&addr).await.unwrap();
        assert_eq!(lines.recv().await.unwrap(), "GPS,36.1,-94.1");
        let noisy = lines.recv().await.unwrap();
        assert!(noisy.ends_with(" noise"), "{:?}", noisy);
        assert!(noisy.contains('\u{FFFD}'));
        assert_eq!(lines.recv().await.unwrap(), "GPS,36.2,-94.2");
        assert!(t.is_connected());

        t.disconnect().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let t = StreamTransport::tcp(Duration::from_millis(100));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(t.connect(&addr).await, Err(LinkError::Connect { .. })));
        assert!(!t.is_connected());
    }
}
