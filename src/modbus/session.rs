use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::protocol::declared_frame_len;
use crate::utils::error::ModbusError;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection owned by exactly one poll cycle at a time.
#[async_trait]
pub trait ModbusTransport: Send {
    async fn open(&mut self, host: &str, port: u16) -> Result<(), ModbusError>;

    /// Best-effort and idempotent; never fails.
    async fn close(&mut self);

    /// Writes `frame`, then reads until `expected_len` bytes arrive or the
    /// peer closes the stream. The returned buffer may be short.
    async fn send_and_receive(
        &mut self,
        frame: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, ModbusError>;

    /// Reads the next reply without sending anything.
    async fn receive(&mut self, expected_len: usize) -> Result<Vec<u8>, ModbusError>;

    fn is_connected(&self) -> bool;

    fn next_transaction_id(&mut self) -> u16;
}

/// Per-session MBAP transaction id. Wraps 65535 -> 0.
#[derive(Debug, Clone, Default)]
pub struct TransactionCounter {
    current: u16,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(current: u16) -> Self {
        Self { current }
    }

    pub fn next(&mut self) -> u16 {
        self.current = self.current.wrapping_add(1);
        self.current
    }

    pub fn current(&self) -> u16 {
        self.current
    }
}

pub struct TcpSession {
    stream: Option<TcpStream>,
    io_timeout: Duration,
    transactions: TransactionCounter,
}

impl TcpSession {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            stream: None,
            io_timeout,
            transactions: TransactionCounter::new(),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

impl Default for TcpSession {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT)
    }
}

#[async_trait]
impl ModbusTransport for TcpSession {
    async fn open(&mut self, host: &str, port: u16) -> Result<(), ModbusError> {
        self.close().await;

        info!("🔌 Connecting to Modbus TCP device {}:{}", host, port);
        let stream = match timeout(self.io_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("❌ Failed to connect to {}:{}: {}", host, port, e);
                return Err(ModbusError::ConnectionError(e.to_string()));
            }
            Err(_) => {
                error!("⏰ Connection to {}:{} timed out after {:?}", host, port, self.io_timeout);
                return Err(ModbusError::Timeout);
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        info!("✅ Connected to {}:{}", host, port);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Ignoring error while closing session: {}", e);
            }
            info!("🔌 Session closed");
        }
    }

    async fn send_and_receive(
        &mut self,
        frame: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, ModbusError> {
        let io_timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;

        let stale = discard_pending(stream);
        if stale > 0 {
            warn!("Discarded {} stale bytes left over from an earlier request", stale);
        }

        debug!("📤 Sending frame: {}", hex::encode(frame));
        timeout(io_timeout, stream.write_all(frame)).await??;
        timeout(io_timeout, stream.flush()).await??;

        read_frame(stream, expected_len, io_timeout).await
    }

    async fn receive(&mut self, expected_len: usize) -> Result<Vec<u8>, ModbusError> {
        let io_timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;
        read_frame(stream, expected_len, io_timeout).await
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transactions.next()
    }
}

/// Reads up to `expected_len` bytes, stopping early at EOF or at the length
/// announced in the MBAP header. A timeout after a partial frame returns
/// what arrived so the caller can decode it.
async fn read_frame(
    stream: &mut TcpStream,
    expected_len: usize,
    io_timeout: Duration,
) -> Result<Vec<u8>, ModbusError> {
    let mut response = vec![0u8; expected_len];
    let mut wanted = expected_len;
    let mut total_read = 0;

    while total_read < wanted {
        let read = match timeout(io_timeout, stream.read(&mut response[total_read..wanted])).await {
            Ok(result) => result?,
            Err(_) if total_read > 0 => {
                debug!("Timed out after {} of {} bytes", total_read, wanted);
                break;
            }
            Err(elapsed) => return Err(elapsed.into()),
        };
        if read == 0 {
            debug!("Stream closed by peer after {} bytes", total_read);
            break;
        }
        total_read += read;

        if let Some(declared) = declared_frame_len(&response[..total_read]) {
            wanted = wanted.min(declared.max(total_read));
        }
    }
    response.truncate(total_read);

    debug!("📥 Received frame: {}", hex::encode(&response));
    Ok(response)
}

/// Drops bytes already buffered on the socket, such as a reply that arrived
/// after its request timed out.
fn discard_pending(stream: &TcpStream) -> usize {
    let mut scratch = [0u8; 64];
    let mut discarded = 0;
    while let Ok(read) = stream.try_read(&mut scratch) {
        if read == 0 {
            break;
        }
        discarded += read;
    }
    discarded
}
