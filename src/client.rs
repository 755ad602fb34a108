//! Framed TCP client.
//!
//! One call is one connection: connect, write a single frame, read a single
//! frame, close. Nothing is shared between calls and nothing is retried.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::{Error, Operation, Result};
use crate::protocol::{encode_frame, read_frame, Frame};

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A completed exchange.
#[derive(Debug, Clone)]
pub struct Response {
    /// Header and payload decoded as EUC-KR.
    pub text: String,
    /// Bytes read from the wire, header included.
    pub wire_len: usize,
    /// From just before connecting to just after the last payload byte.
    pub elapsed: Duration,
}

impl Response {
    /// Decode a received frame; `elapsed` is measured by the caller.
    pub fn from_frame(frame: &Frame, elapsed: Duration) -> Result<Self> {
        Ok(Response {
            text: frame.to_text()?,
            wire_len: frame.wire_len(),
            elapsed,
        })
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Client for a single Nice endpoint.
#[derive(Debug, Clone)]
pub struct NiceClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl NiceClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `payload` and wait for the response frame.
    ///
    /// The timeout bounds connect, write and the response read separately.
    /// The socket is owned by this call and closed when it returns, on
    /// success and on every error path.
    pub async fn send_request(&self, payload: &str) -> Result<Response> {
        // Encoding failures never touch the network.
        let request = encode_frame(payload)?;

        let start = Instant::now();
        let mut stream = self.connect().await?;
        trace!(peer = %self.addr(), bytes = request.len(), "Connected, sending request");

        let frame = exchange(&mut stream, &request, self.timeout).await?;
        Response::from_frame(&frame, start.elapsed())
    }

    /// Open a fresh connection to the endpoint, bounded by the timeout.
    pub async fn connect(&self) -> Result<TcpStream> {
        let addr = self.addr();
        let stream = with_timeout(Operation::Connect, self.timeout, async {
            TcpStream::connect(&addr)
                .await
                .map_err(|source| Error::Connect {
                    addr: addr.clone(),
                    source,
                })
        })
        .await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Write an already-encoded request and read back one frame.
pub async fn exchange<S>(stream: &mut S, request: &[u8], timeout: Duration) -> Result<Frame>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_request(stream, request, timeout).await?;
    read_response(stream, timeout).await
}

/// Write one encoded frame and flush it.
pub async fn write_request<S>(stream: &mut S, request: &[u8], timeout: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    with_timeout(Operation::Write, timeout, async {
        stream.write_all(request).await?;
        stream.flush().await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Read one response frame.
pub async fn read_response<S>(stream: &mut S, timeout: Duration) -> Result<Frame>
where
    S: AsyncRead + Unpin,
{
    with_timeout(Operation::Read, timeout, read_frame(stream)).await
}

async fn with_timeout<T, F>(op: Operation, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { op, timeout }),
    }
}
