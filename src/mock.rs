//! Mock Nice backend.
//!
//! Stands in for the service behind the proxy: reads one framed request per
//! connection, waits a random delay, and answers with a large framed
//! response. Concurrent sessions are capped; connections beyond the cap are
//! closed immediately.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::MockConfig;
use crate::error::{Error, Result};
use crate::protocol::{encode_frame, read_frame, HEADER_LEN};

const PADDING_PATTERNS: [&str; 5] = [
    "DATA_BLOCK_",
    "SAMPLE_TEXT_",
    "MOCK_FIELD_",
    "TEST_VALUE_",
    "RESPONSE_ITEM_",
];

/// Request text (header included) must exceed this to be echoed back.
const ECHO_THRESHOLD: usize = HEADER_LEN + 20;
const ECHO_CHARS: usize = 50;

/// Server instance
pub struct MockServer {
    config: MockConfig,
    sessions: Arc<Semaphore>,
    request_count: Arc<AtomicU64>,
}

impl MockServer {
    pub fn new(config: MockConfig) -> Self {
        let sessions = Arc::new(Semaphore::new(config.max_sessions));
        Self {
            config,
            sessions,
            request_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(
            address = %listener.local_addr()?,
            max_sessions = self.config.max_sessions,
            min_response = self.config.min_response_size,
            max_response = self.config.max_response_size,
            min_delay_ms = self.config.min_delay.as_millis() as u64,
            max_delay_ms = self.config.max_delay.as_millis() as u64,
            "Nice mock server listening"
        );

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            // Non-blocking: a full server refuses instead of queueing
            let permit = match Arc::clone(&self.sessions).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        peer = %addr,
                        max_sessions = self.config.max_sessions,
                        "Max sessions reached, rejecting connection"
                    );
                    drop(stream);
                    continue;
                }
            };

            let req_id = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                req_id,
                peer = %addr,
                active = self.active_sessions(),
                "Session acquired"
            );

            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, req_id, &config, permit).await {
                    warn!(req_id, error = %e, "Error handling client");
                }
                debug!(req_id, "Connection closed");
            });
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.config.max_sessions - self.sessions.available_permits()
    }
}

/// Serve one request; the permit is released when this returns.
async fn handle_connection(
    mut stream: TcpStream,
    req_id: u64,
    config: &MockConfig,
    _permit: OwnedSemaphorePermit,
) -> Result<()> {
    let start = Instant::now();

    let frame = match tokio::time::timeout(config.read_timeout, read_frame(&mut stream)).await {
        Ok(frame) => frame?,
        Err(_) => {
            return Err(Error::Timeout {
                op: crate::error::Operation::Read,
                timeout: config.read_timeout,
            })
        }
    };

    if frame.payload().is_empty() {
        warn!(req_id, "Empty request received");
        return Ok(());
    }
    info!(req_id, size = frame.payload().len(), "Request received");

    let request = frame.to_text()?;

    let (delay, target_size) = {
        let mut rng = rand::thread_rng();
        let delay_ms = rng.gen_range(
            config.min_delay.as_millis() as u64..=config.max_delay.as_millis() as u64,
        );
        let size = rng.gen_range(config.min_response_size..=config.max_response_size);
        (Duration::from_millis(delay_ms), size)
    };
    debug!(req_id, delay_ms = delay.as_millis() as u64, "Simulating delay");
    tokio::time::sleep(delay).await;

    let body = response_body(req_id, &request, target_size, unix_millis());
    let response = encode_frame(&body)?;
    stream.write_all(&response).await?;
    stream.flush().await?;

    info!(
        req_id,
        size = response.len() - HEADER_LEN,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Response sent"
    );
    Ok(())
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Build a response payload of exactly `target_size` EUC-KR bytes, or the
/// prefix alone if that is already longer.
///
/// `request` is the full request text, header included.
pub fn response_body(req_id: u64, request: &str, target_size: usize, now_ms: u128) -> String {
    let mut body = format!("MOCK_RESPONSE_{req_id:06}_{now_ms}_");

    if request.chars().count() > ECHO_THRESHOLD {
        let echoed: String = request.chars().skip(HEADER_LEN).take(ECHO_CHARS).collect();
        body.push_str("REQ:");
        body.push_str(&echoed);
        body.push('_');
    }

    let prefix_len = euc_kr_len(&body);
    body.push_str(&padding(target_size.saturating_sub(prefix_len)));
    body
}

fn euc_kr_len(text: &str) -> usize {
    encoding_rs::EUC_KR.encode(text).0.len()
}

/// ASCII filler of exactly `size` bytes.
fn padding(size: usize) -> String {
    let mut out = String::with_capacity(size + 32);
    let mut block = 0usize;
    while out.len() < size {
        out.push_str(PADDING_PATTERNS[block % PADDING_PATTERNS.len()]);
        out.push_str(&format!("{block:05}_"));
        if block % 10 == 0 {
            out.push('\n');
        }
        block += 1;
    }
    out.truncate(size);
    out
}

/// Serve until Ctrl-C.
pub async fn run(config: MockConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down mock server");
        }
    }
    Ok(())
}
