//! ==============================================================================
//! stream.rs - auto-reconnecting data-stream client
//! ==============================================================================
//!
//! purpose:
//!     keeps a subscription to the bridge's data port open. the bridge writes
//!     one json object per line; every decoded line becomes a StreamEvent on
//!     an mpsc channel the controller drains.
//!
//! behaviour:
//!     - connect, read lines until eof or a socket error, then wait
//!       `retry_delay` and connect again. forever, until stopped.
//!     - a line that fails to decode is skipped; the connection stays up.
//!     - stop is a watch flag raced against every connect, read and sleep,
//!       so a blocked read is abandoned immediately.
//!
//! relationships:
//!     - used by: recorder.rs (record), main.rs (watch)
//!     - uses: domain.rs (SensorReading::parse_line)
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::SensorReading;
use crate::error::{BridgeError, Result};

/// longest line taken from the stream; a reading is a few hundred bytes
pub const MAX_LINE_BYTES: usize = 64 * 1024;

// ==============================================================================
// line sources
// ==============================================================================
// the reconnect loop only needs "give me a fresh line reader". tcp is the real
// source; tests plug in scripted readers to simulate disconnects.

pub trait LineSource: Send + Sync + 'static {
    type Reader: AsyncBufRead + Unpin + Send + 'static;

    /// open a new connection
    fn open(&self) -> impl Future<Output = Result<Self::Reader>> + Send;

    /// human readable peer name for logs
    fn describe(&self) -> String;
}

/// tcp connection to the bridge data port
#[derive(Debug, Clone)]
pub struct TcpLineSource {
    addr: String,
    connect_timeout: Duration,
}

impl TcpLineSource {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

impl LineSource for TcpLineSource {
    type Reader = BufReader<TcpStream>;

    fn open(&self) -> impl Future<Output = Result<Self::Reader>> + Send {
        let addr = self.addr.clone();
        let connect_timeout = self.connect_timeout;
        async move {
            let attempt = tokio::time::timeout(connect_timeout, TcpStream::connect(addr.clone())).await;
            match attempt {
                Ok(Ok(stream)) => Ok(BufReader::new(stream)),
                Ok(Err(e)) => Err(BridgeError::Connection(format!("{}: {}", addr, e))),
                Err(_) => Err(BridgeError::Timeout {
                    target: addr,
                    timeout: connect_timeout,
                }),
            }
        }
    }

    fn describe(&self) -> String {
        self.addr.clone()
    }
}

// ==============================================================================
// events
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// about to open connection number `attempt` (1-based)
    Connecting { attempt: u64 },
    Connected,
    Reading(SensorReading),
    /// a line arrived but could not be decoded
    Skipped { reason: String },
    Disconnected { reason: String },
}

/// counters returned when the worker exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub attempts: u64,
    pub connections: u64,
    pub readings: u64,
    pub skipped: u64,
}

enum LineEnd {
    Closed,
    Failed(String),
    Stopped,
}

// ==============================================================================
// client
// ==============================================================================

pub struct StreamClient<S> {
    source: S,
    retry_delay: Duration,
}

/// Owner side of a running stream worker. Dropping it stops the worker.
pub struct StreamHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<StreamSummary>,
}

impl<S: LineSource> StreamClient<S> {
    pub fn new(source: S, retry_delay: Duration) -> Self {
        Self { source, retry_delay }
    }

    /// Start the worker on the current tokio runtime.
    pub fn spawn(self, events: mpsc::UnboundedSender<StreamEvent>) -> StreamHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(events, stop_rx));
        StreamHandle { stop_tx, task }
    }

    async fn run(
        self,
        events: mpsc::UnboundedSender<StreamEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> StreamSummary {
        let mut summary = StreamSummary::default();
        let peer = self.source.describe();

        loop {
            if is_stopped(&stop) || events.is_closed() {
                break;
            }

            summary.attempts += 1;
            debug!(peer = %peer, attempt = summary.attempts, "connecting to data stream");
            let _ = events.send(StreamEvent::Connecting {
                attempt: summary.attempts,
            });

            let opened = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                opened = self.source.open() => opened,
            };

            let reason = match opened {
                Ok(reader) => {
                    summary.connections += 1;
                    info!(peer = %peer, "data stream connected");
                    let _ = events.send(StreamEvent::Connected);

                    match read_lines(reader, &events, &mut stop, &mut summary).await {
                        LineEnd::Closed => "peer closed the stream".to_string(),
                        LineEnd::Failed(e) => e,
                        LineEnd::Stopped => {
                            let _ = events.send(StreamEvent::Disconnected {
                                reason: "stopped".into(),
                            });
                            break;
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            warn!(peer = %peer, "data stream down ({}), retrying in {:?}", reason, self.retry_delay);
            let _ = events.send(StreamEvent::Disconnected { reason });

            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(
            peer = %peer,
            attempts = summary.attempts,
            readings = summary.readings,
            skipped = summary.skipped,
            "data stream worker exited"
        );
        summary
    }
}

impl StreamHandle {
    /// Ask the worker to exit. Pending reads are abandoned.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to exit on its own (or after `stop`).
    pub async fn join(self) -> StreamSummary {
        let StreamHandle { stop_tx, task } = self;
        let summary = match task.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("data stream worker failed: {}", e);
                StreamSummary::default()
            }
        };
        drop(stop_tx);
        summary
    }

    pub async fn shutdown(self) -> StreamSummary {
        self.stop();
        self.join().await
    }
}

async fn read_lines<R: AsyncBufRead + Unpin>(
    mut reader: R,
    events: &mpsc::UnboundedSender<StreamEvent>,
    stop: &mut watch::Receiver<bool>,
    summary: &mut StreamSummary,
) -> LineEnd {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = {
            let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64 + 1);
            tokio::select! {
                biased;
                _ = stopped(stop) => return LineEnd::Stopped,
                read = limited.read_until(b'\n', &mut buf) => read,
            }
        };

        match read {
            Ok(0) => return LineEnd::Closed,
            Ok(_) => {}
            Err(e) => return LineEnd::Failed(e.to_string()),
        }

        if buf.last() != Some(&b'\n') {
            if buf.len() <= MAX_LINE_BYTES {
                debug!(bytes = buf.len(), "discarding unterminated trailing line");
                return LineEnd::Closed;
            }

            summary.skipped += 1;
            debug!("skipping line longer than {} bytes", MAX_LINE_BYTES);
            let skipped = StreamEvent::Skipped {
                reason: format!("line longer than {} bytes", MAX_LINE_BYTES),
            };
            if events.send(skipped).is_err() {
                return LineEnd::Stopped;
            }
            if let Some(end) = discard_rest_of_line(&mut reader, stop).await {
                return end;
            }
            continue;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match SensorReading::parse_line(line) {
            Ok(reading) => {
                summary.readings += 1;
                StreamEvent::Reading(reading)
            }
            Err(e) => {
                summary.skipped += 1;
                debug!(line = %line, "skipping malformed line: {}", e);
                StreamEvent::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        if events.send(event).is_err() {
            // nobody is listening any more
            return LineEnd::Stopped;
        }
    }
}

/// drop bytes up to and including the next newline; `None` once it is found
async fn discard_rest_of_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    stop: &mut watch::Receiver<bool>,
) -> Option<LineEnd> {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = stopped(stop) => return Some(LineEnd::Stopped),
            chunk = reader.fill_buf() => chunk,
        };
        let (used, found) = match chunk {
            Ok([]) => return Some(LineEnd::Closed),
            Ok(bytes) => match bytes.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (bytes.len(), false),
            },
            Err(e) => return Some(LineEnd::Failed(e.to_string())),
        };
        reader.consume(used);
        if found {
            return None;
        }
    }
}

/// resolves once stop is requested or the handle is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

fn is_stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}
