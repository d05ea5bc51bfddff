//! Coordination service that lets worker processes use the parent's queues
//! and exit signal.
//!
//! The parent runs one [`serve`] loop per child on a dedicated thread. The
//! child wraps its stdin/stdout in a [`BrokerClient`], which implements
//! [`Transport`] by turning every call into one request/reply exchange.

use super::exit::ExitSignal;
use super::ipc::{LineReader, LineWriter};
use super::protocol::{BrokerReply, BrokerRequest, WorkerLaunch};
use super::queue::{QueueError, QueueRef};
use super::transport::{Transport, bound};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// What a broker thread has to offer its child.
pub struct BrokerSession {
    /// Label for logs, e.g. `telemetry#0`.
    pub label: String,
    pub exit: ExitSignal,
    pub inputs: Vec<QueueRef>,
    pub outputs: Vec<QueueRef>,
}

/// Counters reported when a broker thread finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    pub requests: u64,
    pub items_in: u64,
    pub items_out: u64,
}

/// Serve one child until it closes its stdout.
///
/// Returns an error only if the reply pipe breaks while the child is still
/// talking, which means the child died mid-request.
pub fn serve(
    mut reader: LineReader,
    mut writer: LineWriter,
    session: BrokerSession,
) -> io::Result<BrokerStats> {
    let mut stats = BrokerStats::default();

    loop {
        let request = match reader.read_line()? {
            Some(line) => BrokerRequest::from_line(line),
            None => {
                debug!(
                    worker = %session.label,
                    requests = stats.requests,
                    items_in = stats.items_in,
                    items_out = stats.items_out,
                    "Worker closed broker link"
                );
                return Ok(stats);
            }
        };
        stats.requests += 1;

        let reply = match request {
            Ok(request) => handle(&session, request, &mut stats),
            Err(e) => {
                warn!(worker = %session.label, error = %e, "Malformed broker request");
                BrokerReply::error(format!("Invalid request: {}", e))
            }
        };

        writer.write_line(&reply.to_line())?;
    }
}

fn handle(session: &BrokerSession, request: BrokerRequest, stats: &mut BrokerStats) -> BrokerReply {
    trace!(worker = %session.label, ?request, "Broker request");
    match request {
        BrokerRequest::Put {
            queue,
            item,
            timeout_ms,
        } => {
            let result = bound(&session.outputs, queue)
                .and_then(|q| q.enqueue_value(item, Duration::from_millis(timeout_ms)));
            match result {
                Ok(()) => {
                    stats.items_in += 1;
                    BrokerReply::Ok
                }
                Err(QueueError::Full) => BrokerReply::Full,
                Err(e) => BrokerReply::error(e.to_string()),
            }
        }
        BrokerRequest::Get { queue, timeout_ms } => {
            let result = bound(&session.inputs, queue)
                .and_then(|q| q.dequeue_value(Duration::from_millis(timeout_ms)));
            match result {
                Ok(item) => {
                    stats.items_out += 1;
                    BrokerReply::Item { item }
                }
                Err(QueueError::Empty) => BrokerReply::Empty,
                Err(e) => BrokerReply::error(e.to_string()),
            }
        }
        BrokerRequest::ExitStatus => BrokerReply::Exit {
            requested: session.exit.is_exit_requested(),
        },
        BrokerRequest::RequestExit => {
            debug!(worker = %session.label, "Worker requested exit");
            session.exit.request_exit();
            BrokerReply::Ok
        }
    }
}

struct Link {
    reader: LineReader,
    writer: LineWriter,
}

/// Child-side transport that forwards to the parent's broker.
///
/// Once the link breaks, the exit signal reads as set so the worker winds
/// down instead of outliving its parent.
pub struct BrokerClient {
    link: Mutex<Link>,
    broken: AtomicBool,
}

impl BrokerClient {
    pub fn new(reader: LineReader, writer: LineWriter) -> Self {
        Self {
            link: Mutex::new(Link { reader, writer }),
            broken: AtomicBool::new(false),
        }
    }

    /// Read the launch message the parent sends before anything else, then
    /// hand back a client for the rest of the conversation.
    pub fn handshake(
        mut reader: LineReader,
        writer: LineWriter,
    ) -> io::Result<(Self, WorkerLaunch)> {
        let launch = match reader.read_line()? {
            Some(line) => WorkerLaunch::from_line(line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "parent closed the link before sending launch parameters",
                ));
            }
        };
        Ok((Self::new(reader, writer), launch))
    }

    /// True once a request has failed at the pipe level.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn call(&self, request: &BrokerRequest) -> io::Result<BrokerReply> {
        if self.is_broken() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "broker link is closed",
            ));
        }
        let result = self.exchange(request);
        if result.is_err() {
            self.broken.store(true, Ordering::SeqCst);
        }
        result
    }

    fn exchange(&self, request: &BrokerRequest) -> io::Result<BrokerReply> {
        let mut link = self
            .link
            .lock()
            .map_err(|_| io::Error::other("broker link lock poisoned"))?;
        link.writer.write_line(&request.to_line())?;
        match link.reader.read_line()? {
            Some(line) => BrokerReply::from_line(line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "broker closed the link",
            )),
        }
    }
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

fn unexpected(reply: BrokerReply) -> QueueError {
    match reply {
        BrokerReply::Error { message } => QueueError::Transport(message),
        other => QueueError::Transport(format!("unexpected broker reply: {:?}", other)),
    }
}

impl Transport for BrokerClient {
    fn enqueue(
        &self,
        output: usize,
        item: serde_json::Value,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let request = BrokerRequest::put(output, item, timeout_ms(timeout));
        match self.call(&request) {
            Ok(BrokerReply::Ok) => Ok(()),
            Ok(BrokerReply::Full) => Err(QueueError::Full),
            Ok(other) => Err(unexpected(other)),
            Err(e) => Err(QueueError::Transport(e.to_string())),
        }
    }

    fn dequeue(&self, input: usize, timeout: Duration) -> Result<serde_json::Value, QueueError> {
        let request = BrokerRequest::get(input, timeout_ms(timeout));
        match self.call(&request) {
            Ok(BrokerReply::Item { item }) => Ok(item),
            Ok(BrokerReply::Empty) => Err(QueueError::Empty),
            Ok(other) => Err(unexpected(other)),
            Err(e) => Err(QueueError::Transport(e.to_string())),
        }
    }

    fn request_exit(&self) {
        if let Err(e) = self.call(&BrokerRequest::RequestExit) {
            debug!(error = %e, "Could not forward exit request");
        }
    }

    fn is_exit_requested(&self) -> bool {
        match self.call(&BrokerRequest::ExitStatus) {
            Ok(BrokerReply::Exit { requested }) => requested,
            Ok(other) => {
                warn!(reply = ?other, "Unexpected reply to exit status");
                false
            }
            Err(_) => true,
        }
    }
}
