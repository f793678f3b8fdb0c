//! Connection probe: a throw-away reader used to try transport settings.
//!
//! The probe runs on its own thread, opens a transport through a [`Connector`]
//! and streams whatever arrives, as ASCII text, to a consumer channel.
//!
//! # Stopping
//!
//! [`ConnectionProbe::stop`] sets a cooperative cancel flag, checked between
//! reads, and waits up to the grace period for the worker to exit. A worker
//! stuck in a read that ignores the flag cannot be killed from safe Rust, so the
//! forced path revokes its right to publish instead: every event is sent under
//! the `fence` mutex and only if the worker's generation is still current. The
//! fence is bumped before `stop` returns, after which the stale thread is
//! detached and can never reach the consumer again. It exits on its own when its
//! read returns.

use crate::error::{AcqError, AppResult, TransportError};
use crate::transport::{self, Transport, TransportParams};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Builds and opens a transport for the given parameters.
pub type Connector =
    Arc<dyn Fn(&TransportParams) -> Result<Box<dyn Transport>, TransportError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Connecting,
    Connected,
    Failed(String),
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Status(ProbeStatus),
    Text(String),
}

/// How a running probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStop {
    /// Nothing was running.
    Idle,
    /// The worker observed the cancel flag within the grace period.
    Graceful,
    /// The worker was fenced off and detached.
    Forced,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

pub struct ConnectionProbe {
    connector: Connector,
    sink: mpsc::Sender<ProbeEvent>,
    fence: Arc<Mutex<u64>>,
    grace: Duration,
    worker: Option<Worker>,
}

fn failure_message(err: &TransportError) -> String {
    match err {
        TransportError::Busy(_) => {
            format!("Resource busy, the port is probably used by another program ({err})")
        }
        other => other.to_string(),
    }
}

/// Printable ASCII view of raw bytes; anything else is dropped.
fn ascii_text(bytes: &[u8]) -> String {
    bytes.iter().filter(|b| b.is_ascii()).map(|&b| char::from(b)).collect()
}

impl ConnectionProbe {
    /// Probe using the real transports and a new consumer channel.
    pub fn new() -> (Self, mpsc::Receiver<ProbeEvent>) {
        Self::with_connector(Arc::new(transport::connect))
    }

    pub fn with_connector(connector: Connector) -> (Self, mpsc::Receiver<ProbeEvent>) {
        let (sink, events) = mpsc::channel();
        let probe = Self {
            connector,
            sink,
            fence: Arc::new(Mutex::new(0)),
            grace: DEFAULT_GRACE,
            worker: None,
        };
        (probe, events)
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Start probing `params`, stopping any running probe first.
    pub fn start(&mut self, params: TransportParams) -> AppResult<()> {
        self.stop();
        let generation = *self.fence.lock();
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            connector: Arc::clone(&self.connector),
            sink: self.sink.clone(),
            fence: Arc::clone(&self.fence),
            generation,
            cancel: Arc::clone(&cancel),
        };
        let handle = thread::Builder::new()
            .name("connection-probe".into())
            .spawn(move || ctx.run(params))
            .map_err(AcqError::Spawn)?;
        self.worker = Some(Worker { handle, cancel });
        Ok(())
    }

    /// Tear down the running probe and restart it with new parameters.
    pub fn reconfigure(&mut self, params: TransportParams) -> AppResult<ProbeStop> {
        let stopped = self.stop();
        self.start(params)?;
        Ok(stopped)
    }

    pub fn stop(&mut self) -> ProbeStop {
        self.stop_within(self.grace)
    }

    /// Final stop, with the longer shutdown grace period.
    pub fn shutdown(&mut self) -> ProbeStop {
        self.stop_within(SHUTDOWN_GRACE)
    }

    fn stop_within(&mut self, grace: Duration) -> ProbeStop {
        let Some(worker) = self.worker.take() else {
            return ProbeStop::Idle;
        };
        worker.cancel.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + grace;
        while !worker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        // Whatever happened, the stopped worker may no longer publish.
        *self.fence.lock() += 1;

        if worker.handle.is_finished() {
            let _ = worker.handle.join();
            debug!("Connection probe stopped");
            ProbeStop::Graceful
        } else {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Connection probe did not stop in time, detaching worker thread"
            );
            ProbeStop::Forced
        }
    }
}

impl Drop for ConnectionProbe {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerContext {
    connector: Connector,
    sink: mpsc::Sender<ProbeEvent>,
    fence: Arc<Mutex<u64>>,
    generation: u64,
    cancel: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Send unless this worker has been fenced off.
    fn publish(&self, event: ProbeEvent) -> bool {
        let current = self.fence.lock();
        *current == self.generation && self.sink.send(event).is_ok()
    }

    fn run(self, params: TransportParams) {
        info!(endpoint = %params, "Probing connection");
        self.publish(ProbeEvent::Status(ProbeStatus::Connecting));
        let mut transport = match (self.connector)(&params) {
            Ok(t) => t,
            Err(e) => {
                warn!(endpoint = %params, error = %e, "Probe failed to connect");
                self.publish(ProbeEvent::Status(ProbeStatus::Failed(failure_message(&e))));
                return;
            }
        };
        self.publish(ProbeEvent::Status(ProbeStatus::Connected));

        while !self.cancel.load(Ordering::SeqCst) {
            match transport.read() {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => {
                    if !self.publish(ProbeEvent::Text(ascii_text(&bytes))) {
                        break;
                    }
                }
                Err(e) => {
                    self.publish(ProbeEvent::Status(ProbeStatus::Failed(failure_message(&e))));
                    break;
                }
            }
        }
        transport.close();
        self.publish(ProbeEvent::Status(ProbeStatus::Finished));
    }
}
