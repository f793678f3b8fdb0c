//! Instrument orchestrator.
//!
//! An [`Instrument`] owns one transport session at a time and drives the
//! read → synchronize → parse → fan-out loop on a dedicated reader thread.
//!
//! # Threading
//!
//! ```text
//!  caller thread                      reader thread ("reader-<model> <sn>")
//!  ─────────────                      ──────────────────────────────────────
//!  open()   ── spawn ───────────────▶ loop {
//!  log_start() ── Request ─┐            drain requests   ◀─┘ reply ──▶ caller
//!  log_stop()              │            transport.read()  (bounded by timeout)
//!  acknowledge_alarm()     │            pipeline.process(bytes)
//!                          │              ├─ SampleBuffer  (RwLock, snapshot reads)
//!  select_channel() ── Mutex::try_lock_for ─┤
//!                                         ├─ raw / product loggers (single writer)
//!  subscribe() ◀── broadcast ─────────────┴─ InstrumentEvent
//!  close()  ── stop flag + join ─────▶ }  finish: flush, close files, Disconnected
//! ```
//!
//! Only `Transport::read` blocks in the loop. Events go through a
//! `tokio::sync::broadcast` channel; a slow subscriber lags and loses the oldest
//! events instead of stalling the reader.

mod pipeline;
pub mod selection;

pub use selection::ChannelSelection;

use crate::config::{InstrumentConfig, RawConfig};
use crate::core::{CounterSnapshot, Counters, InstrumentEvent, Status};
use crate::data::ring_buffer::{LiveView, SampleBuffer};
use crate::error::{AcqError, AppResult, TransportError};
use crate::transport::{self, Transport, TransportParams};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use pipeline::Pipeline;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Capacity of the event channel before slow subscribers start lagging.
pub const EVENT_CAPACITY: usize = 1024;
/// How long a caller waits for the reader to acknowledge a command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const SELECTION_LOCK_READER: Duration = Duration::from_millis(125);
pub(crate) const SELECTION_LOCK_COMMAND: Duration = Duration::from_millis(250);
/// Repeats of an identical transport failure between two reports.
const FAILURE_REPORT_INTERVAL: u32 = 10;

/// Reports the first occurrence of a failure message, then every tenth repeat.
#[derive(Debug, Default)]
pub(crate) struct FailureThrottle {
    last: Option<String>,
    repeats: u32,
}

impl FailureThrottle {
    pub(crate) fn should_report(&mut self, message: &str) -> bool {
        if self.last.as_deref() == Some(message) {
            self.repeats += 1;
            self.repeats % FAILURE_REPORT_INTERVAL == 0
        } else {
            self.last = Some(message.to_string());
            self.repeats = 0;
            true
        }
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
        self.repeats = 0;
    }
}

/// State shared between the instrument handle and its reader thread.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) events: broadcast::Sender<InstrumentEvent>,
    pub(crate) counters: Arc<Counters>,
    pub(crate) buffer: Arc<RwLock<SampleBuffer>>,
    pub(crate) selection: Arc<Mutex<ChannelSelection>>,
    status: Arc<Mutex<Status>>,
    throttle: Arc<Mutex<FailureThrottle>>,
}

impl Shared {
    /// Never blocks; an event without subscribers is dropped.
    pub(crate) fn emit(&self, event: InstrumentEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn set_status(&self, status: Status) {
        *self.status.lock() = status;
        self.emit(InstrumentEvent::Status(status));
    }

    fn transport_failure(&self, instrument: &str, err: &TransportError) {
        let message = err.to_string();
        if self.throttle.lock().should_report(&message) {
            error!(instrument, error = %message, "Transport failure");
            self.emit(InstrumentEvent::TransportFailure(message));
        } else {
            debug!(instrument, error = %message, "Repeated transport failure");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    LogStart,
    LogStop,
    AcknowledgeAlarm,
}

const REQUEST_PENDING: u8 = 0;
const REQUEST_TAKEN: u8 = 1;
const REQUEST_CANCELLED: u8 = 2;

/// A command on its way to the reader. Exactly one side claims a pending
/// request: the reader to run it, or the caller to abandon it on timeout.
struct Request {
    command: Command,
    reply: mpsc::Sender<()>,
    state: Arc<AtomicU8>,
}

fn claim(state: &AtomicU8, to: u8) -> bool {
    state
        .compare_exchange(REQUEST_PENDING, to, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

struct Session {
    handle: JoinHandle<()>,
    requests: mpsc::Sender<Request>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

/// One configured instrument.
pub struct Instrument {
    cfg: InstrumentConfig,
    shared: Shared,
    session: Option<Session>,
    command_timeout: Duration,
}

impl Instrument {
    pub fn new(cfg: InstrumentConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Shared {
            events,
            counters: Arc::new(Counters::default()),
            buffer: Arc::new(RwLock::new(SampleBuffer::new(cfg.buffer_length))),
            selection: Arc::new(Mutex::new(ChannelSelection::for_config(&cfg))),
            status: Arc::new(Mutex::new(Status::Disconnected)),
            throttle: Arc::new(Mutex::new(FailureThrottle::default())),
        };
        Self {
            cfg,
            shared,
            session: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Validate a loaded configuration and build the instrument.
    pub fn from_raw(raw: RawConfig) -> AppResult<Self> {
        Ok(Self::new(InstrumentConfig::try_from(raw)?))
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.cfg
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstrumentEvent> {
        self.shared.events.subscribe()
    }

    pub fn live_view(&self) -> LiveView {
        LiveView::new(Arc::clone(&self.shared.buffer), self.cfg.max_refresh_rate)
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    pub fn status(&self) -> Status {
        *self.shared.status.lock()
    }

    /// Whether a reader is running. A reader stops on its own after a read error.
    pub fn is_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.running.load(Ordering::SeqCst))
    }

    /// Connect the transport described by `params` and start reading.
    pub fn open(&mut self, params: &TransportParams) -> AppResult<()> {
        if self.is_open() {
            return Err(AcqError::AlreadyConnected);
        }
        match transport::connect(params) {
            Ok(transport) => self.open_transport(transport),
            Err(e) => {
                self.shared.transport_failure(&self.cfg.name(), &e);
                Err(e.into())
            }
        }
    }

    /// Start reading from `transport`, opening it first if needed.
    pub fn open_transport(&mut self, mut transport: Box<dyn Transport>) -> AppResult<()> {
        if self.is_open() {
            return Err(AcqError::AlreadyConnected);
        }
        self.close();
        let name = self.cfg.name();
        if !transport.is_open() {
            if let Err(e) = transport.open() {
                self.shared.transport_failure(&name, &e);
                return Err(e.into());
            }
        }
        self.shared.throttle.lock().reset();
        self.shared.counters.reset();
        self.shared.buffer.write().clear();

        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let (requests, inbox) = mpsc::channel();
        let endpoint = transport.describe();
        let reader = Reader {
            name: name.clone(),
            transport,
            pipeline: Pipeline::new(self.cfg.clone(), self.shared.clone(), Instant::now()),
            inbox,
            stop: Arc::clone(&stop),
            running: Arc::clone(&running),
            shared: self.shared.clone(),
        };

        self.shared.set_status(Status::Connected);
        self.emit_active_channels();
        let handle = match thread::Builder::new()
            .name(format!("reader-{name}"))
            .spawn(move || reader.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_status(Status::Disconnected);
                return Err(AcqError::Spawn(e));
            }
        };
        info!(instrument = %name, %endpoint, "Instrument connected");
        self.session = Some(Session {
            handle,
            requests,
            stop,
            running,
        });
        Ok(())
    }

    /// Stop the reader, close the transport and log files. Closing a closed
    /// instrument does nothing.
    pub fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.stop.store(true, Ordering::SeqCst);
        drop(session.requests);
        if session.handle.join().is_err() {
            error!(instrument = %self.cfg.name(), "Reader thread panicked");
            self.shared.buffer.write().clear();
            self.shared.set_status(Status::Disconnected);
        }
    }

    /// Start the configured log streams.
    ///
    /// The reader picks commands up between reads. If it does not within the
    /// command timeout, the command is cancelled and `CommandTimeout` returned;
    /// a cancelled command never runs.
    pub fn log_start(&mut self) -> AppResult<()> {
        self.command(Command::LogStart)
    }

    pub fn log_stop(&mut self) -> AppResult<()> {
        self.command(Command::LogStop)
    }

    /// Quiet a raised data timeout alarm; the silence window restarts.
    pub fn acknowledge_alarm(&mut self) -> AppResult<()> {
        self.command(Command::AcknowledgeAlarm)
    }

    fn command(&self, command: Command) -> AppResult<()> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.running.load(Ordering::SeqCst))
            .ok_or(AcqError::NotConnected)?;
        let (reply, ack) = mpsc::channel();
        let state = Arc::new(AtomicU8::new(REQUEST_PENDING));
        session
            .requests
            .send(Request {
                command,
                reply,
                state: Arc::clone(&state),
            })
            .map_err(|_| AcqError::NotConnected)?;
        match ack.recv_timeout(self.command_timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) if claim(&state, REQUEST_CANCELLED) => {
                warn!(?command, "Reader did not acknowledge command in time, cancelled");
                Err(AcqError::CommandTimeout(self.command_timeout))
            }
            // The reader took the request just before the deadline.
            Err(RecvTimeoutError::Timeout) => ack.recv().map_err(|_| AcqError::NotConnected),
            Err(RecvTimeoutError::Disconnected) => Err(AcqError::NotConnected),
        }
    }

    /// Switch a channel of the live view on or off.
    ///
    /// Returns `false` when nothing changed, including when the selection lock
    /// could not be acquired in time (the request is dropped and logged).
    pub fn select_channel(&self, name: &str, active: bool) -> bool {
        let Some(mut selection) = self.shared.selection.try_lock_for(SELECTION_LOCK_COMMAND) else {
            error!(channel = name, "Unable to acquire lock to update active channels");
            return false;
        };
        if !selection.set(name, active) {
            return false;
        }
        let names = selection.active_names();
        drop(selection);
        self.shared.emit(InstrumentEvent::ActiveChannels(names));
        true
    }

    /// Channels shown in the live view, or `None` when the selection lock
    /// could not be acquired in time.
    pub fn active_channels(&self) -> Option<Vec<String>> {
        self.read_selection(ChannelSelection::active_names)
    }

    /// Every channel that can be selected.
    pub fn channels(&self) -> Option<Vec<String>> {
        self.read_selection(ChannelSelection::names)
    }

    fn read_selection<T>(&self, read: impl FnOnce(&ChannelSelection) -> T) -> Option<T> {
        match self.shared.selection.try_lock_for(SELECTION_LOCK_COMMAND) {
            Some(selection) => Some(read(&*selection)),
            None => {
                error!(instrument = %self.cfg.name(), "Unable to acquire lock to read active channels");
                None
            }
        }
    }

    fn emit_active_channels(&self) {
        if let Some(names) = self.active_channels() {
            self.shared.emit(InstrumentEvent::ActiveChannels(names));
        }
    }

    /// Replace the configuration. The instrument must be closed.
    pub fn update_cfg(&mut self, cfg: InstrumentConfig) -> AppResult<()> {
        if self.is_open() {
            return Err(AcqError::AlreadyConnected);
        }
        self.close();
        *self.shared.selection.lock() = ChannelSelection::for_config(&cfg);
        *self.shared.buffer.write() = SampleBuffer::new(cfg.buffer_length);
        debug!(instrument = %cfg.name(), "Configuration updated");
        self.cfg = cfg;
        Ok(())
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        self.close();
    }
}

struct Reader {
    name: String,
    transport: Box<dyn Transport>,
    pipeline: Pipeline,
    inbox: mpsc::Receiver<Request>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    shared: Shared,
}

impl Reader {
    fn run(mut self) {
        debug!(instrument = %self.name, "Reader started");
        while !self.stop.load(Ordering::SeqCst) {
            self.drain_requests();
            match self.transport.read() {
                Ok(bytes) => {
                    let now = Instant::now();
                    if !bytes.is_empty() {
                        self.pipeline.process(&bytes, Utc::now(), now);
                    }
                    self.pipeline.check_alarm(now);
                }
                Err(e) => {
                    self.shared.transport_failure(&self.name, &e);
                    break;
                }
            }
        }

        self.pipeline.finish();
        self.transport.close();
        self.shared.buffer.write().clear();
        self.running.store(false, Ordering::SeqCst);
        self.shared.set_status(Status::Disconnected);
        info!(instrument = %self.name, "Instrument disconnected");
    }

    fn drain_requests(&mut self) {
        while let Ok(Request {
            command,
            reply,
            state,
        }) = self.inbox.try_recv()
        {
            if !claim(&state, REQUEST_TAKEN) {
                debug!(instrument = %self.name, ?command, "Skipping cancelled command");
                continue;
            }
            match command {
                Command::LogStart => self.pipeline.start_logging(),
                Command::LogStop => self.pipeline.stop_logging(),
                Command::AcknowledgeAlarm => self.pipeline.acknowledge_alarm(Instant::now()),
            }
            let _ = reply.send(());
        }
    }
}
