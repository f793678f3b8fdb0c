//! Per-frame processing owned by the reader thread.
//!
//! The pipeline is the single writer of the instrument's log files and live
//! buffer. Nothing here blocks except the selection lock, which is bounded by
//! [`SELECTION_LOCK_READER`].

use super::{Shared, SELECTION_LOCK_READER};
use crate::alarm::AlarmMonitor;
use crate::config::{InstrumentConfig, InstrumentKind};
use crate::core::{InstrumentEvent, LogStream, Record, Status};
use crate::data::storage::{epoch_seconds, LogConfig, Logger, RawFormat, TextFormat};
use crate::error::{LogIoError, ParseError};
use crate::framing::{Frame, FrameSynchronizer, Segment};
use crate::parser::{self, Parser};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

pub(crate) struct Pipeline {
    cfg: InstrumentConfig,
    shared: Shared,
    sync: FrameSynchronizer,
    parser: Box<dyn Parser>,
    raw: Logger<RawFormat>,
    products: Logger<TextFormat>,
    alarm: AlarmMonitor,
}

impl Pipeline {
    pub(crate) fn new(cfg: InstrumentConfig, shared: Shared, now: Instant) -> Self {
        let raw_format = match cfg.kind {
            InstrumentKind::ChecksummedBinary => RawFormat::Binary,
            _ => RawFormat::Text,
        };
        let log_cfg = LogConfig::from_instrument(&cfg);
        Self {
            sync: FrameSynchronizer::for_config(&cfg),
            parser: parser::for_config(&cfg),
            raw: Logger::new(raw_format, log_cfg.clone()),
            products: Logger::new(TextFormat, log_cfg),
            alarm: AlarmMonitor::new(cfg.data_timeout, now),
            cfg,
            shared,
        }
    }

    pub(crate) fn status(&self) -> Status {
        if self.raw.is_active() || self.products.is_active() {
            Status::Logging {
                raw: self.raw.is_active(),
                products: self.products.is_active(),
            }
        } else {
            Status::Connected
        }
    }

    pub(crate) fn start_logging(&mut self) {
        self.shared.counters.reset();
        if self.cfg.log_raw {
            self.raw.start();
        }
        if self.cfg.log_products {
            self.products.start();
        }
        info!(instrument = %self.cfg.name(), status = %self.status(), "Logging started");
        self.shared.set_status(self.status());
    }

    pub(crate) fn stop_logging(&mut self) {
        self.close_logs();
        info!(instrument = %self.cfg.name(), "Logging stopped");
        self.shared.set_status(self.status());
    }

    /// Close both streams without touching the status.
    fn close_logs(&mut self) {
        let closing = [
            (LogStream::Raw, self.raw.path().is_some()),
            (LogStream::Products, self.products.path().is_some()),
        ];
        if let Err(e) = self.raw.stop() {
            error!(error = %e, "Failed to close raw log");
        }
        if let Err(e) = self.products.stop() {
            error!(error = %e, "Failed to close product log");
        }
        for (stream, was_open) in closing {
            if was_open {
                self.shared.emit(InstrumentEvent::LogFile { stream, path: None });
            }
        }
    }

    pub(crate) fn acknowledge_alarm(&mut self, now: Instant) {
        if let Some(state) = self.alarm.acknowledge(now) {
            self.shared.emit(InstrumentEvent::Alarm(state));
        }
    }

    pub(crate) fn check_alarm(&mut self, now: Instant) {
        if let Some(state) = self.alarm.check(now) {
            warn!(
                instrument = %self.cfg.name(),
                timeout_s = self.cfg.data_timeout.as_secs(),
                "No data received within the data timeout"
            );
            self.shared.emit(InstrumentEvent::Alarm(state));
        }
    }

    /// Feed one read worth of bytes.
    pub(crate) fn process(&mut self, bytes: &[u8], timestamp: DateTime<Utc>, now: Instant) {
        let output = self.sync.feed(bytes, timestamp);
        for segment in output.segments {
            match segment {
                Segment::Frame(frame) => self.handle_frame(&frame, now),
                Segment::Noise(noise) => {
                    trace!(bytes = noise.len(), "Noise");
                    self.shared.counters.noise(noise.len());
                    self.log_untimed(&noise);
                }
                Segment::Corrupted(bytes) => {
                    warn!(instrument = %self.cfg.name(), bytes = bytes.len(), "Truncated frame");
                    self.shared.counters.noise(bytes.len());
                    self.corrupted();
                    self.log_untimed(&bytes);
                }
            }
        }
    }

    /// End of session: release retained bytes, close files, quiet the alarm.
    pub(crate) fn finish(&mut self) {
        let rest = self.sync.flush();
        if !rest.is_empty() {
            self.shared.counters.noise(rest.len());
            self.log_untimed(&rest);
        }
        if self.raw.is_active() || self.products.is_active() {
            self.close_logs();
            debug!(instrument = %self.cfg.name(), "Log files closed");
        }
        if self.alarm.is_alarmed() {
            self.shared.emit(InstrumentEvent::Alarm(false));
        }
    }

    fn corrupted(&self) {
        self.shared.counters.packet_corrupted();
        self.shared.emit(InstrumentEvent::PacketCorrupted);
    }

    fn handle_frame(&mut self, frame: &Frame, now: Instant) {
        self.shared.counters.packet_received();
        self.shared.emit(InstrumentEvent::PacketReceived);

        let record = match self.parser.parse(frame.payload()) {
            Ok(record) if record.len() == self.cfg.variables.len() => record,
            Ok(record) => {
                warn!(
                    expected = self.cfg.variables.len(),
                    got = record.len(),
                    "Record length does not match the configuration"
                );
                self.corrupted();
                self.log_raw(frame);
                return;
            }
            Err(ParseError::InvalidChecksum) => {
                warn!(instrument = %self.cfg.name(), "Invalid checksum, frame discarded");
                self.corrupted();
                return;
            }
            Err(ParseError::Unsupported { sentence, repeated }) => {
                if repeated {
                    trace!(%sentence, "Unsupported sentence");
                } else {
                    self.corrupted();
                }
                self.log_raw(frame);
                return;
            }
            Err(e) => {
                warn!(instrument = %self.cfg.name(), error = %e, "Unable to parse frame");
                self.corrupted();
                self.log_raw(frame);
                return;
            }
        };

        let raw_logged = self.log_raw(frame);
        if let Some(state) = self.alarm.reset(now) {
            self.shared.emit(InstrumentEvent::Alarm(state));
        }
        let values = self.update_live(&record, frame.timestamp);
        self.emit_aux(&record);

        if self.products.is_active() {
            let result = self.products.write(&record.values, Some(frame.timestamp));
            if self.after_write(LogStream::Products, result) && !raw_logged {
                self.logged();
            }
        }
        if let Some(values) = values {
            self.shared.emit(InstrumentEvent::Data {
                record,
                values,
                timestamp: frame.timestamp,
            });
        }
    }

    fn logged(&self) {
        self.shared.counters.packet_logged();
        self.shared.emit(InstrumentEvent::PacketLogged);
    }

    /// Timestamped raw frame. Returns whether it was written.
    fn log_raw(&mut self, frame: &Frame) -> bool {
        if !self.raw.is_active() {
            return false;
        }
        let result = self.raw.write(frame.raw(), Some(frame.timestamp));
        let written = self.after_write(LogStream::Raw, result);
        if written {
            self.logged();
        }
        written
    }

    /// Bytes between frames go to binary raw logs only, without trailer.
    fn log_untimed(&mut self, bytes: &[u8]) {
        if self.raw.is_active() && self.raw.accepts_untimed() {
            let result = self.raw.write(bytes, None);
            self.after_write(LogStream::Raw, result);
        }
    }

    /// Report file opens and failures. A failed stream stops logging.
    fn after_write(&mut self, stream: LogStream, result: Result<bool, LogIoError>) -> bool {
        match result {
            Ok(opened) => {
                if opened {
                    let path = match stream {
                        LogStream::Raw => self.raw.path(),
                        LogStream::Products => self.products.path(),
                    };
                    self.shared.emit(InstrumentEvent::LogFile {
                        stream,
                        path: path.map(|p| p.to_path_buf()),
                    });
                }
                true
            }
            Err(e) => {
                error!(instrument = %self.cfg.name(), ?stream, error = %e, "Logging stopped on I/O error");
                let stopped = match stream {
                    LogStream::Raw => self.raw.stop(),
                    LogStream::Products => self.products.stop(),
                };
                if let Err(e) = stopped {
                    debug!(error = %e, "Closing failed log");
                }
                self.shared.emit(InstrumentEvent::LogFile { stream, path: None });
                self.shared.set_status(self.status());
                false
            }
        }
    }

    /// Push the active channels into the live buffer; `None` when the selection
    /// lock could not be taken in time.
    fn update_live(&mut self, record: &Record, timestamp: DateTime<Utc>) -> Option<Vec<f64>> {
        let Some(selection) = self.shared.selection.try_lock_for(SELECTION_LOCK_READER) else {
            error!(instrument = %self.cfg.name(), "Unable to acquire lock to update timeseries");
            return None;
        };
        let values = selection.pick(record);
        let names = selection.active_names();
        drop(selection);

        self.shared
            .buffer
            .write()
            .push(epoch_seconds(timestamp), &values, &names);
        Some(values)
    }

    fn emit_aux(&self, record: &Record) {
        if self.cfg.aux_variables.is_empty() {
            return;
        }
        let aux = self
            .cfg
            .aux_variables
            .iter()
            .filter_map(|name| {
                let index = self.cfg.variable_index(name)?;
                let variable = &self.cfg.variables[index];
                let value = record.get(index)?;
                let text = match &variable.precision {
                    Some(p) => p.format(value),
                    None => value.to_string(),
                };
                let label = if variable.unit.is_empty() {
                    variable.name.clone()
                } else {
                    format!("{} ({})", variable.name, variable.unit)
                };
                Some((label, text))
            })
            .collect();
        self.shared.emit(InstrumentEvent::AuxData(aux));
    }
}
