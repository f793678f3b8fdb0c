//! Rotating log writers.
//!
//! A [`Logger`] owns at most one open file at a time and is generic over a
//! [`LogFormat`] that knows the file extension, the header and the layout of one
//! entry. Three formats are provided:
//!
//! - [`TextFormat`] (`.csv`): decoded records, one line per record.
//! - [`RawFormat::Binary`] (`.bin`): raw frames each followed by an 8 byte
//!   big-endian timestamp.
//! - [`RawFormat::Text`] (`.raw`): raw frames decoded as UTF-8 text.
//!
//! Files open lazily on the first write and rotate when the UTC day of the sample
//! differs from the day the file was opened, or once the configured length has
//! elapsed. The current file is flushed and closed before the next one is
//! created. Each logger has a single writer (the instrument reader thread), so no
//! locking happens here.

use crate::config::InstrumentConfig;
use crate::core::Value;
use crate::data::precision::Precision;
use crate::error::LogIoError;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Layout of timestamps in log lines and in the unit header.
pub const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";
const TIME_UNITS: &str = "yyyy/mm/dd HH:MM:SS.fff";
const FILENAME_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Where and how a logger writes.
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub path: PathBuf,
    pub prefix: String,
    /// Rotation length; zero disables rotation by duration.
    pub length: Duration,
    pub variable_names: Vec<String>,
    pub variable_units: Vec<String>,
    /// Per column format, `None` for the default conversion.
    pub variable_precision: Vec<Option<Precision>>,
}

impl LogConfig {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>, length: Duration) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
            length,
            variable_names: Vec::new(),
            variable_units: Vec::new(),
            variable_precision: Vec::new(),
        }
    }

    /// Logging settings of an instrument, including the product schema.
    pub fn from_instrument(cfg: &InstrumentConfig) -> Self {
        Self {
            path: cfg.log_path.clone(),
            prefix: cfg.log_prefix.clone(),
            length: cfg.log_length,
            variable_names: cfg.variables.iter().map(|v| v.name.clone()).collect(),
            variable_units: cfg.variables.iter().map(|v| v.unit.clone()).collect(),
            variable_precision: cfg.variables.iter().map(|v| v.precision.clone()).collect(),
        }
    }
}

/// File layout of one log stream.
pub trait LogFormat {
    /// What a single write receives.
    type Entry: ?Sized;

    fn extension(&self) -> &'static str;

    fn write_header(&self, cfg: &LogConfig, out: &mut dyn Write) -> io::Result<()>;

    fn write_entry(
        &self,
        cfg: &LogConfig,
        out: &mut dyn Write,
        entry: &Self::Entry,
        timestamp: Option<DateTime<Utc>>,
    ) -> io::Result<()>;

    /// Whether a write without timestamp is accepted (appended without rotation).
    fn accepts_untimed(&self) -> bool {
        false
    }
}

/// Decoded records as comma separated text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormat;

impl LogFormat for TextFormat {
    type Entry = [Value];

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn write_header(&self, cfg: &LogConfig, out: &mut dyn Write) -> io::Result<()> {
        if cfg.variable_names.is_empty() {
            return Ok(());
        }
        writeln!(out, "time, {}", cfg.variable_names.join(", "))?;
        writeln!(out, "{TIME_UNITS}, {}", cfg.variable_units.join(", "))
    }

    fn write_entry(
        &self,
        cfg: &LogConfig,
        out: &mut dyn Write,
        entry: &[Value],
        timestamp: Option<DateTime<Utc>>,
    ) -> io::Result<()> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let columns: Vec<String> = entry
            .iter()
            .enumerate()
            .map(|(i, value)| match cfg.variable_precision.get(i) {
                Some(Some(precision)) => precision.format(value),
                _ => value.to_string(),
            })
            .collect();
        writeln!(out, "{}, {}", timestamp.format(TIME_FORMAT), columns.join(", "))
    }
}

/// Raw frames, either as bytes with a timestamp trailer or as text lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    Binary,
    Text,
}

impl LogFormat for RawFormat {
    type Entry = [u8];

    fn extension(&self) -> &'static str {
        match self {
            RawFormat::Binary => "bin",
            RawFormat::Text => "raw",
        }
    }

    fn write_header(&self, _cfg: &LogConfig, out: &mut dyn Write) -> io::Result<()> {
        match self {
            RawFormat::Binary => Ok(()),
            RawFormat::Text => {
                writeln!(out, "time, packet")?;
                writeln!(out, "{TIME_UNITS}, utf-8")
            }
        }
    }

    fn write_entry(
        &self,
        _cfg: &LogConfig,
        out: &mut dyn Write,
        entry: &[u8],
        timestamp: Option<DateTime<Utc>>,
    ) -> io::Result<()> {
        match (self, timestamp) {
            (RawFormat::Binary, Some(ts)) => {
                out.write_all(entry)?;
                out.write_all(&epoch_seconds(ts).to_be_bytes())
            }
            (RawFormat::Binary, None) => out.write_all(entry),
            (RawFormat::Text, ts) => {
                let ts = ts.unwrap_or_else(Utc::now);
                let text = String::from_utf8_lossy(entry);
                let line = text.trim_end_matches(['\r', '\n']);
                writeln!(out, "{}, {line}", ts.format(TIME_FORMAT))
            }
        }
    }

    fn accepts_untimed(&self) -> bool {
        matches!(self, RawFormat::Binary)
    }
}

/// Seconds since the Unix epoch with sub-second resolution.
pub fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

#[derive(Debug)]
struct OpenFile {
    path: PathBuf,
    opened_at: DateTime<Utc>,
    writer: BufWriter<File>,
}

/// Rotating writer for one log stream.
#[derive(Debug)]
pub struct Logger<F: LogFormat> {
    format: F,
    cfg: LogConfig,
    file: Option<OpenFile>,
    active: bool,
}

impl<F: LogFormat> Logger<F> {
    pub fn new(format: F, cfg: LogConfig) -> Self {
        Self {
            format,
            cfg,
            file: None,
            active: false,
        }
    }

    /// Enable writing. The first file is created by the next write.
    pub fn start(&mut self) {
        self.active = true;
    }

    /// Close the current file and disable writing.
    pub fn stop(&mut self) -> Result<(), LogIoError> {
        self.active = false;
        self.close()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn accepts_untimed(&self) -> bool {
        self.format.accepts_untimed()
    }

    /// Replace the configuration. An open file is closed, the next write opens one
    /// with the new schema.
    pub fn set_config(&mut self, cfg: LogConfig) -> Result<(), LogIoError> {
        self.close()?;
        self.cfg = cfg;
        Ok(())
    }

    pub fn config(&self) -> &LogConfig {
        &self.cfg
    }

    /// Path of the open file.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    /// Name of the open file, or the filename template when none is open.
    pub fn filename(&self) -> String {
        match self.path().and_then(Path::file_name) {
            Some(name) => name.to_string_lossy().into_owned(),
            None => format!("{}_<date>_<time>.{}", self.cfg.prefix, self.format.extension()),
        }
    }

    /// Append one entry, rotating first if needed.
    ///
    /// Returns `true` when a new file was opened for this entry. Writes while the
    /// logger is stopped are ignored.
    pub fn write(
        &mut self,
        entry: &F::Entry,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<bool, LogIoError> {
        if !self.active {
            return Ok(false);
        }
        let opened = match timestamp {
            Some(ts) => self.rotate_if_needed(ts)?,
            None if self.format.accepts_untimed() => {
                if self.file.is_none() {
                    self.open(Utc::now())?;
                    true
                } else {
                    false
                }
            }
            None => self.rotate_if_needed(Utc::now())?,
        };

        let Some(file) = self.file.as_mut() else {
            return Ok(opened);
        };
        self.format
            .write_entry(&self.cfg, &mut file.writer, entry, timestamp)
            .map_err(|source| LogIoError::Write {
                path: file.path.clone(),
                source,
            })?;
        Ok(opened)
    }

    fn rotate_if_needed(&mut self, ts: DateTime<Utc>) -> Result<bool, LogIoError> {
        let rotate = match &self.file {
            None => true,
            Some(file) => {
                let elapsed = ts.signed_duration_since(file.opened_at);
                file.opened_at.date_naive() != ts.date_naive()
                    || (!self.cfg.length.is_zero()
                        && elapsed.to_std().is_ok_and(|e| e >= self.cfg.length))
            }
        };
        if rotate {
            self.close()?;
            self.open(ts)?;
        }
        Ok(rotate)
    }

    fn open(&mut self, ts: DateTime<Utc>) -> Result<(), LogIoError> {
        if !self.cfg.path.as_os_str().is_empty() && !self.cfg.path.exists() {
            fs::create_dir_all(&self.cfg.path).map_err(|source| LogIoError::Create {
                path: self.cfg.path.clone(),
                source,
            })?;
        }
        let path = self.next_path(ts);
        let file = File::create(&path).map_err(|source| LogIoError::Create {
            path: path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        self.format
            .write_header(&self.cfg, &mut writer)
            .map_err(|source| LogIoError::Write {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "Opened log file");
        self.file = Some(OpenFile {
            path,
            opened_at: ts,
            writer,
        });
        Ok(())
    }

    /// First free `<prefix>_<YYYYMMDD>_<HHMMSS>[_n].<ext>` in the log directory.
    fn next_path(&self, ts: DateTime<Utc>) -> PathBuf {
        let stem = format!("{}_{}", self.cfg.prefix, ts.format(FILENAME_TIME_FORMAT));
        let ext = self.format.extension();
        let mut path = self.cfg.path.join(format!("{stem}.{ext}"));
        let mut suffix = 0u32;
        while path.exists() {
            path = self.cfg.path.join(format!("{stem}_{suffix}.{ext}"));
            suffix += 1;
        }
        path
    }

    /// Flush and close the open file, if any.
    pub fn close(&mut self) -> Result<(), LogIoError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let result = file
            .writer
            .flush()
            .and_then(|()| file.writer.get_ref().sync_all());
        debug!(path = %file.path.display(), "Closed log file");
        result.map_err(|source| LogIoError::Write {
            path: file.path,
            source,
        })
    }
}

impl<F: LogFormat> Drop for Logger<F> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
