//! Instrument configuration.
//!
//! Configuration is loaded into a [`RawConfig`] (every field optional) from a TOML
//! file merged with `RUST_ACQ_`-prefixed environment variables, then validated into
//! an immutable [`InstrumentConfig`]. Validation enforces the variant's
//! `REQUIRED_CFG_FIELDS`; a missing field is a construction error, never a runtime
//! fault. Optional fields fall back to documented defaults.
//!
//! # Example
//! ```no_run
//! use rust_acq::config::{InstrumentConfig, RawConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = RawConfig::load_from("config/nmea.toml")?;
//! let cfg = InstrumentConfig::try_from(raw)?;
//! println!("{} {} ({})", cfg.model, cfg.serial_number, cfg.kind);
//! # Ok(())
//! # }
//! ```

use crate::data::precision::Precision;
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fields every instrument variant requires.
pub const COMMON_REQUIRED_CFG_FIELDS: &[&str] = &[
    "module",
    "model",
    "serial_number",
    "log_path",
    "log_raw",
    "log_products",
    "variable_names",
    "variable_units",
    "variable_types",
    "variable_precision",
];

/// ACS-style registration bytes.
pub const DEFAULT_REGISTRATION: [u8; 4] = [0xFF, 0x00, 0xFF, 0x00];
/// Samples kept per channel for the live view.
pub const DEFAULT_BUFFER_LENGTH: usize = 240;
/// Log rotation length in minutes.
pub const DEFAULT_LOG_LENGTH_MIN: u64 = 60;
/// Silence window before the data timeout alarm, in seconds.
pub const DEFAULT_DATA_TIMEOUT_S: u64 = 60;
pub const DEFAULT_MAX_REFRESH_RATE_HZ: f64 = 4.0;
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 2048;

/// Instrument variant; selects the synchronizer, parser and required fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Terminated text lines split into columns.
    Generic,
    /// Binary frames located by registration bytes and protected by a checksum (e.g. ACS).
    #[serde(alias = "acs", alias = "binary")]
    ChecksummedBinary,
    /// NMEA 0183 sentences.
    #[serde(alias = "nmea")]
    SentenceBased,
}

impl InstrumentKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstrumentKind::Generic => "generic",
            InstrumentKind::ChecksummedBinary => "checksummed_binary",
            InstrumentKind::SentenceBased => "nmea",
        }
    }

    /// `REQUIRED_CFG_FIELDS` beyond [`COMMON_REQUIRED_CFG_FIELDS`].
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            InstrumentKind::Generic => &["terminator", "separator", "variable_columns"],
            InstrumentKind::ChecksummedBinary => &["frame_length"],
            InstrumentKind::SentenceBased => &[],
        }
    }

    /// Default serial baud rate and read timeout for this kind of instrument.
    pub fn default_serial(&self) -> (u32, Duration) {
        match self {
            InstrumentKind::Generic => (19200, Duration::from_secs(2)),
            InstrumentKind::ChecksummedBinary => (115_200, Duration::from_secs(1)),
            InstrumentKind::SentenceBased => (4800, Duration::from_secs(10)),
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a variable.
///
/// Text variants are used by line based instruments, the fixed width big-endian
/// variants by binary instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Int,
    Float,
    Str,
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl VariableType {
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            VariableType::Int | VariableType::Float | VariableType::Str | VariableType::Bool
        )
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, VariableType::Str | VariableType::Bool)
    }

    /// Size in bytes of a binary field, `None` for text types.
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            VariableType::U8 | VariableType::I8 => Some(1),
            VariableType::U16 | VariableType::I16 => Some(2),
            VariableType::U32 | VariableType::I32 | VariableType::F32 => Some(4),
            VariableType::F64 => Some(8),
            _ => None,
        }
    }
}

/// Configuration as loaded from storage: nothing is validated yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub module: Option<InstrumentKind>,
    pub model: Option<String>,
    pub serial_number: Option<String>,

    pub log_path: Option<PathBuf>,
    pub log_raw: Option<bool>,
    pub log_products: Option<bool>,
    pub log_prefix: Option<String>,
    /// Rotation length in minutes.
    pub log_length: Option<u64>,

    pub variable_names: Option<Vec<String>>,
    pub variable_units: Option<Vec<String>>,
    pub variable_types: Option<Vec<VariableType>>,
    pub variable_precision: Option<Vec<String>>,
    pub variable_columns: Option<Vec<usize>>,

    pub terminator: Option<String>,
    pub separator: Option<String>,
    pub registration: Option<Vec<u8>>,
    pub frame_length: Option<usize>,
    pub checksum_pad: Option<usize>,
    pub max_frame_length: Option<usize>,

    pub active_channels: Option<Vec<String>>,
    pub aux_variables: Option<Vec<String>>,
    /// Alarm silence window in seconds.
    pub data_timeout: Option<u64>,
    pub buffer_length: Option<usize>,
    pub max_refresh_rate: Option<f64>,
}

impl RawConfig {
    /// Load configuration from a TOML file, with `RUST_ACQ_*` environment overrides.
    ///
    /// Example: `RUST_ACQ_LOG_PATH=/data` overrides `log_path`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_ACQ_"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Parse configuration from an in-memory TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    fn has(&self, field: &str) -> bool {
        match field {
            "module" => self.module.is_some(),
            "model" => self.model.is_some(),
            "serial_number" => self.serial_number.is_some(),
            "log_path" => self.log_path.is_some(),
            "log_raw" => self.log_raw.is_some(),
            "log_products" => self.log_products.is_some(),
            "variable_names" => self.variable_names.is_some(),
            "variable_units" => self.variable_units.is_some(),
            "variable_types" => self.variable_types.is_some(),
            "variable_precision" => self.variable_precision.is_some(),
            "variable_columns" => self.variable_columns.is_some(),
            "terminator" => self.terminator.is_some(),
            "separator" => self.separator.is_some(),
            "frame_length" => self.frame_length.is_some(),
            _ => false,
        }
    }

    /// Names of the required fields absent for the configured variant.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let Some(kind) = self.module else {
            return vec!["module"];
        };
        COMMON_REQUIRED_CFG_FIELDS
            .iter()
            .chain(kind.required_fields())
            .copied()
            .filter(|field| !self.has(field))
            .collect()
    }
}

/// One configured variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub unit: String,
    pub kind: VariableType,
    pub precision: Option<Precision>,
    /// Column index for separator-delimited instruments.
    pub column: Option<usize>,
}

/// Framing parameters of the configured variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    Terminated { terminator: Vec<u8>, separator: String },
    Registered { registration: Vec<u8>, frame_length: usize, checksum_pad: usize },
    Sentences,
}

/// Validated, immutable instrument configuration.
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    pub kind: InstrumentKind,
    pub model: String,
    pub serial_number: String,
    pub variables: Vec<Variable>,
    pub framing: Framing,
    pub max_frame_length: usize,

    pub log_path: PathBuf,
    pub log_prefix: String,
    pub log_length: Duration,
    pub log_raw: bool,
    pub log_products: bool,

    pub active_channels: Option<Vec<String>>,
    pub aux_variables: Vec<String>,
    pub data_timeout: Duration,
    pub buffer_length: usize,
    pub max_refresh_rate: f64,
}

impl InstrumentConfig {
    /// `<model> <serial_number>`, used in thread names and log messages.
    pub fn name(&self) -> String {
        format!("{} {}", self.model, self.serial_number)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    /// Variables that can be plotted.
    pub fn numeric_variables(&self) -> impl Iterator<Item = (usize, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind.is_numeric())
    }
}

impl TryFrom<RawConfig> for InstrumentConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let missing = raw.missing_fields();
        if let Some(&field) = missing.first() {
            let module = raw.module.map_or("unknown", |k| k.name());
            return Err(ConfigError::Missing { module, field });
        }
        let RawConfig {
            module,
            model,
            serial_number,
            log_path,
            log_raw,
            log_products,
            log_prefix,
            log_length,
            variable_names,
            variable_units,
            variable_types,
            variable_precision,
            variable_columns,
            terminator,
            separator,
            registration,
            frame_length,
            checksum_pad,
            max_frame_length,
            active_channels,
            aux_variables,
            data_timeout,
            buffer_length,
            max_refresh_rate,
        } = raw;

        // Presence was checked above; the defaults below are unreachable.
        let kind = module.unwrap_or(InstrumentKind::Generic);
        let model = model.unwrap_or_default();
        let serial_number = serial_number.unwrap_or_default();
        let names = variable_names.unwrap_or_default();
        let units = variable_units.unwrap_or_default();
        let types = variable_types.unwrap_or_default();
        let precision = variable_precision.unwrap_or_default();

        check_len("variable_units", units.len(), names.len())?;
        check_len("variable_types", types.len(), names.len())?;
        if !precision.is_empty() {
            check_len("variable_precision", precision.len(), names.len())?;
        }
        let columns = match (kind, variable_columns) {
            (InstrumentKind::Generic, Some(columns)) => {
                check_len("variable_columns", columns.len(), names.len())?;
                columns.into_iter().map(Some).collect()
            }
            _ => vec![None; names.len()],
        };

        let binary = kind == InstrumentKind::ChecksummedBinary;
        if let Some(bad) = types.iter().find(|t| t.is_text() == binary) {
            return Err(ConfigError::Invalid(format!(
                "variable type {bad:?} is not supported by {kind} instruments"
            )));
        }

        let mut variables = Vec::with_capacity(names.len());
        for (i, ((name, unit), ty)) in names.into_iter().zip(units).zip(types).enumerate() {
            let precision = match precision.get(i) {
                Some(spec) => Some(Precision::parse(spec)?),
                None => None,
            };
            variables.push(Variable {
                name,
                unit,
                kind: ty,
                precision,
                column: columns[i],
            });
        }

        let framing = match kind {
            InstrumentKind::Generic => {
                let terminator = terminator.unwrap_or_default().into_bytes();
                if terminator.is_empty() {
                    return Err(ConfigError::Invalid("terminator must not be empty".into()));
                }
                let separator = separator.unwrap_or_default();
                if separator.is_empty() {
                    return Err(ConfigError::Invalid("separator must not be empty".into()));
                }
                Framing::Terminated { terminator, separator }
            }
            InstrumentKind::ChecksummedBinary => {
                let registration = registration.unwrap_or_else(|| DEFAULT_REGISTRATION.to_vec());
                if registration.is_empty() {
                    return Err(ConfigError::Invalid("registration must not be empty".into()));
                }
                let frame_length = frame_length.unwrap_or_default();
                let checksum_pad = checksum_pad.unwrap_or(1);
                let fields: usize = variables.iter().filter_map(|v| v.kind.byte_width()).sum();
                if fields + 2 + checksum_pad > frame_length {
                    return Err(ConfigError::Invalid(format!(
                        "frame_length {frame_length} cannot hold {fields} bytes of fields, \
                         a 2 byte checksum and {checksum_pad} pad byte(s)"
                    )));
                }
                Framing::Registered { registration, frame_length, checksum_pad }
            }
            InstrumentKind::SentenceBased => Framing::Sentences,
        };

        if let Some(active) = &active_channels {
            for name in active {
                if !variables.iter().any(|v| &v.name == name && v.kind.is_numeric()) {
                    return Err(ConfigError::Invalid(format!(
                        "active channel '{name}' is not a numeric variable"
                    )));
                }
            }
        }
        let aux_variables = aux_variables.unwrap_or_default();
        if let Some(name) = aux_variables.iter().find(|n| !variables.iter().any(|v| &v.name == *n)) {
            return Err(ConfigError::Invalid(format!("aux variable '{name}' is not a variable")));
        }

        let buffer_length = buffer_length.unwrap_or(DEFAULT_BUFFER_LENGTH);
        if buffer_length == 0 {
            return Err(ConfigError::Invalid("buffer_length must be positive".into()));
        }
        let max_refresh_rate = max_refresh_rate.unwrap_or(DEFAULT_MAX_REFRESH_RATE_HZ);
        if max_refresh_rate <= 0.0 || max_refresh_rate.is_nan() {
            return Err(ConfigError::Invalid("max_refresh_rate must be positive".into()));
        }

        Ok(Self {
            kind,
            log_prefix: log_prefix.unwrap_or_else(|| format!("{model}{serial_number}")),
            model,
            serial_number,
            variables,
            framing,
            max_frame_length: max_frame_length.unwrap_or(DEFAULT_MAX_FRAME_LENGTH),
            log_path: log_path.unwrap_or_default(),
            log_length: Duration::from_secs(log_length.unwrap_or(DEFAULT_LOG_LENGTH_MIN) * 60),
            log_raw: log_raw.unwrap_or(false),
            log_products: log_products.unwrap_or(false),
            active_channels,
            aux_variables,
            data_timeout: Duration::from_secs(data_timeout.unwrap_or(DEFAULT_DATA_TIMEOUT_S)),
            buffer_length,
            max_refresh_rate,
        })
    }
}

fn check_len(field: &str, len: usize, expected: usize) -> Result<(), ConfigError> {
    if len == expected {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} has {len} entries, variable_names has {expected}"
        )))
    }
}
