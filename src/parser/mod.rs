//! Frame decoders.
//!
//! Every instrument variant supplies a [`Parser`] turning a frame payload into a
//! [`Record`] aligned with the configured `variable_names`. Decoding never
//! panics on malformed input; it returns a [`ParseError`] and the reader moves on
//! to the next frame.

pub mod binary;
pub mod nmea;

use crate::config::{Framing, InstrumentConfig, InstrumentKind, Variable, VariableType};
use crate::core::{Record, Value};
use crate::error::ParseError;

pub use binary::ChecksummedBinaryParser;
pub use nmea::NmeaParser;

/// Decodes one frame payload.
pub trait Parser: Send {
    fn parse(&mut self, frame: &[u8]) -> Result<Record, ParseError>;
}

/// Build the parser of the configured variant.
pub fn for_config(cfg: &InstrumentConfig) -> Box<dyn Parser> {
    match (cfg.kind, &cfg.framing) {
        (InstrumentKind::ChecksummedBinary, Framing::Registered { registration, checksum_pad, frame_length }) => {
            Box::new(ChecksummedBinaryParser::new(
                registration.clone(),
                *frame_length,
                *checksum_pad,
                cfg.variables.iter().map(|v| v.kind).collect(),
            ))
        }
        (InstrumentKind::SentenceBased, _) => Box::new(NmeaParser::new(&cfg.variables)),
        (_, Framing::Terminated { separator, .. }) => {
            Box::new(GenericParser::new(separator.clone(), &cfg.variables))
        }
        // Validation pairs every kind with its framing.
        _ => Box::new(GenericParser::new(",".into(), &cfg.variables)),
    }
}

/// Convert a text field according to the declared type.
///
/// Absent or unparsable numbers become [`Value::MISSING`]; absent text becomes `"nan"`.
pub fn convert_text(kind: VariableType, field: Option<&str>) -> Value {
    let field = field.map(str::trim);
    match kind {
        VariableType::Str => Value::Text(field.unwrap_or("nan").to_string()),
        VariableType::Bool => match field {
            Some(f) if f.eq_ignore_ascii_case("true") || f == "1" => Value::Bool(true),
            Some(f) if f.eq_ignore_ascii_case("false") || f == "0" => Value::Bool(false),
            Some(f) => Value::Text(f.to_string()),
            None => Value::Text("nan".into()),
        },
        VariableType::Int => match field.filter(|f| !f.is_empty()) {
            Some(f) => f
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or(Value::MISSING),
            None => Value::MISSING,
        },
        _ => match field.and_then(|f| f.parse::<f64>().ok()) {
            Some(v) => Value::Float(v),
            None => Value::MISSING,
        },
    }
}

/// Separator-delimited text columns.
#[derive(Debug, Clone)]
pub struct GenericParser {
    separator: String,
    columns: Vec<(usize, VariableType)>,
}

impl GenericParser {
    pub fn new(separator: String, variables: &[Variable]) -> Self {
        let columns = variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.column.unwrap_or(i), v.kind))
            .collect();
        Self { separator, columns }
    }
}

impl Parser for GenericParser {
    fn parse(&mut self, frame: &[u8]) -> Result<Record, ParseError> {
        let text = String::from_utf8_lossy(frame);
        let line = text.trim();
        if line.is_empty() {
            return Err(ParseError::Malformed("empty frame".into()));
        }
        let fields: Vec<&str> = line.split(self.separator.as_str()).collect();
        let values = self
            .columns
            .iter()
            .map(|&(column, kind)| convert_text(kind, fields.get(column).copied()))
            .collect();
        Ok(Record::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, kind: VariableType, column: usize) -> Variable {
        Variable {
            name: name.into(),
            unit: String::new(),
            kind,
            precision: None,
            column: Some(column),
        }
    }

    #[test]
    fn test_generic_picks_columns_by_type() {
        let vars = [
            var("id", VariableType::Str, 0),
            var("temp", VariableType::Float, 2),
            var("count", VariableType::Int, 1),
        ];
        let mut parser = GenericParser::new(",".into(), &vars);
        let record = parser.parse(b" SN12,42,21.5 ").unwrap();
        assert_eq!(
            record.values,
            vec![Value::Text("SN12".into()), Value::Float(21.5), Value::Int(42)]
        );
    }

    #[test]
    fn test_generic_missing_numbers_are_nan() {
        let vars = [
            var("a", VariableType::Float, 0),
            var("b", VariableType::Int, 1),
            var("c", VariableType::Float, 5),
        ];
        let mut parser = GenericParser::new("\t".into(), &vars);
        let record = parser.parse(b"oops\t\t").unwrap();
        assert_eq!(record.len(), 3);
        assert!(record.values.iter().all(Value::is_missing));
    }

    #[test]
    fn test_generic_empty_frame() {
        let mut parser = GenericParser::new(",".into(), &[var("a", VariableType::Int, 0)]);
        assert!(matches!(parser.parse(b"  "), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_convert_bool() {
        assert_eq!(convert_text(VariableType::Bool, Some("True")), Value::Bool(true));
        assert_eq!(convert_text(VariableType::Bool, Some("0")), Value::Bool(false));
        assert_eq!(convert_text(VariableType::Str, None), Value::Text("nan".into()));
    }
}
