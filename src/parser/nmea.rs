//! NMEA 0183 sentence decoder.
//!
//! Variables are resolved by field name within the sentence that carries them;
//! a variable absent from the current sentence decodes as missing. `latitude`
//! and `longitude` are derived decimal degrees from the `lat`/`lat_dir` and
//! `lon`/`lon_dir` fields.

use super::{convert_text, Parser};
use crate::config::{Variable, VariableType};
use crate::core::{Record, Value};
use crate::error::ParseError;
use std::collections::HashSet;
use tracing::warn;

/// Field names of the supported sentence types, in wire order.
fn sentence_fields(kind: &str) -> Option<&'static [&'static str]> {
    let fields: &'static [&'static str] = match kind {
        "GGA" => &[
            "timestamp",
            "lat",
            "lat_dir",
            "lon",
            "lon_dir",
            "gps_qual",
            "num_sats",
            "horizontal_dil",
            "altitude",
            "altitude_units",
            "geo_sep",
            "geo_sep_units",
            "age_gps_data",
            "ref_station_id",
        ],
        "GLL" => &["lat", "lat_dir", "lon", "lon_dir", "timestamp", "status", "faa_mode"],
        "RMC" => &[
            "timestamp",
            "status",
            "lat",
            "lat_dir",
            "lon",
            "lon_dir",
            "spd_over_grnd",
            "true_course",
            "datestamp",
            "mag_variation",
            "mag_var_dir",
            "mode_indicator",
        ],
        "VTG" => &[
            "true_track",
            "true_track_sym",
            "mag_track",
            "mag_track_sym",
            "spd_over_grnd_kts",
            "spd_over_grnd_kts_sym",
            "spd_over_grnd_kmph",
            "spd_over_grnd_kmph_sym",
            "faa_mode",
        ],
        "HDT" => &["heading", "hdg_true"],
        "ZDA" => &["timestamp", "day", "month", "year", "local_zone", "local_zone_minutes"],
        "GSA" => &[
            "mode",
            "mode_fix_type",
            "sv_id01",
            "sv_id02",
            "sv_id03",
            "sv_id04",
            "sv_id05",
            "sv_id06",
            "sv_id07",
            "sv_id08",
            "sv_id09",
            "sv_id10",
            "sv_id11",
            "sv_id12",
            "pdop",
            "hdop",
            "vdop",
        ],
        _ => return None,
    };
    Some(fields)
}

/// `ddmm.mmmm` / `dddmm.mmmm` with hemisphere to signed decimal degrees.
fn decimal_degrees(value: &str, hemisphere: &str) -> Option<f64> {
    let raw: f64 = value.trim().parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let dd = degrees + minutes / 60.0;
    match hemisphere.trim() {
        "S" | "W" => Some(-dd),
        "N" | "E" => Some(dd),
        _ => None,
    }
}

/// Split `$<body>*hh` and verify the XOR checksum when one is present.
fn checked_body(sentence: &str) -> Result<&str, ParseError> {
    let body = sentence
        .strip_prefix(['$', '!'])
        .ok_or_else(|| ParseError::Malformed(format!("not a sentence: {sentence}")))?;
    let Some((body, checksum)) = body.split_once('*') else {
        return Ok(body);
    };
    let expected = u8::from_str_radix(checksum.trim(), 16)
        .map_err(|_| ParseError::Malformed(format!("bad checksum field '{checksum}'")))?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual != expected {
        return Err(ParseError::InvalidChecksum);
    }
    Ok(body)
}

#[derive(Debug, Clone)]
pub struct NmeaParser {
    variables: Vec<(String, VariableType)>,
    unsupported_seen: HashSet<String>,
}

impl NmeaParser {
    pub fn new(variables: &[Variable]) -> Self {
        Self {
            variables: variables.iter().map(|v| (v.name.clone(), v.kind)).collect(),
            unsupported_seen: HashSet::new(),
        }
    }

    fn lookup(names: &[&str], values: &[&str], name: &str) -> Option<String> {
        let field = |n: &str| {
            names
                .iter()
                .position(|candidate| *candidate == n)
                .and_then(|i| values.get(i).copied())
        };
        match name {
            "latitude" => decimal_degrees(field("lat")?, field("lat_dir")?).map(|v| v.to_string()),
            "longitude" => decimal_degrees(field("lon")?, field("lon_dir")?).map(|v| v.to_string()),
            other => field(other).map(str::to_string),
        }
    }
}

impl Parser for NmeaParser {
    fn parse(&mut self, frame: &[u8]) -> Result<Record, ParseError> {
        let text = String::from_utf8_lossy(frame);
        let body = checked_body(text.trim())?;
        let mut parts = body.split(',');
        let address = parts.next().unwrap_or_default();
        if address.len() < 3 || !address.is_ascii() {
            return Err(ParseError::Malformed(format!("bad address field '{address}'")));
        }
        let kind = &address[address.len() - 3..];
        let Some(names) = sentence_fields(kind) else {
            let repeated = !self.unsupported_seen.insert(address.to_string());
            if !repeated {
                warn!(sentence = address, "Unsupported NMEA sentence");
            }
            return Err(ParseError::Unsupported {
                sentence: address.to_string(),
                repeated,
            });
        };
        let values: Vec<&str> = parts.collect();

        let record = self
            .variables
            .iter()
            .map(|(name, kind)| {
                let field = Self::lookup(names, &values, name);
                match (field.as_deref(), kind) {
                    // Integers such as "08" or "1.0" in some receivers.
                    (Some(f), VariableType::Int) if f.trim().parse::<i64>().is_err() => f
                        .trim()
                        .parse::<f64>()
                        .map(|v| Value::Int(v.trunc() as i64))
                        .unwrap_or(Value::MISSING),
                    (f, kind) => convert_text(*kind, f),
                }
            })
            .collect();
        Ok(Record::new(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, kind: VariableType) -> Variable {
        Variable {
            name: name.into(),
            unit: String::new(),
            kind,
            precision: None,
            column: None,
        }
    }

    fn parser() -> NmeaParser {
        NmeaParser::new(&[
            var("timestamp", VariableType::Str),
            var("latitude", VariableType::Float),
            var("longitude", VariableType::Float),
            var("num_sats", VariableType::Int),
            var("heading", VariableType::Float),
        ])
    }

    fn with_checksum(body: &str) -> String {
        let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${body}*{sum:02X}")
    }

    #[test]
    fn test_gga_fields_and_derived_position() {
        let sentence = with_checksum("GPGGA,123519,4807.038,N,01131.000,W,1,08,0.9,545.4,M,46.9,M,,");
        let record = parser().parse(sentence.as_bytes()).unwrap();
        assert_eq!(record.get(0), Some(&Value::Text("123519".into())));
        let lat = record.get(1).and_then(Value::as_f64).unwrap();
        let lon = record.get(2).and_then(Value::as_f64).unwrap();
        assert!((lat - 48.1173).abs() < 1e-9);
        assert!((lon + 11.516_666_666).abs() < 1e-6);
        assert_eq!(record.get(3), Some(&Value::Int(8)));
        // Not carried by GGA.
        assert!(record.get(4).unwrap().is_missing());
    }

    #[test]
    fn test_hdt_leaves_position_missing() {
        let record = parser().parse(with_checksum("HEHDT,274.07,T").as_bytes()).unwrap();
        assert_eq!(record.get(4), Some(&Value::Float(274.07)));
        assert!(record.get(1).unwrap().is_missing());
        assert_eq!(record.get(0), Some(&Value::Text("nan".into())));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut good = with_checksum("HEHDT,274.07,T");
        assert!(parser().parse(good.as_bytes()).is_ok());
        good.replace_range(7..8, "5");
        assert_eq!(parser().parse(good.as_bytes()), Err(ParseError::InvalidChecksum));
    }

    #[test]
    fn test_sentence_without_checksum_accepted() {
        assert!(parser().parse(b"$HEHDT,1.5,T").is_ok());
    }

    #[test]
    fn test_unsupported_reported_once() {
        let mut p = parser();
        let gsv = with_checksum("GPGSV,3,1,11,03,03,111,00");
        assert_eq!(
            p.parse(gsv.as_bytes()),
            Err(ParseError::Unsupported { sentence: "GPGSV".into(), repeated: false })
        );
        assert_eq!(
            p.parse(gsv.as_bytes()),
            Err(ParseError::Unsupported { sentence: "GPGSV".into(), repeated: true })
        );
        let other = with_checksum("GPXTE,A,A,0.67,L,N");
        assert!(matches!(
            p.parse(other.as_bytes()),
            Err(ParseError::Unsupported { repeated: false, .. })
        ));
    }

    #[test]
    fn test_malformed_sentence() {
        assert!(matches!(parser().parse(b"GPGGA,1"), Err(ParseError::Malformed(_))));
        assert!(matches!(parser().parse(b"$GP*ZZ"), Err(ParseError::Malformed(_))));
    }
}
