//! printf-style column formats for text logs (`%d`, `%.3f`, `%s`, ...).
//!
//! Instrument configuration files describe per-column precision with the same
//! specifiers the instrument vendors document, e.g. `["%d", "%.2f", "%s"]`. The
//! specifier is parsed once at configuration time and applied to every record.

use crate::core::Value;
use crate::error::ConfigError;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Conversion {
    Int,
    Fixed,
    Exp { upper: bool },
    General,
    Str,
    Hex { upper: bool },
}

/// A parsed column format, including any literal text around the specifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Precision {
    source: String,
    prefix: String,
    suffix: String,
    left_align: bool,
    zero_pad: bool,
    plus_sign: bool,
    width: usize,
    precision: Option<usize>,
    conversion: Conversion,
}

impl Precision {
    /// Parse a specifier such as `%.3f`, `%5d` or `%s`.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = |why: &str| ConfigError::Invalid(format!("precision '{spec}': {why}"));

        let start = find_specifier(spec).ok_or_else(|| invalid("no % conversion"))?;
        let prefix = spec[..start].replace("%%", "%");
        let mut chars = spec[start + 1..].char_indices().peekable();

        let (mut left_align, mut zero_pad, mut plus_sign) = (false, false, false);
        while let Some(&(_, c)) = chars.peek() {
            match c {
                '-' => left_align = true,
                '0' => zero_pad = true,
                '+' => plus_sign = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }

        let mut width = 0usize;
        while let Some(&(_, c)) = chars.peek() {
            let Some(d) = c.to_digit(10) else { break };
            width = width * 10 + d as usize;
            chars.next();
        }

        let mut precision = None;
        if matches!(chars.peek(), Some(&(_, '.'))) {
            chars.next();
            let mut p = 0usize;
            while let Some(&(_, c)) = chars.peek() {
                let Some(d) = c.to_digit(10) else { break };
                p = p * 10 + d as usize;
                chars.next();
            }
            precision = Some(p);
        }

        let (offset, conv) = chars.next().ok_or_else(|| invalid("missing conversion"))?;
        let conversion = match conv {
            'd' | 'i' | 'u' => Conversion::Int,
            'f' | 'F' => Conversion::Fixed,
            'e' => Conversion::Exp { upper: false },
            'E' => Conversion::Exp { upper: true },
            'g' | 'G' => Conversion::General,
            's' => Conversion::Str,
            'x' => Conversion::Hex { upper: false },
            'X' => Conversion::Hex { upper: true },
            other => return Err(invalid(&format!("unsupported conversion '{other}'"))),
        };
        let rest = &spec[start + 1 + offset + conv.len_utf8()..];
        if find_specifier(rest).is_some() {
            return Err(invalid("more than one conversion"));
        }
        let suffix = rest.replace("%%", "%");

        Ok(Self {
            source: spec.to_string(),
            prefix,
            suffix,
            left_align,
            zero_pad,
            plus_sign,
            width,
            precision,
            conversion,
        })
    }

    /// Render one value. NaN renders as `nan` whatever the conversion.
    pub fn format(&self, value: &Value) -> String {
        let body = match (self.conversion, value) {
            (_, v) if v.is_missing() => "nan".to_string(),
            (Conversion::Str, v) => match self.precision {
                Some(p) => v.to_string().chars().take(p).collect(),
                None => v.to_string(),
            },
            (Conversion::Int, Value::Int(i)) => self.signed(*i as f64, i.to_string()),
            (Conversion::Int, Value::Float(f)) => self.signed(*f, format!("{}", f.trunc() as i64)),
            (Conversion::Int, Value::Bool(b)) => i64::from(*b).to_string(),
            (Conversion::Hex { upper }, Value::Int(i)) => {
                let magnitude = i.unsigned_abs();
                let digits = if upper {
                    format!("{magnitude:X}")
                } else {
                    format!("{magnitude:x}")
                };
                let text = if *i < 0 { format!("-{digits}") } else { digits };
                self.signed(*i as f64, text)
            }
            (Conversion::Fixed, v) | (Conversion::Exp { .. }, v) | (Conversion::General, v) => {
                match v.as_f64() {
                    Some(f) => self.float(f),
                    None => v.to_string(),
                }
            }
            (_, v) => v.to_string(),
        };
        format!("{}{}{}", self.prefix, self.pad(body), self.suffix)
    }

    fn float(&self, f: f64) -> String {
        if f.is_infinite() {
            return if f > 0.0 { "inf".into() } else { "-inf".into() };
        }
        let p = self.precision.unwrap_or(6);
        let text = match self.conversion {
            Conversion::Exp { upper } => c_exponent(f, p, upper),
            Conversion::General => match self.precision {
                Some(p) => format!("{}", round_significant(f, p.max(1))),
                None => format!("{f}"),
            },
            _ => format!("{f:.p$}"),
        };
        self.signed(f, text)
    }

    fn signed(&self, v: f64, text: String) -> String {
        if self.plus_sign && v >= 0.0 {
            format!("+{text}")
        } else {
            text
        }
    }

    fn pad(&self, body: String) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        let numeric = !matches!(self.conversion, Conversion::Str);
        if self.left_align {
            format!("{body}{}", " ".repeat(fill))
        } else if self.zero_pad && numeric && body != "nan" {
            let (sign, digits) = match body.strip_prefix(['-', '+']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{body}", " ".repeat(fill))
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Byte offset of the first `%` that is not part of a `%%` escape.
fn find_specifier(spec: &str) -> Option<usize> {
    let bytes = spec.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if bytes.get(i + 1) == Some(&b'%') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// `1.5e2` -> `1.500000e+02`, the C library layout.
fn c_exponent(f: f64, precision: usize, upper: bool) -> String {
    let rust = format!("{f:.precision$e}");
    let (mantissa, exp) = rust.split_once('e').unwrap_or((rust.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{:02}", exp.abs())
}

fn round_significant(f: f64, digits: usize) -> f64 {
    if f == 0.0 {
        return 0.0;
    }
    let magnitude = f.abs().log10().floor() as i32;
    let scale = 10f64.powi(digits as i32 - 1 - magnitude);
    (f * scale).round() / scale
}
