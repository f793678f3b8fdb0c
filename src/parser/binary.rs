//! Fixed-layout binary frames protected by a 16-bit checksum.
//!
//! Payload layout (after the registration bytes):
//!
//! ```text
//! | field 0 | field 1 | ... | checksum (u16 BE) | pad |
//! ```
//!
//! The checksum is the wrapping sum of every byte from the registration bytes up
//! to the checksum itself.

use super::Parser;
use crate::config::VariableType;
use crate::core::{Record, Value};
use crate::error::ParseError;

#[derive(Debug, Clone)]
pub struct ChecksummedBinaryParser {
    registration: Vec<u8>,
    frame_length: usize,
    checksum_pad: usize,
    fields: Vec<VariableType>,
}

impl ChecksummedBinaryParser {
    pub fn new(
        registration: Vec<u8>,
        frame_length: usize,
        checksum_pad: usize,
        fields: Vec<VariableType>,
    ) -> Self {
        Self {
            registration,
            frame_length,
            checksum_pad,
            fields,
        }
    }

    /// Checksum over the registration bytes and `data`.
    pub fn checksum(&self, data: &[u8]) -> u16 {
        self.registration
            .iter()
            .chain(data)
            .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
    }
}

fn be<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn decode(kind: VariableType, bytes: &[u8]) -> Value {
    match kind {
        VariableType::U8 => Value::Int(i64::from(bytes[0])),
        VariableType::I8 => Value::Int(i64::from(bytes[0] as i8)),
        VariableType::U16 => Value::Int(i64::from(u16::from_be_bytes(be(bytes)))),
        VariableType::I16 => Value::Int(i64::from(i16::from_be_bytes(be(bytes)))),
        VariableType::U32 => Value::Int(i64::from(u32::from_be_bytes(be(bytes)))),
        VariableType::I32 => Value::Int(i64::from(i32::from_be_bytes(be(bytes)))),
        VariableType::F32 => Value::Float(f64::from(f32::from_be_bytes(be(bytes)))),
        VariableType::F64 => Value::Float(f64::from_be_bytes(be(bytes))),
        _ => Value::MISSING,
    }
}

impl Parser for ChecksummedBinaryParser {
    fn parse(&mut self, frame: &[u8]) -> Result<Record, ParseError> {
        if frame.len() != self.frame_length {
            return Err(ParseError::Malformed(format!(
                "expected {} bytes after registration, got {}",
                self.frame_length,
                frame.len()
            )));
        }
        let Some(checksum_at) = self.frame_length.checked_sub(self.checksum_pad + 2) else {
            return Err(ParseError::Malformed("frame shorter than its checksum".into()));
        };
        let stored = u16::from_be_bytes([frame[checksum_at], frame[checksum_at + 1]]);
        if stored != self.checksum(&frame[..checksum_at]) {
            return Err(ParseError::InvalidChecksum);
        }

        let mut offset = 0;
        let mut values = Vec::with_capacity(self.fields.len());
        for &kind in &self.fields {
            let width = kind.byte_width().unwrap_or(0);
            let Some(bytes) = frame.get(offset..offset + width).filter(|b| !b.is_empty()) else {
                return Err(ParseError::Malformed(format!("field {kind:?} out of frame")));
            };
            values.push(decode(kind, bytes));
            offset += width;
        }
        Ok(Record::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REG: [u8; 4] = [0xFF, 0x00, 0xFF, 0x00];

    fn parser() -> ChecksummedBinaryParser {
        ChecksummedBinaryParser::new(
            REG.to_vec(),
            12,
            1,
            vec![VariableType::U16, VariableType::I16, VariableType::F32, VariableType::U8],
        )
    }

    /// Fields followed by a valid checksum and one pad byte.
    fn frame(p: &ChecksummedBinaryParser) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&513u16.to_be_bytes());
        data.extend_from_slice(&(-2i16).to_be_bytes());
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.push(7);
        let sum = p.checksum(&data);
        data.extend_from_slice(&sum.to_be_bytes());
        data.push(0x00);
        data
    }

    #[test]
    fn test_unpacks_big_endian_fields() {
        let mut p = parser();
        let record = p.parse(&frame(&p)).unwrap();
        assert_eq!(
            record.values,
            vec![Value::Int(513), Value::Int(-2), Value::Float(1.5), Value::Int(7)]
        );
    }

    #[test]
    fn test_flipped_bit_is_invalid_checksum() {
        let mut p = parser();
        let good = frame(&p);
        for byte in 0..9 {
            let mut bad = good.clone();
            bad[byte] ^= 0x04;
            assert_eq!(p.parse(&bad), Err(ParseError::InvalidChecksum), "byte {byte}");
        }
        assert!(p.parse(&good).is_ok());
    }

    #[test]
    fn test_wrong_length_is_malformed() {
        let mut p = parser();
        assert!(matches!(p.parse(&[0; 5]), Err(ParseError::Malformed(_))));
    }
}
