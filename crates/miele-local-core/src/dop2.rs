//! DOP2 attribute grammar: a self-describing binary TLV carried inside
//! encrypted HTTP bodies.
//!
//! Wire format per record, big-endian:
//! - 2 bytes: element count of the value area
//! - 2 bytes: data type tag
//! - value area: `count` elements whose width the tag selects
//!   (bytes for `0x0001` and unknown tags, u16 words for `0x0002`,
//!   whole child records for `0x0003`)

use crate::cipher::BLOCK_LEN;
use crate::error::{Error, Result};
use serde::Serialize;

/// Opaque byte string
pub const TAG_BYTES: u16 = 0x0001;
/// Ordered sequence of u16 values
pub const TAG_WORDS: u16 = 0x0002;
/// Nested sequence of attribute records
pub const TAG_NESTED: u16 = 0x0003;

/// Nesting bound; deeper structures are a protocol error
const MAX_DEPTH: usize = 32;

/// A decoded attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Dop2Value {
    /// Tag `0x0001`
    Bytes(Vec<u8>),
    /// Tag `0x0002`
    Words(Vec<u16>),
    /// Tag `0x0003`
    Nested(Vec<Dop2Record>),
    /// Any other tag, preserved verbatim
    Opaque(Vec<u8>),
}

/// One attribute record: the wire tag plus its decoded value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Dop2Record {
    pub tag: u16,
    pub value: Dop2Value,
}

impl Dop2Record {
    pub fn bytes(data: Vec<u8>) -> Self {
        Self { tag: TAG_BYTES, value: Dop2Value::Bytes(data) }
    }

    pub fn words(words: Vec<u16>) -> Self {
        Self { tag: TAG_WORDS, value: Dop2Value::Words(words) }
    }

    pub fn nested(children: Vec<Dop2Record>) -> Self {
        Self { tag: TAG_NESTED, value: Dop2Value::Nested(children) }
    }

    pub fn opaque(tag: u16, data: Vec<u8>) -> Self {
        Self { tag, value: Dop2Value::Opaque(data) }
    }

    /// The record's raw value bytes, for primitive field decoding.
    /// Nested records have no flat payload.
    pub fn payload(&self) -> Option<Vec<u8>> {
        match &self.value {
            Dop2Value::Bytes(b) | Dop2Value::Opaque(b) => Some(b.clone()),
            Dop2Value::Words(words) => {
                let mut out = Vec::with_capacity(words.len() * 2);
                for w in words {
                    out.extend_from_slice(&w.to_be_bytes());
                }
                Some(out)
            }
            Dop2Value::Nested(_) => None,
        }
    }
}

impl std::fmt::Display for Dop2Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Dop2Value::Bytes(b) => write!(f, "bytes[{}]", hex::encode(b)),
            Dop2Value::Words(words) => {
                let rendered: Vec<String> = words.iter().map(|w| w.to_string()).collect();
                write!(f, "u16[{}]", rendered.join(", "))
            }
            Dop2Value::Nested(children) => {
                let rendered: Vec<String> =
                    children.iter().map(|c| c.to_string()).collect();
                write!(f, "nested[{}]", rendered.join(", "))
            }
            Dop2Value::Opaque(b) => {
                write!(f, "opaque(0x{:04x})[{}]", self.tag, hex::encode(b))
            }
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn read_u16(&mut self) -> Result<u16> {
        let rest = self.remaining();
        if rest.len() < 2 {
            return Err(Error::Protocol("truncated record header".into()));
        }
        self.pos += 2;
        Ok(u16::from_be_bytes([rest[0], rest[1]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let rest = self.remaining();
        if rest.len() < len {
            return Err(Error::Protocol(format!(
                "record value of {len} bytes exceeds remaining buffer ({} bytes)",
                rest.len()
            )));
        }
        self.pos += len;
        Ok(&rest[..len])
    }
}

/// Parse a complete attribute record sequence.
///
/// The records must exactly consume the buffer; the only tolerated
/// residue is a decryption padding remnant (fewer than one block of
/// all-zero bytes), which is discarded. An empty buffer parses to the
/// empty sequence.
pub fn parse_records(buf: &[u8]) -> Result<Vec<Dop2Record>> {
    let mut cur = Cursor::new(buf);
    let mut out = Vec::new();
    loop {
        let rest = cur.remaining();
        if rest.is_empty() {
            break;
        }
        if rest.len() < BLOCK_LEN && rest.iter().all(|&b| b == 0) {
            // zero-padding remnant after the last record
            break;
        }
        out.push(parse_record(&mut cur, 0)?);
    }
    Ok(out)
}

fn parse_record(cur: &mut Cursor<'_>, depth: usize) -> Result<Dop2Record> {
    if depth > MAX_DEPTH {
        return Err(Error::Protocol("attribute nesting too deep".into()));
    }
    let count = cur.read_u16()? as usize;
    let tag = cur.read_u16()?;
    match tag {
        TAG_BYTES => Ok(Dop2Record::bytes(cur.read_bytes(count)?.to_vec())),
        TAG_WORDS => {
            let raw = cur.read_bytes(count * 2)?;
            let words = raw
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            Ok(Dop2Record::words(words))
        }
        TAG_NESTED => {
            let mut children = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                children.push(parse_record(cur, depth + 1)?);
            }
            Ok(Dop2Record::nested(children))
        }
        other => Ok(Dop2Record::opaque(other, cur.read_bytes(count)?.to_vec())),
    }
}

/// Serialize a record sequence back to wire form.
/// `parse_records(serialize_records(s)) == s` for all well-formed `s`.
pub fn serialize_records(records: &[Dop2Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        write_record(&mut out, record);
    }
    out
}

fn write_record(out: &mut Vec<u8>, record: &Dop2Record) {
    match &record.value {
        Dop2Value::Bytes(b) | Dop2Value::Opaque(b) => {
            out.extend_from_slice(&(b.len() as u16).to_be_bytes());
            out.extend_from_slice(&record.tag.to_be_bytes());
            out.extend_from_slice(b);
        }
        Dop2Value::Words(words) => {
            out.extend_from_slice(&(words.len() as u16).to_be_bytes());
            out.extend_from_slice(&record.tag.to_be_bytes());
            for w in words {
                out.extend_from_slice(&w.to_be_bytes());
            }
        }
        Dop2Value::Nested(children) => {
            out.extend_from_slice(&(children.len() as u16).to_be_bytes());
            out.extend_from_slice(&record.tag.to_be_bytes());
            for child in children {
                write_record(out, child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        assert_eq!(parse_records(&[]).unwrap(), vec![]);
    }

    #[test]
    fn test_word_sequence() {
        // two u16 values, tag 2: [5, 7]
        let buf = [0x00, 0x02, 0x00, 0x02, 0x00, 0x05, 0x00, 0x07];
        let records = parse_records(&buf).unwrap();
        assert_eq!(records, vec![Dop2Record::words(vec![5, 7])]);
    }

    #[test]
    fn test_nested_record() {
        // one child, tag 3, child is the word sequence above
        let buf = [
            0x00, 0x01, 0x00, 0x03, 0x00, 0x02, 0x00, 0x02, 0x00, 0x05, 0x00, 0x07,
        ];
        let records = parse_records(&buf).unwrap();
        assert_eq!(
            records,
            vec![Dop2Record::nested(vec![Dop2Record::words(vec![5, 7])])]
        );
    }

    #[test]
    fn test_byte_string() {
        let buf = [0x00, 0x03, 0x00, 0x01, 0xAA, 0xBB, 0xCC];
        let records = parse_records(&buf).unwrap();
        assert_eq!(records, vec![Dop2Record::bytes(vec![0xAA, 0xBB, 0xCC])]);
    }

    #[test]
    fn test_unknown_tag_preserved() {
        let buf = [0x00, 0x02, 0x00, 0x09, 0x01, 0x02];
        let records = parse_records(&buf).unwrap();
        assert_eq!(records, vec![Dop2Record::opaque(0x0009, vec![0x01, 0x02])]);

        // tag survives the round trip
        assert_eq!(serialize_records(&records), buf.to_vec());
    }

    #[test]
    fn test_truncated_value_rejected() {
        // claims three bytes, carries two
        let buf = [0x00, 0x03, 0x00, 0x01, 0xAA, 0xBB];
        assert!(parse_records(&buf).is_err());
    }

    #[test]
    fn test_truncated_header_rejected() {
        let buf = [0x00, 0x02, 0x00];
        assert!(parse_records(&buf).is_err());
    }

    #[test]
    fn test_truncated_word_sequence_rejected() {
        // claims two words, carries three bytes
        let buf = [0x00, 0x02, 0x00, 0x02, 0x00, 0x05, 0x00];
        assert!(parse_records(&buf).is_err());
    }

    #[test]
    fn test_padding_remnant_tolerated() {
        let mut buf = vec![0x00, 0x02, 0x00, 0x02, 0x00, 0x05, 0x00, 0x07];
        buf.extend_from_slice(&[0u8; 8]);
        let records = parse_records(&buf).unwrap();
        assert_eq!(records, vec![Dop2Record::words(vec![5, 7])]);
    }

    #[test]
    fn test_nonzero_residue_rejected() {
        let mut buf = vec![0x00, 0x02, 0x00, 0x02, 0x00, 0x05, 0x00, 0x07];
        buf.extend_from_slice(&[0, 0, 0xFF]);
        assert!(parse_records(&buf).is_err());
    }

    #[test]
    fn test_round_trip() {
        let records = vec![
            Dop2Record::bytes(vec![1, 2, 3]),
            Dop2Record::words(vec![10, 20, 30]),
            Dop2Record::nested(vec![
                Dop2Record::words(vec![5]),
                Dop2Record::opaque(0x0042, vec![0xFF]),
            ]),
        ];
        let wire = serialize_records(&records);
        assert_eq!(parse_records(&wire).unwrap(), records);
    }

    #[test]
    fn test_nesting_depth_bounded() {
        // a chain of single-child nested records deeper than the bound
        let mut buf = Vec::new();
        for _ in 0..40 {
            buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x03]);
        }
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        assert!(parse_records(&buf).is_err());
    }

    #[test]
    fn test_display_rendering() {
        let record = Dop2Record::words(vec![5, 7]);
        assert_eq!(record.to_string(), "u16[5, 7]");
        let nested = Dop2Record::nested(vec![Dop2Record::bytes(vec![0x0A])]);
        assert_eq!(nested.to_string(), "nested[bytes[0a]]");
    }
}
