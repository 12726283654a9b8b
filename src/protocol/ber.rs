//! ASN.1 BER primitives for SNMPv1/v2c
//!
//! Definite-length encoding only, which is all SNMP uses on the wire.
//! The reader borrows the packet buffer; the writer builds nested TLVs
//! inner-first so lengths are known when the header is written.

use bytes::{BufMut, Bytes, BytesMut};

use crate::mib::Oid;
use crate::{Error, Result};

// Universal tags
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;

// SNMP application tags
pub const TAG_IPADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_OPAQUE: u8 = 0x44;
pub const TAG_COUNTER64: u8 = 0x46;

// v2c exception values (context-specific, empty content)
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

// PDU tags (context-specific, constructed)
pub const TAG_GET_REQUEST: u8 = 0xA0;
pub const TAG_GET_NEXT_REQUEST: u8 = 0xA1;
pub const TAG_GET_RESPONSE: u8 = 0xA2;
pub const TAG_SET_REQUEST: u8 = 0xA3;
pub const TAG_TRAP_V1: u8 = 0xA4;
pub const TAG_GET_BULK_REQUEST: u8 = 0xA5;
pub const TAG_REPORT: u8 = 0xA8;

/// Borrowing TLV reader
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek_tag(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::protocol("truncated BER: missing tag"))
    }

    /// Reads the next TLV, returning its tag and content slice.
    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = self.peek_tag()?;
        self.pos += 1;
        let len = self.read_length()?;
        if self.remaining() < len {
            return Err(Error::protocol(format!(
                "truncated BER: need {} content bytes, have {}",
                len,
                self.remaining()
            )));
        }
        let content = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok((tag, content))
    }

    /// Reads the next TLV, requiring a specific tag.
    pub fn expect(&mut self, expected: u8) -> Result<&'a [u8]> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(Error::protocol(format!(
                "unexpected BER tag 0x{:02X}, wanted 0x{:02X}",
                tag, expected
            )));
        }
        Ok(content)
    }

    pub fn read_integer(&mut self) -> Result<i64> {
        let content = self.expect(TAG_INTEGER)?;
        decode_integer(content)
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8]> {
        self.expect(TAG_OCTET_STRING)
    }

    pub fn read_oid(&mut self) -> Result<Oid> {
        let content = self.expect(TAG_OBJECT_IDENTIFIER)?;
        decode_oid(content)
    }

    fn read_length(&mut self) -> Result<usize> {
        let first = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::protocol("truncated BER: missing length"))?;
        self.pos += 1;

        if first < 0x80 {
            return Ok(first as usize);
        }
        if first == 0x80 {
            return Err(Error::protocol("indefinite BER length not allowed"));
        }

        let num_bytes = (first & 0x7F) as usize;
        if num_bytes > 4 {
            return Err(Error::protocol("BER length too large"));
        }
        if self.remaining() < num_bytes {
            return Err(Error::protocol("truncated BER: short long-form length"));
        }

        let mut len: usize = 0;
        for _ in 0..num_bytes {
            len = (len << 8) | self.data[self.pos] as usize;
            self.pos += 1;
        }
        Ok(len)
    }
}

/// TLV writer over a growable buffer
#[derive(Debug, Default)]
pub struct BerWriter {
    buf: BytesMut,
}

impl BerWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn push_tlv(&mut self, tag: u8, content: &[u8]) {
        self.buf.put_u8(tag);
        self.push_length(content.len());
        self.buf.put_slice(content);
    }

    /// Wraps an already-encoded body in a constructed TLV.
    pub fn push_constructed(&mut self, tag: u8, inner: BerWriter) {
        self.buf.put_u8(tag);
        self.push_length(inner.buf.len());
        self.buf.put_slice(&inner.buf);
    }

    pub fn push_integer(&mut self, value: i64) {
        let content = encode_integer(value);
        self.push_tlv(TAG_INTEGER, &content);
    }

    /// Unsigned value under an application tag (Counter32, Gauge32, ...).
    pub fn push_unsigned(&mut self, tag: u8, value: u64) {
        let content = encode_unsigned(value);
        self.push_tlv(tag, &content);
    }

    pub fn push_octet_string(&mut self, bytes: &[u8]) {
        self.push_tlv(TAG_OCTET_STRING, bytes);
    }

    pub fn push_null(&mut self) {
        self.push_tlv(TAG_NULL, &[]);
    }

    /// Exception values carry the context tag and no content.
    pub fn push_exception(&mut self, tag: u8) {
        self.push_tlv(tag, &[]);
    }

    pub fn push_ipaddress(&mut self, octets: [u8; 4]) {
        self.push_tlv(TAG_IPADDRESS, &octets);
    }

    pub fn push_oid(&mut self, oid: &Oid) -> Result<()> {
        let content = encode_oid(oid)?;
        self.push_tlv(TAG_OBJECT_IDENTIFIER, &content);
        Ok(())
    }

    fn push_length(&mut self, len: usize) {
        if len < 0x80 {
            self.buf.put_u8(len as u8);
            return;
        }
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let significant = &bytes[skip..];
        self.buf.put_u8(0x80 | significant.len() as u8);
        self.buf.put_slice(significant);
    }
}

/// Minimal two's-complement signed integer decode.
pub fn decode_integer(content: &[u8]) -> Result<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(Error::protocol(format!(
            "INTEGER content length {} out of range",
            content.len()
        )));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in content {
        value = (value << 8) | i64::from(*byte);
    }
    Ok(value)
}

/// Unsigned decode for counters; tolerates the leading 0x00 pad byte.
pub fn decode_unsigned(content: &[u8]) -> Result<u64> {
    let content = match content {
        [] => return Err(Error::protocol("empty unsigned content")),
        [0x00, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.len() > 8 {
        return Err(Error::protocol("unsigned content too long"));
    }
    let mut value: u64 = 0;
    for byte in content {
        value = (value << 8) | u64::from(*byte);
    }
    Ok(value)
}

pub fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let cur = bytes[start];
        let next = bytes[start + 1];
        // Strip redundant sign-extension bytes
        if (cur == 0x00 && next & 0x80 == 0) || (cur == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

pub fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    let significant = &bytes[skip..];
    if significant[0] & 0x80 != 0 {
        // Pad so the value stays non-negative
        let mut padded = Vec::with_capacity(significant.len() + 1);
        padded.push(0x00);
        padded.extend_from_slice(significant);
        padded
    } else {
        significant.to_vec()
    }
}

pub fn decode_oid(content: &[u8]) -> Result<Oid> {
    if content.is_empty() {
        return Err(Error::protocol("empty OID content"));
    }

    let mut components: Vec<u32> = Vec::with_capacity(content.len() + 1);
    let first = content[0];
    if first < 40 {
        components.push(0);
        components.push(u32::from(first));
    } else if first < 80 {
        components.push(1);
        components.push(u32::from(first - 40));
    } else {
        components.push(2);
        components.push(u32::from(first - 80));
    }

    let mut acc: u64 = 0;
    let mut in_subid = false;
    for byte in &content[1..] {
        acc = (acc << 7) | u64::from(byte & 0x7F);
        if acc > u64::from(u32::MAX) {
            return Err(Error::protocol("OID component overflows 32 bits"));
        }
        in_subid = true;
        if byte & 0x80 == 0 {
            components.push(acc as u32);
            acc = 0;
            in_subid = false;
        }
    }
    if in_subid {
        return Err(Error::protocol("truncated OID component"));
    }

    Oid::new(components)
}

pub fn encode_oid(oid: &Oid) -> Result<Vec<u8>> {
    let components = oid.components();
    if components.len() < 2 {
        return Err(Error::protocol(format!(
            "OID {} too short to BER-encode",
            oid
        )));
    }
    if components[0] > 2 || (components[0] < 2 && components[1] >= 40) {
        return Err(Error::protocol(format!("OID {} has invalid head", oid)));
    }

    let mut out = Vec::with_capacity(components.len() + 1);
    out.push((components[0] * 40 + components[1]) as u8);
    for &subid in &components[2..] {
        let mut chunk = [0u8; 5];
        let mut idx = chunk.len();
        let mut rest = subid;
        loop {
            idx -= 1;
            chunk[idx] = (rest & 0x7F) as u8;
            rest >>= 7;
            if rest == 0 {
                break;
            }
        }
        // Continuation bit on all but the last byte
        for i in idx..chunk.len() - 1 {
            chunk[i] |= 0x80;
        }
        out.extend_from_slice(&chunk[idx..]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn test_integer_round_trip() {
        for value in [0i64, 1, -1, 127, 128, -128, -129, 255, 12345, -12345, i32::MAX as i64, i32::MIN as i64] {
            let content = encode_integer(value);
            assert_eq!(decode_integer(&content).unwrap(), value, "value {}", value);
        }
    }

    #[test]
    fn test_integer_minimal_encoding() {
        assert_eq!(encode_integer(0), vec![0x00]);
        assert_eq!(encode_integer(127), vec![0x7F]);
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer(-1), vec![0xFF]);
        assert_eq!(encode_integer(-129), vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_unsigned_round_trip() {
        for value in [0u64, 1, 127, 128, 255, 4294967295, u64::MAX] {
            let content = encode_unsigned(value);
            assert_eq!(decode_unsigned(&content).unwrap(), value, "value {}", value);
        }
    }

    #[test]
    fn test_unsigned_high_bit_padded() {
        // 0x80000000 needs a 0x00 pad to stay non-negative
        assert_eq!(
            encode_unsigned(0x8000_0000),
            vec![0x00, 0x80, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_oid_round_trip() {
        for s in [
            "1.3.6.1.2.1.1.1.0",
            "1.3.6.1.4.1.4491.2.1.1",
            "0.0",
            "2.100.3",
            "1.3.6.1.2.1.2.2.1.10.16777215",
        ] {
            let content = encode_oid(&oid(s)).unwrap();
            assert_eq!(decode_oid(&content).unwrap(), oid(s), "oid {}", s);
        }
    }

    #[test]
    fn test_oid_known_bytes() {
        // 1.3 packs to 0x2B
        assert_eq!(
            encode_oid(&oid("1.3.6.1")).unwrap(),
            vec![0x2B, 0x06, 0x01]
        );
        // Multi-byte subid: 4491 = 0x22 0x4B with continuation
        assert_eq!(
            encode_oid(&oid("1.3.6.1.4.1.4491")).unwrap(),
            vec![0x2B, 0x06, 0x01, 0x04, 0x01, 0xA3, 0x0B]
        );
    }

    #[test]
    fn test_oid_rejects_invalid() {
        assert!(encode_oid(&oid("1")).is_err());
        assert!(encode_oid(&oid("3.1")).is_err());
        assert!(encode_oid(&oid("1.40.1")).is_err());
        assert!(decode_oid(&[]).is_err());
        assert!(decode_oid(&[0x2B, 0x86]).is_err());
    }

    #[test]
    fn test_reader_tlv_and_lengths() {
        let mut writer = BerWriter::new();
        writer.push_octet_string(&[0xAB; 200]);
        let bytes = writer.finish();

        // 200 forces long-form length
        assert_eq!(bytes[0], TAG_OCTET_STRING);
        assert_eq!(bytes[1], 0x81);
        assert_eq!(bytes[2], 200);

        let mut reader = BerReader::new(&bytes);
        let content = reader.read_octet_string().unwrap();
        assert_eq!(content.len(), 200);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_reader_rejects_truncation() {
        let mut writer = BerWriter::new();
        writer.push_octet_string(b"hello");
        let bytes = writer.finish();

        let mut reader = BerReader::new(&bytes[..bytes.len() - 2]);
        assert!(reader.read_octet_string().is_err());

        let mut reader = BerReader::new(&[TAG_INTEGER]);
        assert!(reader.read_integer().is_err());

        // Indefinite length
        let mut reader = BerReader::new(&[TAG_OCTET_STRING, 0x80, 0x00, 0x00]);
        assert!(reader.read_octet_string().is_err());
    }

    #[test]
    fn test_constructed_nesting() {
        let mut inner = BerWriter::new();
        inner.push_integer(42);
        inner.push_null();

        let mut outer = BerWriter::new();
        outer.push_constructed(TAG_SEQUENCE, inner);
        let bytes = outer.finish();

        let mut reader = BerReader::new(&bytes);
        let seq = reader.expect(TAG_SEQUENCE).unwrap();
        let mut seq_reader = BerReader::new(seq);
        assert_eq!(seq_reader.read_integer().unwrap(), 42);
        assert_eq!(seq_reader.expect(TAG_NULL).unwrap(), &[] as &[u8]);
        assert!(seq_reader.is_empty());
    }
}
