//! Metric wire codec: lossless binary encode/decode of event metric
//! payloads.
//!
//! The payload is a length-delimited, field-tagged binary format
//! (varint/fixed64 wire types). Encode and decode are mutual inverses
//! for any valid value, and fields with unrecognized numbers survive a
//! decode/re-encode cycle byte-for-byte: they are captured as an opaque
//! trailer and re-emitted verbatim, so payloads produced by a newer
//! peer can pass through this process unharmed.
//!
//! Zero-valued scalar fields are omitted on encode, which makes an
//! explicit zero indistinguishable from an absent field after a round
//! trip. Float values round-trip by bit pattern; NaN payloads and the
//! sign of negative zero are preserved.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// An event metric payload: handler names plus measurements.
///
/// `handlers` elements are not deduplicated and `points` preserve
/// insertion order through encode/decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Handlers the metric points should be routed to.
    #[serde(default)]
    pub handlers: Vec<String>,
    /// Measurements, in insertion order.
    #[serde(default)]
    pub points: Vec<MetricPoint>,
    /// Verbatim bytes of fields this version does not recognize.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<u8>,
}

/// A single measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Measurement name.
    #[serde(default)]
    pub name: String,
    /// Measured value.
    #[serde(default)]
    pub value: f64,
    /// Time of measurement in nanoseconds since the epoch. Negative
    /// values are allowed; no range validation is performed.
    #[serde(default)]
    pub timestamp: i64,
    /// Dimension tags, in insertion order.
    #[serde(default)]
    pub tags: Vec<MetricTag>,
    /// Verbatim bytes of fields this version does not recognize.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<u8>,
}

/// A measurement dimension. Tag names are not required to be unique
/// within a point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricTag {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    /// Verbatim bytes of fields this version does not recognize.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<u8>,
}

// =============================================================================
// Encoding
// =============================================================================

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn put_tag(buf: &mut BytesMut, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

fn put_len_delimited(buf: &mut BytesMut, field: u32, bytes: &[u8]) {
    put_tag(buf, field, WIRE_LEN);
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

impl Metrics {
    /// Encode the payload to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for handler in &self.handlers {
            put_len_delimited(&mut buf, 1, handler.as_bytes());
        }
        for point in &self.points {
            put_len_delimited(&mut buf, 2, &point.encode_body());
        }
        buf.put_slice(&self.unknown);
        buf.to_vec()
    }

    /// Decode a payload from its wire representation.
    ///
    /// Fails on truncated input, invalid length prefixes and overflowing
    /// varints; unknown field numbers are preserved, never rejected.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(buf);
        let mut metrics = Metrics::default();
        while reader.has_remaining() {
            let mark = reader.pos;
            let (field, wire_type) = reader.read_key()?;
            match (field, wire_type) {
                (1, WIRE_LEN) => {
                    let raw = reader.read_len_prefixed()?;
                    metrics.handlers.push(decode_string(raw)?);
                }
                (2, WIRE_LEN) => {
                    let raw = reader.read_len_prefixed()?;
                    metrics.points.push(MetricPoint::decode_body(raw)?);
                }
                _ => reader.capture_unknown(mark, wire_type, &mut metrics.unknown)?,
            }
        }
        Ok(metrics)
    }
}

impl MetricPoint {
    fn encode_body(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        if !self.name.is_empty() {
            put_len_delimited(&mut buf, 1, self.name.as_bytes());
        }
        // Compare by bit pattern so negative zero survives the trip.
        if self.value.to_bits() != 0 {
            put_tag(&mut buf, 2, WIRE_FIXED64);
            buf.put_u64_le(self.value.to_bits());
        }
        if self.timestamp != 0 {
            put_tag(&mut buf, 3, WIRE_VARINT);
            put_varint(&mut buf, self.timestamp as u64);
        }
        for tag in &self.tags {
            put_len_delimited(&mut buf, 4, &tag.encode_body());
        }
        buf.put_slice(&self.unknown);
        buf.to_vec()
    }

    fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(buf);
        let mut point = MetricPoint::default();
        while reader.has_remaining() {
            let mark = reader.pos;
            let (field, wire_type) = reader.read_key()?;
            match (field, wire_type) {
                (1, WIRE_LEN) => {
                    point.name = decode_string(reader.read_len_prefixed()?)?;
                }
                (2, WIRE_FIXED64) => {
                    point.value = f64::from_bits(reader.read_u64_le()?);
                }
                (3, WIRE_VARINT) => {
                    point.timestamp = reader.read_varint()? as i64;
                }
                (4, WIRE_LEN) => {
                    let raw = reader.read_len_prefixed()?;
                    point.tags.push(MetricTag::decode_body(raw)?);
                }
                _ => reader.capture_unknown(mark, wire_type, &mut point.unknown)?,
            }
        }
        Ok(point)
    }
}

impl MetricTag {
    fn encode_body(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        if !self.name.is_empty() {
            put_len_delimited(&mut buf, 1, self.name.as_bytes());
        }
        if !self.value.is_empty() {
            put_len_delimited(&mut buf, 2, self.value.as_bytes());
        }
        buf.put_slice(&self.unknown);
        buf.to_vec()
    }

    fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(buf);
        let mut tag = MetricTag::default();
        while reader.has_remaining() {
            let mark = reader.pos;
            let (field, wire_type) = reader.read_key()?;
            match (field, wire_type) {
                (1, WIRE_LEN) => tag.name = decode_string(reader.read_len_prefixed()?)?,
                (2, WIRE_LEN) => tag.value = decode_string(reader.read_len_prefixed()?)?,
                _ => reader.capture_unknown(mark, wire_type, &mut tag.unknown)?,
            }
        }
        Ok(tag)
    }
}

fn decode_string(raw: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

// =============================================================================
// Decoding cursor
// =============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_varint(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        for i in 0..10 {
            let byte = *self.buf.get(self.pos).ok_or(CodecError::Truncated)?;
            self.pos += 1;
            // The tenth byte may only carry the final bit of a 64-bit value.
            if i == 9 && byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    fn read_key(&mut self) -> Result<(u32, u8), CodecError> {
        let key = self.read_varint()?;
        let field = key >> 3;
        if field == 0 {
            return Err(CodecError::IllegalTag(key));
        }
        Ok((field as u32, (key & 0x7) as u8))
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        let raw = self.read_exact(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let length = self.read_varint()?;
        let remaining = self.remaining();
        if length > remaining as u64 {
            return Err(CodecError::InvalidLength { length, remaining });
        }
        self.read_exact(length as usize)
    }

    /// Skip over a field of the given wire type and append its raw bytes,
    /// tag included, to the unknown-field trailer.
    fn capture_unknown(
        &mut self,
        mark: usize,
        wire_type: u8,
        unknown: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.read_exact(8)?;
            }
            WIRE_LEN => {
                self.read_len_prefixed()?;
            }
            WIRE_FIXED32 => {
                self.read_exact(4)?;
            }
            other => return Err(CodecError::UnsupportedWireType(other)),
        }
        unknown.extend_from_slice(&self.buf[mark..self.pos]);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
