//! Wire format shared by both sketch families.
//!
//! Every serialized sketch starts with the same 8-byte little-endian
//! preamble:
//!
//! | byte | field                                                 |
//! |------|-------------------------------------------------------|
//! | 0    | serial version (currently 1)                          |
//! | 1    | family tag (1 = set-union, 2 = quantiles)             |
//! | 2    | flags (bit 0 EMPTY, bit 1 COMPACT, bit 2 ORDERED)     |
//! | 3    | set-union: lg of nominal capacity; quantiles: unused  |
//! | 4..8 | u32: set-union: retained count; quantiles: k          |
//!
//! The family-specific payload follows. Any byte sequence shorter than the
//! preamble is treated as logically absent at every boundary, never as an
//! error; anything at least preamble-sized must decode cleanly or is
//! reported as corrupt.

use bytes::BufMut;
use tracing::trace;

use crate::error::{Result, SketchError};
use crate::quantiles::DoublesSketch;
use crate::theta::CompactSketch;

pub const SERIAL_VERSION: u8 = 1;

pub const FAMILY_SET_UNION: u8 = 1;
pub const FAMILY_QUANTILES: u8 = 2;

pub const FLAG_EMPTY: u8 = 1;
pub const FLAG_COMPACT: u8 = 1 << 1;
pub const FLAG_ORDERED: u8 = 1 << 2;

const KNOWN_FLAGS: u8 = FLAG_EMPTY | FLAG_COMPACT | FLAG_ORDERED;

/// PREAMBLE_SIZE is the minimal length of any well-formed sketch. A shorter
/// sequence is absent, not malformed.
pub const PREAMBLE_SIZE: usize = 8;

/// The closed set of summary families this engine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchFamily {
    SetUnion,
    Quantiles,
}

impl SketchFamily {
    pub fn tag(self) -> u8 {
        match self {
            SketchFamily::SetUnion => FAMILY_SET_UNION,
            SketchFamily::Quantiles => FAMILY_QUANTILES,
        }
    }

    pub fn from_tag(tag: u8) -> Option<SketchFamily> {
        match tag {
            FAMILY_SET_UNION => Some(SketchFamily::SetUnion),
            FAMILY_QUANTILES => Some(SketchFamily::Quantiles),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SketchFamily::SetUnion => "set-union",
            SketchFamily::Quantiles => "quantiles",
        }
    }
}

/// A decoded sketch of either family.
#[derive(Debug, Clone)]
pub enum Sketch {
    SetUnion(CompactSketch),
    Quantiles(DoublesSketch),
}

impl Sketch {
    pub fn family(&self) -> SketchFamily {
        match self {
            Sketch::SetUnion(_) => SketchFamily::SetUnion,
            Sketch::Quantiles(_) => SketchFamily::Quantiles,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Sketch::SetUnion(s) => s.is_empty(),
            Sketch::Quantiles(s) => s.is_empty(),
        }
    }

    pub fn retained_items(&self) -> usize {
        match self {
            Sketch::SetUnion(s) => s.retained_items(),
            Sketch::Quantiles(s) => s.retained_items(),
        }
    }
}

/// decode parses a serialized sketch. Returns None for absent input
/// (anything shorter than the preamble); anything longer is validated
/// strictly and surfaces CorruptSketch on any inconsistency.
pub fn decode(buf: &[u8]) -> Result<Option<Sketch>> {
    if buf.len() < PREAMBLE_SIZE {
        trace!(len = buf.len(), "sub-preamble input treated as absent");
        return Ok(None);
    }

    let version = buf[0];
    if version != SERIAL_VERSION {
        return Err(SketchError::CorruptSketch(format!(
            "unsupported serial version: {}",
            version
        )));
    }

    let flags = buf[2];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(SketchError::CorruptSketch(format!(
            "unknown flag bits: {:#04x}",
            flags
        )));
    }

    match SketchFamily::from_tag(buf[1]) {
        Some(SketchFamily::SetUnion) => Ok(Some(Sketch::SetUnion(CompactSketch::decode_body(buf)?))),
        Some(SketchFamily::Quantiles) => {
            Ok(Some(Sketch::Quantiles(DoublesSketch::decode_body(buf)?)))
        }
        None => Err(SketchError::CorruptSketch(format!(
            "unknown sketch family: {}",
            buf[1]
        ))),
    }
}

/// encode produces the canonical minimal byte sequence for a sketch's
/// current state.
pub fn encode(sketch: &Sketch) -> Vec<u8> {
    match sketch {
        Sketch::SetUnion(s) => s.encode(),
        Sketch::Quantiles(s) => s.encode(),
    }
}

pub(crate) fn put_preamble(buf: &mut Vec<u8>, family: u8, flags: u8, b3: u8, word: u32) {
    buf.put_u8(SERIAL_VERSION);
    buf.put_u8(family);
    buf.put_u8(flags);
    buf.put_u8(b3);
    buf.put_u32_le(word);
}

// Slice readers used by the family decoders. Offsets are validated against
// the buffer length before these are called.
pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

pub(crate) fn read_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantiles::DoublesUnion;
    use crate::theta::Union;

    #[test]
    fn test_decode_short_input_is_absent() {
        assert!(decode(&[]).unwrap().is_none());
        assert!(decode(&[0, 0, 0, 0]).unwrap().is_none());
        assert!(decode(&[1; 7]).unwrap().is_none());
    }

    #[test]
    fn test_decode_bad_version() {
        let mut bytes = Union::new(16).unwrap().result(false).encode();
        bytes[0] = 9;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptSketch(_)), "got {:?}", err);
    }

    #[test]
    fn test_decode_bad_family() {
        let mut bytes = Union::new(16).unwrap().result(false).encode();
        bytes[1] = 7;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptSketch(_)), "got {:?}", err);
    }

    #[test]
    fn test_decode_unknown_flag_bits() {
        let mut bytes = Union::new(16).unwrap().result(false).encode();
        bytes[2] |= 1 << 6;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptSketch(_)), "got {:?}", err);
    }

    #[test]
    fn test_union_payload_length_mismatch() {
        let mut union = Union::new(16).unwrap();
        union.update_item(b"x");
        let mut bytes = union.result(false).encode();
        bytes.push(0);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptSketch(_)), "got {:?}", err);
    }

    #[test]
    fn test_quantiles_payload_length_mismatch() {
        let mut union = DoublesUnion::new(128).unwrap();
        union.update(1.5);
        let mut bytes = union.result().encode();
        bytes.truncate(bytes.len() - 1);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptSketch(_)), "got {:?}", err);
    }

    #[test]
    fn test_empty_round_trip_both_families() {
        let union_bytes = Union::new(0).unwrap().result(false).encode();
        assert_eq!(union_bytes.len(), PREAMBLE_SIZE);
        match decode(&union_bytes).unwrap() {
            Some(Sketch::SetUnion(s)) => {
                assert!(s.is_empty());
                assert_eq!(s.retained_items(), 0);
            }
            other => panic!("expected empty set-union sketch, got {:?}", other),
        }

        let q_bytes = DoublesUnion::new(0).unwrap().result().encode();
        assert_eq!(q_bytes.len(), PREAMBLE_SIZE);
        match decode(&q_bytes).unwrap() {
            Some(Sketch::Quantiles(s)) => {
                assert!(s.is_empty());
                assert_eq!(s.retained_items(), 0);
            }
            other => panic!("expected empty quantiles sketch, got {:?}", other),
        }
    }
}
