use std::collections::BTreeSet;

use bytes::BufMut;

use crate::codec::{
    self, put_preamble, FAMILY_SET_UNION, FLAG_COMPACT, FLAG_EMPTY, FLAG_ORDERED, PREAMBLE_SIZE,
};
use crate::error::{Result, SketchError};
use crate::theta::{resolve_nominal_entries, MAX_LG_NOMINAL_ENTRIES};
use sketch_utils::{bits, hash};

/// UpdateSketch accumulates raw items into a bounded sample of the smallest
/// hashes below theta. When the sample exceeds the nominal capacity, theta
/// drops to the (nominal+1)-th smallest retained hash and everything at or
/// above it is evicted, keeping the estimator unbiased.
#[derive(Debug, Clone)]
pub struct UpdateSketch {
    pub(crate) nominal: u32,
    pub(crate) theta: u64,
    /// Retained hashes, all strictly below theta. Ordered storage makes
    /// compaction deterministic regardless of insertion order.
    pub(crate) hashes: BTreeSet<u64>,
    pub(crate) empty: bool,
}

impl UpdateSketch {
    pub fn new(requested: u32) -> Result<Self> {
        let nominal = resolve_nominal_entries(requested)?;
        Ok(Self {
            nominal,
            theta: u64::MAX,
            hashes: BTreeSet::new(),
            empty: true,
        })
    }

    pub fn nominal(&self) -> u32 {
        self.nominal
    }

    pub fn theta(&self) -> u64 {
        self.theta
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn retained_items(&self) -> usize {
        self.hashes.len()
    }

    /// update hashes one raw item into the sample.
    pub fn update(&mut self, key: &[u8]) {
        let h = hash::hash_key(key);
        self.insert_hash(h);
    }

    pub fn update_u64(&mut self, key: u64) {
        let h = hash::hash_u64(key);
        self.insert_hash(h);
    }

    pub(crate) fn insert_hash(&mut self, h: u64) {
        if h >= self.theta {
            return;
        }
        self.empty = false;
        self.hashes.insert(h);
        if self.hashes.len() > self.nominal as usize {
            self.shrink();
        }
    }

    /// shrink lowers theta to the largest retained hash and evicts it. The
    /// sample overflows by at most one entry per insert, so a single
    /// eviction restores the bound.
    fn shrink(&mut self) {
        if let Some(&cut) = self.hashes.iter().next_back() {
            self.theta = cut;
            self.hashes.split_off(&cut);
        }
    }

    /// prune evicts retained hashes at or above the current theta, after an
    /// externally imposed threshold drop.
    pub(crate) fn prune(&mut self) {
        let cut = self.theta;
        self.hashes.split_off(&cut);
    }

    /// compact snapshots the current state without mutating the sample.
    /// The payload is ascending either way; `ordered` only records the
    /// guarantee in the flags.
    pub fn compact(&self, ordered: bool) -> CompactSketch {
        CompactSketch {
            lg_nominal: bits::log2(self.nominal as u64),
            theta: self.theta,
            hashes: self.hashes.iter().copied().collect(),
            empty: self.empty,
            ordered,
        }
    }

    /// estimate returns the unbiased distinct-count estimate: the retained
    /// count scaled by the inverse of the sampled hash-space fraction.
    pub fn estimate(&self) -> f64 {
        if self.theta == u64::MAX {
            return self.hashes.len() as f64;
        }
        self.hashes.len() as f64 * (u64::MAX as f64 / self.theta as f64)
    }
}

/// CompactSketch is the immutable, transport-ready form of a set-union
/// sketch: the capacity exponent, the threshold, and the retained hashes in
/// ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactSketch {
    pub(crate) lg_nominal: u8,
    pub(crate) theta: u64,
    pub(crate) hashes: Vec<u64>,
    pub(crate) empty: bool,
    pub(crate) ordered: bool,
}

impl CompactSketch {
    pub fn lg_nominal(&self) -> u8 {
        self.lg_nominal
    }

    pub fn theta(&self) -> u64 {
        self.theta
    }

    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn retained_items(&self) -> usize {
        self.hashes.len()
    }

    pub fn estimate(&self) -> f64 {
        if self.theta == u64::MAX {
            return self.hashes.len() as f64;
        }
        self.hashes.len() as f64 * (u64::MAX as f64 / self.theta as f64)
    }

    /// encode writes the canonical byte form. For a given logical content
    /// and capacity the output is reproducible bit for bit.
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = FLAG_COMPACT;
        if self.empty {
            flags |= FLAG_EMPTY;
        }
        if self.ordered {
            flags |= FLAG_ORDERED;
        }

        let mut buf = Vec::with_capacity(PREAMBLE_SIZE + 8 + 8 * self.hashes.len());
        put_preamble(
            &mut buf,
            FAMILY_SET_UNION,
            flags,
            self.lg_nominal,
            self.hashes.len() as u32,
        );
        if self.empty {
            return buf;
        }

        buf.put_u64_le(self.theta);
        for &h in &self.hashes {
            buf.put_u64_le(h);
        }
        buf
    }

    pub(crate) fn decode_body(buf: &[u8]) -> Result<Self> {
        let flags = buf[2];
        let lg_nominal = buf[3];
        let retained = codec::read_u32(buf, 4) as usize;

        if lg_nominal < 4 || lg_nominal > MAX_LG_NOMINAL_ENTRIES {
            return Err(SketchError::CorruptSketch(format!(
                "set-union capacity exponent out of range: {}",
                lg_nominal
            )));
        }

        if flags & FLAG_EMPTY != 0 {
            if retained != 0 {
                return Err(SketchError::CorruptSketch(format!(
                    "empty set-union sketch with retained count {}",
                    retained
                )));
            }
            if buf.len() != PREAMBLE_SIZE {
                return Err(SketchError::CorruptSketch(format!(
                    "empty set-union sketch length: got {}, exp {}",
                    buf.len(),
                    PREAMBLE_SIZE
                )));
            }
            return Ok(Self {
                lg_nominal,
                theta: u64::MAX,
                hashes: Vec::new(),
                empty: true,
                ordered: flags & FLAG_ORDERED != 0,
            });
        }

        let expected = PREAMBLE_SIZE + 8 + 8 * retained;
        if buf.len() != expected {
            return Err(SketchError::CorruptSketch(format!(
                "set-union payload length mismatch: got {}, exp {}",
                buf.len(),
                expected
            )));
        }

        let theta = codec::read_u64(buf, PREAMBLE_SIZE);
        if theta == 0 {
            return Err(SketchError::CorruptSketch("zero theta".to_string()));
        }

        let mut hashes = Vec::with_capacity(retained);
        for i in 0..retained {
            let h = codec::read_u64(buf, PREAMBLE_SIZE + 8 + 8 * i);
            if h >= theta {
                return Err(SketchError::CorruptSketch(format!(
                    "retained hash {:#x} not below theta {:#x}",
                    h, theta
                )));
            }
            hashes.push(h);
        }

        Ok(Self {
            lg_nominal,
            theta,
            hashes,
            empty: false,
            ordered: flags & FLAG_ORDERED != 0,
        })
    }
}
