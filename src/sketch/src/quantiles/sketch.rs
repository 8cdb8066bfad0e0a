use std::mem;

use bytes::BufMut;
use ordered_float::OrderedFloat;

use crate::codec::{
    self, put_preamble, FAMILY_QUANTILES, FLAG_COMPACT, FLAG_EMPTY, PREAMBLE_SIZE,
};
use crate::error::{Result, SketchError};
use crate::quantiles::resolve_k;

/// DoublesSketch approximates the value distribution of an f64 stream.
///
/// Items land in the base buffer; when it reaches 2k values it is sorted
/// and halved into a carry that propagates through the levels like binary
/// addition: level i is occupied iff bit i of n/2k is set, and a level-i
/// value stands for 2^(i+1) stream items.
#[derive(Debug, Clone)]
pub struct DoublesSketch {
    pub(crate) k: u16,
    pub(crate) n: u64,
    /// +inf/-inf sentinels while the sketch is empty.
    pub(crate) min_value: f64,
    pub(crate) max_value: f64,
    /// Unsorted; holds n mod 2k values.
    pub(crate) base_buffer: Vec<f64>,
    /// Each occupied level holds exactly k sorted values.
    pub(crate) levels: Vec<Option<Vec<f64>>>,
    /// Drives the alternating selection offset used by compaction, so runs
    /// are reproducible without a shared RNG. Not part of the logical
    /// content and not serialized.
    pub(crate) sample_offset: u64,
}

impl DoublesSketch {
    pub fn new(requested_k: u32) -> Result<Self> {
        Ok(Self::with_k(resolve_k(requested_k)?))
    }

    pub(crate) fn with_k(k: u16) -> Self {
        Self {
            k,
            n: 0,
            min_value: f64::INFINITY,
            max_value: f64::NEG_INFINITY,
            base_buffer: Vec::new(),
            levels: Vec::new(),
            sample_offset: 0,
        }
    }

    pub fn k(&self) -> u16 {
        self.k
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// min_value returns +inf while the sketch is empty.
    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    /// max_value returns -inf while the sketch is empty.
    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn retained_items(&self) -> usize {
        self.base_buffer.len() + self.levels.iter().flatten().map(Vec::len).sum::<usize>()
    }

    /// update inserts one value. NaN is ignored.
    pub fn update(&mut self, v: f64) {
        if v.is_nan() {
            return;
        }
        if v < self.min_value {
            self.min_value = v;
        }
        if v > self.max_value {
            self.max_value = v;
        }
        self.base_buffer.push(v);
        self.n += 1;
        if self.base_buffer.len() == 2 * self.k as usize {
            self.compact_base_buffer();
        }
    }

    fn compact_base_buffer(&mut self) {
        let mut buf = mem::take(&mut self.base_buffer);
        buf.sort_unstable_by_key(|v| OrderedFloat(*v));
        let carry = self.sample_down(&buf, 2);
        self.propagate_carry(0, carry);
    }

    /// sample_down keeps every ratio-th value of a sorted buffer, starting
    /// at a rotating offset. Ratio must divide the buffer length.
    pub(crate) fn sample_down(&mut self, sorted: &[f64], ratio: usize) -> Vec<f64> {
        let offset = (self.sample_offset % ratio as u64) as usize;
        self.sample_offset += 1;
        sorted.iter().skip(offset).step_by(ratio).copied().collect()
    }

    /// propagate_carry pushes a k-sized sorted carry up the level stack:
    /// an empty level absorbs it, an occupied level merges with it and
    /// forwards half. This is binary addition over level occupancy.
    pub(crate) fn propagate_carry(&mut self, start: usize, mut carry: Vec<f64>) {
        let mut lvl = start;
        loop {
            if self.levels.len() <= lvl {
                self.levels.resize_with(lvl + 1, || None);
            }
            match self.levels[lvl].take() {
                None => {
                    self.levels[lvl] = Some(carry);
                    return;
                }
                Some(existing) => {
                    let merged = merge_sorted(&existing, &carry);
                    carry = self.sample_down(&merged, 2);
                    lvl += 1;
                }
            }
        }
    }

    /// bit_pattern describes which levels are occupied: bit i set means
    /// level i holds k values.
    pub(crate) fn bit_pattern(&self) -> u64 {
        self.n / (2 * self.k as u64)
    }

    fn occupancy_pattern(&self) -> u64 {
        let mut p = 0u64;
        for (i, level) in self.levels.iter().enumerate() {
            if level.is_some() {
                p |= 1 << i;
            }
        }
        p
    }

    /// quantile returns the approximate value at the given rank in [0, 1],
    /// or None when the sketch is empty or the rank is out of range.
    pub fn quantile(&self, rank: f64) -> Option<f64> {
        if self.is_empty() || !(0.0..=1.0).contains(&rank) {
            return None;
        }
        // The extremes come from the tracked bounds; compaction may have
        // dropped them from the retained samples.
        if rank == 0.0 {
            return Some(self.min_value);
        }
        if rank == 1.0 {
            return Some(self.max_value);
        }

        let mut samples: Vec<(f64, u64)> = Vec::with_capacity(self.retained_items());
        for &v in &self.base_buffer {
            samples.push((v, 1));
        }
        for (i, level) in self.levels.iter().enumerate() {
            if let Some(values) = level {
                let weight = 1u64 << (i + 1);
                for &v in values {
                    samples.push((v, weight));
                }
            }
        }
        samples.sort_unstable_by_key(|(v, _)| OrderedFloat(*v));

        let target = rank * self.n as f64;
        let mut cumulative = 0u64;
        for (v, w) in &samples {
            cumulative += w;
            if cumulative as f64 >= target {
                return Some(*v);
            }
        }
        samples.last().map(|(v, _)| *v)
    }

    /// encode writes the canonical byte form: preamble, then n, min, max,
    /// the base buffer in insert order, and each occupied level ascending.
    pub fn encode(&self) -> Vec<u8> {
        if self.is_empty() {
            let mut buf = Vec::with_capacity(PREAMBLE_SIZE);
            put_preamble(
                &mut buf,
                FAMILY_QUANTILES,
                FLAG_EMPTY | FLAG_COMPACT,
                0,
                self.k as u32,
            );
            return buf;
        }

        debug_assert_eq!(
            self.occupancy_pattern(),
            self.bit_pattern(),
            "level occupancy out of sync with n"
        );

        let mut buf = Vec::with_capacity(PREAMBLE_SIZE + 24 + 8 * self.retained_items());
        put_preamble(&mut buf, FAMILY_QUANTILES, FLAG_COMPACT, 0, self.k as u32);
        buf.put_u64_le(self.n);
        buf.put_f64_le(self.min_value);
        buf.put_f64_le(self.max_value);
        for &v in &self.base_buffer {
            buf.put_f64_le(v);
        }
        for level in self.levels.iter().flatten() {
            for &v in level {
                buf.put_f64_le(v);
            }
        }
        buf
    }

    pub(crate) fn decode_body(buf: &[u8]) -> Result<Self> {
        let flags = buf[2];
        let k = resolve_k(codec::read_u32(buf, 4))
            .map_err(|e| SketchError::CorruptSketch(format!("quantiles preamble: {}", e)))?;

        if flags & FLAG_EMPTY != 0 {
            if buf.len() != PREAMBLE_SIZE {
                return Err(SketchError::CorruptSketch(format!(
                    "empty quantiles sketch length: got {}, exp {}",
                    buf.len(),
                    PREAMBLE_SIZE
                )));
            }
            return Ok(Self::with_k(k));
        }

        if buf.len() < PREAMBLE_SIZE + 24 {
            return Err(SketchError::CorruptSketch(format!(
                "quantiles sketch too short for fixed fields: {}",
                buf.len()
            )));
        }

        let n = codec::read_u64(buf, 8);
        if n == 0 {
            return Err(SketchError::CorruptSketch(
                "non-empty quantiles sketch with zero count".to_string(),
            ));
        }
        let min_value = codec::read_f64(buf, 16);
        let max_value = codec::read_f64(buf, 24);
        if min_value.is_nan() || max_value.is_nan() || min_value > max_value {
            return Err(SketchError::CorruptSketch(format!(
                "invalid quantiles bounds: min {}, max {}",
                min_value, max_value
            )));
        }

        let two_k = 2 * k as u64;
        let bb_count = (n % two_k) as usize;
        let pattern = n / two_k;
        let retained = bb_count + k as usize * pattern.count_ones() as usize;
        let expected = PREAMBLE_SIZE + 24 + 8 * retained;
        if buf.len() != expected {
            return Err(SketchError::CorruptSketch(format!(
                "quantiles payload length mismatch: got {}, exp {}",
                buf.len(),
                expected
            )));
        }

        let mut off = PREAMBLE_SIZE + 24;
        let mut base_buffer = Vec::with_capacity(bb_count);
        for _ in 0..bb_count {
            let v = codec::read_f64(buf, off);
            // NaN fails the range check as well; a payload value the
            // tracked bounds cannot account for must not decode.
            if !(min_value..=max_value).contains(&v) {
                return Err(SketchError::CorruptSketch(format!(
                    "quantiles base buffer value {} outside bounds [{}, {}]",
                    v, min_value, max_value
                )));
            }
            base_buffer.push(v);
            off += 8;
        }

        let mut levels = Vec::new();
        let mut p = pattern;
        let mut lvl = 0usize;
        while p != 0 {
            if p & 1 == 1 {
                let mut values = Vec::with_capacity(k as usize);
                for _ in 0..k {
                    let v = codec::read_f64(buf, off);
                    if !(min_value..=max_value).contains(&v) {
                        return Err(SketchError::CorruptSketch(format!(
                            "quantiles level {} value {} outside bounds [{}, {}]",
                            lvl, v, min_value, max_value
                        )));
                    }
                    values.push(v);
                    off += 8;
                }
                for w in values.windows(2) {
                    if w[0] > w[1] {
                        return Err(SketchError::CorruptSketch(format!(
                            "quantiles level {} not sorted",
                            lvl
                        )));
                    }
                }
                levels.push(Some(values));
            } else {
                levels.push(None);
            }
            p >>= 1;
            lvl += 1;
        }

        Ok(Self {
            k,
            n,
            min_value,
            max_value,
            base_buffer,
            levels,
            sample_offset: 0,
        })
    }
}

/// merge_sorted zips two sorted runs into one.
pub(crate) fn merge_sorted(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if OrderedFloat(a[i]) <= OrderedFloat(b[j]) {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Sketch};

    #[test]
    fn test_update_tracks_bounds_and_count() {
        let mut sk = DoublesSketch::new(128).unwrap();
        sk.update(3.0);
        sk.update(-1.5);
        sk.update(10.0);
        assert_eq!(sk.n(), 3);
        assert_eq!(sk.retained_items(), 3);
        assert_eq!(sk.min_value(), -1.5);
        assert_eq!(sk.max_value(), 10.0);
    }

    #[test]
    fn test_nan_is_ignored() {
        let mut sk = DoublesSketch::new(128).unwrap();
        sk.update(f64::NAN);
        assert!(sk.is_empty());
        sk.update(1.0);
        sk.update(f64::NAN);
        assert_eq!(sk.n(), 1);
    }

    #[test]
    fn test_compaction_at_capacity() {
        let k = 8u32;
        let mut sk = DoublesSketch::new(k).unwrap();
        for i in 0..16 {
            sk.update(i as f64);
        }
        // 2k items: base buffer compacts into level 0.
        assert_eq!(sk.n(), 16);
        assert_eq!(sk.base_buffer.len(), 0);
        assert_eq!(sk.bit_pattern(), 1);
        assert_eq!(sk.retained_items(), 8);
    }

    #[test]
    fn test_retained_matches_pattern() {
        let k = 16;
        let mut sk = DoublesSketch::new(k).unwrap();
        for i in 0..1000 {
            sk.update(i as f64);
        }
        let two_k = 2 * k as u64;
        let expected =
            (1000 % two_k) as usize + k as usize * ((1000 / two_k) as u64).count_ones() as usize;
        assert_eq!(sk.retained_items(), expected, "retained must be f(n, k)");
    }

    #[test]
    fn test_round_trip_preserves_logical_content() {
        let mut sk = DoublesSketch::new(32).unwrap();
        for i in 0..777 {
            sk.update((i as f64).sin() * 100.0);
        }
        let bytes = sk.encode();
        match decode(&bytes).unwrap() {
            Some(Sketch::Quantiles(back)) => {
                assert_eq!(back.k(), sk.k());
                assert_eq!(back.n(), sk.n());
                assert_eq!(back.retained_items(), sk.retained_items());
                assert_eq!(back.min_value(), sk.min_value());
                assert_eq!(back.max_value(), sk.max_value());
                // A second encode of the decoded sketch is bit-identical.
                assert_eq!(back.encode(), bytes);
            }
            other => panic!("expected quantiles sketch, got {:?}", other),
        }
    }

    #[test]
    fn test_quantile_accuracy_on_uniform_stream() {
        let mut sk = DoublesSketch::new(128).unwrap();
        let n = 10_000;
        for i in 0..n {
            sk.update(i as f64);
        }
        let median = sk.quantile(0.5).unwrap();
        let err = (median - n as f64 / 2.0).abs() / n as f64;
        assert!(err < 0.05, "median rank error too large: {}", err);
        assert_eq!(sk.quantile(0.0).unwrap(), sk.min_value());
    }

    #[test]
    fn test_quantile_out_of_range() {
        let mut sk = DoublesSketch::new(128).unwrap();
        sk.update(1.0);
        assert!(sk.quantile(-0.1).is_none());
        assert!(sk.quantile(1.1).is_none());
        assert!(DoublesSketch::new(128).unwrap().quantile(0.5).is_none());
    }

    #[test]
    fn test_decode_rejects_nan_payload_value() {
        let mut sk = DoublesSketch::new(128).unwrap();
        sk.update(1.5);
        let mut bytes = sk.encode();
        // The single base-buffer value sits right after the fixed fields.
        bytes[32..40].copy_from_slice(&f64::NAN.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(
            matches!(err, crate::error::SketchError::CorruptSketch(_)),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_decode_rejects_value_outside_bounds() {
        let mut sk = DoublesSketch::new(128).unwrap();
        sk.update(1.0);
        sk.update(2.0);
        let mut bytes = sk.encode();
        bytes[32..40].copy_from_slice(&100.0f64.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(
            matches!(err, crate::error::SketchError::CorruptSketch(_)),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_decode_rejects_corrupt_level_value() {
        let mut sk = DoublesSketch::new(2).unwrap();
        for i in 0..4 {
            sk.update(i as f64);
        }
        // n == 2k, so the payload is exactly one level and no base buffer.
        let mut bytes = sk.encode();
        bytes[32..40].copy_from_slice(&f64::NAN.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(
            matches!(err, crate::error::SketchError::CorruptSketch(_)),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_invalid_k_is_configuration_error() {
        let err = DoublesSketch::new(100).unwrap_err();
        assert!(
            matches!(err, crate::error::SketchError::Configuration(_)),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_merge_sorted() {
        let merged = merge_sorted(&[1.0, 3.0, 5.0], &[2.0, 4.0, 6.0]);
        assert_eq!(merged, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
