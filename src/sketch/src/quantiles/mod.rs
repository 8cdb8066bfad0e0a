//! Leveled quantiles sketch over f64 values: a base buffer of up to 2k
//! recent values plus a stack of k-sized sorted levels, where a level-i
//! value stands for 2^(i+1) stream items. Compaction halves a full buffer
//! into the next level, preserving rank-error bounds governed by k.

pub mod sketch;
pub mod union;

pub use sketch::DoublesSketch;
pub use union::DoublesUnion;

use crate::error::{Result, SketchError};
use sketch_utils::bits;

/// DEFAULT_K is substituted when the caller requests resolution 0.
pub const DEFAULT_K: u16 = 128;

/// MIN_K and MAX_K bound the accepted resolution range.
pub const MIN_K: u16 = 2;
pub const MAX_K: u16 = 32768;

/// resolve_k validates a requested resolution: a power of two in
/// [MIN_K, MAX_K], with zero substituting DEFAULT_K.
pub fn resolve_k(requested: u32) -> Result<u16> {
    let k = if requested == 0 {
        DEFAULT_K as u32
    } else {
        requested
    };
    if k < MIN_K as u32 || k > MAX_K as u32 || !bits::is_pow2(k as u64) {
        return Err(SketchError::Configuration(format!(
            "k must be a power of two in [{}, {}], got {}",
            MIN_K, MAX_K, requested
        )));
    }
    Ok(k as u16)
}
