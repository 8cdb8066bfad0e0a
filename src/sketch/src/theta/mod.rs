//! Theta-style set-union sketch: a bounded sample of the smallest item
//! hashes below a moving threshold, supporting unbiased distinct-count
//! estimation and lossless union with other sketches of any capacity.

pub mod sketch;
pub mod union;

pub use sketch::{CompactSketch, UpdateSketch};
pub use union::Union;

use crate::error::{Result, SketchError};
use sketch_utils::bits;

/// DEFAULT_NOMINAL_ENTRIES is substituted when the caller requests size 0.
pub const DEFAULT_NOMINAL_ENTRIES: u32 = 16384;

/// MIN_NOMINAL_ENTRIES is the smallest accepted capacity.
pub const MIN_NOMINAL_ENTRIES: u32 = 16;

/// MAX_LG_NOMINAL_ENTRIES caps the capacity exponent carried in the preamble.
pub const MAX_LG_NOMINAL_ENTRIES: u8 = 26;

/// resolve_nominal_entries validates a requested capacity: it must be a
/// power of two within [MIN_NOMINAL_ENTRIES, 2^MAX_LG_NOMINAL_ENTRIES], with
/// zero substituting DEFAULT_NOMINAL_ENTRIES.
pub fn resolve_nominal_entries(requested: u32) -> Result<u32> {
    let nominal = if requested == 0 {
        DEFAULT_NOMINAL_ENTRIES
    } else {
        requested
    };
    if nominal < MIN_NOMINAL_ENTRIES
        || nominal > (1 << MAX_LG_NOMINAL_ENTRIES)
        || !bits::is_pow2(nominal as u64)
    {
        return Err(SketchError::Configuration(format!(
            "nominal entries must be a power of two in [{}, {}], got {}",
            MIN_NOMINAL_ENTRIES,
            1u32 << MAX_LG_NOMINAL_ENTRIES,
            requested
        )));
    }
    Ok(nominal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_zero_substitutes_default() {
        assert_eq!(resolve_nominal_entries(0).unwrap(), DEFAULT_NOMINAL_ENTRIES);
    }

    #[test]
    fn test_resolve_rejects_non_pow2() {
        assert!(resolve_nominal_entries(100).is_err());
        assert!(resolve_nominal_entries(16383).is_err());
    }

    #[test]
    fn test_resolve_rejects_below_minimum() {
        assert!(resolve_nominal_entries(8).is_err());
        assert_eq!(resolve_nominal_entries(16).unwrap(), 16);
    }
}
