use std::hash::Hasher;

/// Seed used for all sketch hashing. Sketches only merge meaningfully when
/// their retained hashes were produced with the same seed.
pub const DEFAULT_SEED: u64 = 0;

/// hash_key computes a hash of key. The result is always in (0, u64::MAX)
/// exclusive, so a hash always sits strictly below an open threshold.
pub fn hash_key(key: &[u8]) -> u64 {
    let mut xx_hash = twox_hash::XxHash64::with_seed(DEFAULT_SEED);
    xx_hash.write(key);
    let mut h = xx_hash.finish();

    if h == 0 {
        h = 1;
    }
    if h == u64::MAX {
        h = u64::MAX - 1;
    }

    h
}

/// hash_u64 computes a hash of a u64 key. Same range guarantee as hash_key.
pub fn hash_u64(key: u64) -> u64 {
    let buf = key.to_be_bytes();
    hash_key(&buf)
}

#[cfg(test)]
mod tests {
    use super::{hash_key, hash_u64};

    #[test]
    fn test_hash_key_deterministic() {
        let a = hash_key(b"distinct-count");
        let b = hash_key(b"distinct-count");
        assert_eq!(a, b, "same key must hash identically: got {}, exp {}", b, a);
    }

    #[test]
    fn test_hash_key_range() {
        for i in 0..10_000u64 {
            let h = hash_u64(i);
            assert_ne!(h, 0, "hash of {} is zero", i);
            assert_ne!(h, u64::MAX, "hash of {} is u64::MAX", i);
        }
    }

    #[test]
    fn test_hash_key_spreads() {
        let a = hash_key(b"a");
        let b = hash_key(b"b");
        assert_ne!(a, b, "adjacent keys should not collide");
    }
}
