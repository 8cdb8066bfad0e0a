/// is_pow2 reports whether v is a power of two. Zero is not.
pub fn is_pow2(v: u64) -> bool {
    v != 0 && (v & (v - 1)) == 0
}

/// log2 returns the exponent of a power-of-two v.
/// The result is meaningless if v is not a power of two.
pub fn log2(v: u64) -> u8 {
    v.trailing_zeros() as u8
}

#[cfg(test)]
mod tests {
    use super::{is_pow2, log2};

    #[test]
    fn test_is_pow2() {
        assert!(!is_pow2(0));
        assert!(is_pow2(1));
        assert!(is_pow2(2));
        assert!(!is_pow2(3));
        assert!(is_pow2(16384));
        assert!(!is_pow2(16383));
        assert!(is_pow2(1 << 62));
    }

    #[test]
    fn test_log2() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(16), 4);
        assert_eq!(log2(16384), 14);
    }
}
