pub mod bits;
pub mod hash;
