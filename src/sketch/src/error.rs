use thiserror::Error;

pub type Result<T, E = SketchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SketchError {
    /// An invalid capacity or resolution parameter. Fatal at construction
    /// time; the only silent correction anywhere is the documented
    /// zero-to-default substitution.
    #[error("invalid sketch configuration: {0}")]
    Configuration(String),

    /// A non-absent byte sequence that does not decode per the wire format.
    /// Fatal for the input that produced it; never coerced to empty.
    #[error("corrupt sketch: {0}")]
    CorruptSketch(String),
}
