use sketch_core::SketchError;
use thiserror::Error;

/// Errors surfaced to the host engine. Argument problems are reported at
/// evaluator construction, before any row is processed; state problems come
/// from calls that violate the aggregation lifecycle. Absent input is never
/// an error at any phase.
#[derive(Error, Debug)]
pub enum UdafError {
    #[error("invalid arguments: {0}")]
    Argument(String),

    #[error("invalid aggregation state: {0}")]
    State(String),

    #[error(transparent)]
    Sketch(#[from] SketchError),
}

pub type Result<T, E = UdafError> = std::result::Result<T, E>;
