pub mod codec;
pub mod error;
pub mod quantiles;
pub mod theta;

pub use codec::{decode, encode, Sketch, SketchFamily};
pub use error::{Result, SketchError};
