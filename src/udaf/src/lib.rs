pub mod descriptor;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod state;

pub use descriptor::{ColumnCategory, ColumnDescriptor, PrimitiveType};
pub use driver::PipelineDriver;
pub use error::{Result, UdafError};
pub use evaluator::{Evaluator, Phase};
pub use state::{AggregationState, MergeEngine, StateKind};
