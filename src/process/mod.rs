//! Pre- and post-processing pipelines declared in the model metadata.

pub mod post;
pub mod pre;

pub use post::{BoxRow, PostOutput, PostProcessStep, PostProcessor};
pub use pre::{DataFormat, PreProcessStep, PreProcessor};
