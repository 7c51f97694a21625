use anyhow::Result;

use super::tensor::Tensor;

/// Inference backend trait.
///
/// A backend wraps one loaded model. `init` is called once before the first
/// `run`; `run` takes a preprocessed input batch and returns the raw network
/// output, leaving all decoding to the post-processing pipeline.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Prepare the network for inference.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run the network on one input batch.
    fn run(&mut self, input: &Tensor) -> Result<Tensor>;
}
