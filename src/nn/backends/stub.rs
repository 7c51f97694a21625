use anyhow::{anyhow, Result};

use crate::nn::backend::InferenceBackend;
use crate::nn::tensor::Tensor;

/// Stub backend for testing. Returns the same output for every input.
pub struct StubBackend {
    output: Tensor,
    runs: u64,
}

impl StubBackend {
    pub fn new(output: Tensor) -> Self {
        Self { output, runs: 0 }
    }

    /// Number of completed runs.
    pub fn runs(&self) -> u64 {
        self.runs
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn run(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.data().is_empty() {
            return Err(anyhow!("stub backend received an empty input"));
        }
        self.runs += 1;
        Ok(self.output.clone())
    }
}
