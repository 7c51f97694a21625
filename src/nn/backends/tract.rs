#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_tensorflow::prelude::*;

use crate::nn::backend::InferenceBackend;
use crate::nn::tensor::Tensor;

/// Tract-based backend for frozen TensorFlow graphs (`.pb`).
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_shape: Vec<usize>,
}

impl TractBackend {
    /// Load a graph from disk with a fixed NHWC input shape.
    pub fn new<P: AsRef<Path>>(model_path: P, input_shape: &[usize]) -> Result<Self> {
        let model_path = model_path.as_ref();
        let fact_shape: TVec<usize> = input_shape.iter().copied().collect();
        let model = tract_tensorflow::tensorflow()
            .model_for_path(model_path)
            .with_context(|| {
                format!("failed to load protocol buffer from {}", model_path.display())
            })?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), fact_shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize graph")?
            .into_runnable()
            .context("failed to build runnable graph")?;

        Ok(Self {
            model,
            input_shape: input_shape.to_vec(),
        })
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn run(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.shape() != self.input_shape.as_slice() {
            return Err(anyhow!(
                "input {:?} does not match graph input {:?}",
                input.shape(),
                self.input_shape
            ));
        }
        let array =
            tract_ndarray::ArrayD::from_shape_vec(input.shape().to_vec(), input.data().to_vec())
                .context("failed to shape input tensor")?;
        let outputs = self
            .model
            .run(tvec!(array.into_tensor().into()))
            .context("graph inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("graph produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("graph output tensor was not f32")?;
        Tensor::new(view.shape().to_vec(), view.iter().copied().collect())
    }
}
