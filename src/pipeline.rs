use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::meta::ModelMeta;
use crate::nn::InferenceBackend;
use crate::process::{PostOutput, PostProcessor, PreProcessor};

/// Network output for one frame plus the network-only frame rate.
#[derive(Clone, Debug)]
pub struct InferenceOutput {
    pub output: PostOutput,
    pub network_fps: f32,
}

/// Loaded model with its pre/post-processing.
pub struct InferencePipeline {
    backend: Mutex<Box<dyn InferenceBackend>>,
    pre: PreProcessor,
    post: PostProcessor,
}

impl InferencePipeline {
    pub fn new(backend: Box<dyn InferenceBackend>, meta: &ModelMeta) -> Self {
        Self {
            backend: Mutex::new(backend),
            pre: meta.pre_processor(),
            post: meta.post_processor(),
        }
    }

    pub fn run(&self, image: &RgbImage) -> Result<InferenceOutput> {
        let input = self.pre.apply(image)?;

        let started = Instant::now();
        let raw = {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| anyhow!("inference backend lock poisoned"))?;
            backend.run(&input)?
        };
        let elapsed = started.elapsed().as_secs_f32();
        let network_fps = if elapsed > 0.0 { 1.0 / elapsed } else { 0.0 };

        Ok(InferenceOutput {
            output: self.post.apply(raw)?,
            network_fps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::backends::StubBackend;
    use crate::nn::Tensor;

    #[test]
    fn classification_pipeline_returns_scores() -> Result<()> {
        let meta = ModelMeta::cifar10();
        let mut scores = vec![0.0; 10];
        scores[3] = 1.0;
        let backend = StubBackend::new(Tensor::new(vec![1, 10], scores.clone())?);
        let pipeline = InferencePipeline::new(Box::new(backend), &meta);

        let frame = RgbImage::from_pixel(320, 240, image::Rgb([10, 20, 30]));
        let out = pipeline.run(&frame)?;
        assert_eq!(out.output, PostOutput::Scores(scores));
        assert!(out.network_fps >= 0.0);
        Ok(())
    }
}
