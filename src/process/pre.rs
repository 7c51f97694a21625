use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::nn::Tensor;

/// Memory layout the network expects for its input batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataFormat {
    #[default]
    Nhwc,
    Nchw,
}

impl DataFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "NHWC" => Ok(Self::Nhwc),
            "NCHW" => Ok(Self::Nchw),
            other => Err(anyhow!("unsupported data format {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PreProcessStep {
    /// Bilinear resize to `[height, width]`. `ResizeWithGtBoxes` maps here
    /// since inference frames carry no ground truth.
    Resize { size: [u32; 2] },
    DivideBy255,
    PerImageStandardization,
}

/// Ordered preprocessing applied to each captured frame.
#[derive(Clone, Debug, Default)]
pub struct PreProcessor {
    steps: Vec<PreProcessStep>,
    data_format: DataFormat,
}

impl PreProcessor {
    pub fn new(steps: Vec<PreProcessStep>, data_format: DataFormat) -> Self {
        Self { steps, data_format }
    }

    /// Convert an RGB frame into a batch of one.
    ///
    /// Resizes operate on the 8-bit image; the float steps then run in
    /// declaration order.
    pub fn apply(&self, image: &RgbImage) -> Result<Tensor> {
        let mut resized: Option<RgbImage> = None;
        for step in &self.steps {
            if let PreProcessStep::Resize { size: [h, w] } = step {
                if *h == 0 || *w == 0 {
                    return Err(anyhow!("resize target {}x{} is empty", w, h));
                }
                let source = resized.as_ref().unwrap_or(image);
                resized = Some(imageops::resize(source, *w, *h, FilterType::Triangle));
            }
        }
        let image = resized.as_ref().unwrap_or(image);
        let (width, height) = image.dimensions();

        let mut data: Vec<f32> = image.as_raw().iter().map(|&v| v as f32).collect();
        for step in &self.steps {
            match step {
                PreProcessStep::Resize { .. } => {}
                PreProcessStep::DivideBy255 => data.iter_mut().for_each(|v| *v /= 255.0),
                PreProcessStep::PerImageStandardization => standardize(&mut data),
            }
        }

        let (h, w) = (height as usize, width as usize);
        match self.data_format {
            DataFormat::Nhwc => Tensor::new(vec![1, h, w, 3], data),
            DataFormat::Nchw => {
                let mut planar = vec![0.0; data.len()];
                for (idx, value) in data.iter().enumerate() {
                    let channel = idx % 3;
                    let pixel = idx / 3;
                    planar[channel * h * w + pixel] = *value;
                }
                Tensor::new(vec![1, 3, h, w], planar)
            }
        }
    }
}

/// `(x - mean) / max(stddev, 1 / sqrt(N))` over every value of the image.
fn standardize(data: &mut [f32]) {
    if data.is_empty() {
        return;
    }
    let n = data.len() as f32;
    let mean = data.iter().sum::<f32>() / n;
    let variance = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let adjusted = variance.sqrt().max(1.0 / n.sqrt());
    data.iter_mut().for_each(|v| *v = (*v - mean) / adjusted);
}
