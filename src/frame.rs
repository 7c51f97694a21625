//! Captured camera frames.
//!
//! - `Frame`: owned RGB24 pixel buffer with dimensions and capture instant.
//!
//! Frames are created by the ingestion layer, consumed by a single request-loop
//! iteration and dropped; nothing here is persisted.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::{Duration, Instant};

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

/// A single RGB24 camera frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer. The buffer length must match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Time since the frame left the camera.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Convert into an `image` buffer for processing and annotation.
    pub fn into_image(self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}
