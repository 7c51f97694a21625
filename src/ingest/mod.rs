//! Camera ingestion.
//!
//! This module provides the frame source used by the MJPEG server:
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Synthetic source for `stub://` devices (testing)
//!
//! The camera is owned by a single `CaptureWorker` thread. Request handlers ask
//! the worker for the next frame and wait on the returned `PendingFrame`, which
//! lets capture of the next frame overlap with processing of the current one.

mod camera;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;
mod worker;

pub use camera::{CameraConfig, CameraSource, CameraStats};
pub use worker::{CaptureWorker, PendingFrame};
