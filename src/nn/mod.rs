//! Model loading and inference backends.
//!
//! Two model formats are accepted: a native shared library produced by the
//! converter (`.so`) and a frozen graph (`.pb`). The format is decided from
//! the file extension alone so an unsupported path fails before any I/O.

pub mod backend;
pub mod backends;
pub mod tensor;

use std::path::Path;

use anyhow::{anyhow, Result};

pub use backend::InferenceBackend;
pub use tensor::Tensor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
    SharedLibrary,
    ProtocolBuffer,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("so") => Ok(Self::SharedLibrary),
            Some("pb") => Ok(Self::ProtocolBuffer),
            _ => Err(anyhow!(
                "Unknown file type: {}. \
                 Only .pb (protocol buffer) or .so (shared object) file is supported.",
                path.display()
            )),
        }
    }
}

/// Load and initialise the model at `path`.
///
/// `input_shape` is the NHWC batch shape the preprocessor produces.
pub fn load_model(path: &Path, input_shape: &[usize]) -> Result<Box<dyn InferenceBackend>> {
    let format = ModelFormat::from_path(path)?;
    let mut backend = open_backend(format, path, input_shape)?;
    backend.init()?;
    log::info!(
        "loaded model {} with {} backend",
        path.display(),
        backend.name()
    );
    Ok(backend)
}

#[cfg(target_os = "linux")]
fn open_shared_library(path: &Path) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(backends::SharedLibraryBackend::load(path)?))
}

#[cfg(not(target_os = "linux"))]
fn open_shared_library(path: &Path) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow!(
        "shared library models are only supported on linux: {}",
        path.display()
    ))
}

#[cfg(feature = "backend-tract")]
fn open_protocol_buffer(path: &Path, input_shape: &[usize]) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(backends::TractBackend::new(path, input_shape)?))
}

#[cfg(not(feature = "backend-tract"))]
fn open_protocol_buffer(path: &Path, _input_shape: &[usize]) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow!(
        "{} is a protocol buffer model; rebuild with --features backend-tract",
        path.display()
    ))
}

fn open_backend(
    format: ModelFormat,
    path: &Path,
    input_shape: &[usize],
) -> Result<Box<dyn InferenceBackend>> {
    match format {
        ModelFormat::SharedLibrary => open_shared_library(path),
        ModelFormat::ProtocolBuffer => open_protocol_buffer(path, input_shape),
    }
}
