//! Blueoil deployment glue.
//!
//! Two independent flows live here:
//!
//! - **Training/conversion driver** (`job`): unpacks SageMaker inputs, runs
//!   the Blueoil CLI and packages its results or a failure report.
//! - **Live inference display** (`server`): streams camera frames as MJPEG,
//!   annotated with the model's detections and a debounced restricted-area
//!   alert that is published to a message topic when raised.
//!
//! # Module Structure
//!
//! - `ingest`, `frame`: camera capture on a dedicated worker thread
//! - `meta`, `process`, `nn`, `pipeline`: model metadata, pre/post-processing
//!   and inference backends
//! - `detect`, `annotate`, `visualize`, `output`: per-frame decisions,
//!   decoration and result documents
//! - `publish`, `server`, `config`: alert delivery and the HTTP endpoint
//! - `job`, `ui`: the SageMaker driver and its stage reporting

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod job;
pub mod meta;
pub mod nn;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod publish;
pub mod server;
pub mod ui;
pub mod visualize;

pub use config::ServerConfig;
pub use detect::{AlertDecision, AlertMonitor, AlertState, Banner, Detection, UniqueBox};
pub use frame::Frame;
pub use meta::{ModelMeta, Task};
pub use server::{MjpegServer, ServerHandle, StreamContext};
