//! SageMaker training and conversion driver.
//!
//! Both jobs are sequential: unpack inputs, run the Blueoil command, collect
//! outputs. Any error ends the job with a `JobFailure`, which the binary
//! writes to `<output>/failure` before exiting with status 255.

mod archive;
mod command;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::ui::Ui;

pub use archive::{
    compress_dir, extract_archives, search_converted_output, unpack, CONVERTED_OUTPUT_PATTERN,
};
pub use command::{hyperparameters_to_cmd_args, load_hyperparameters, run_command};

pub const TRAINING_PREFIX: &str = "/opt/ml";
pub const PROCESSING_PREFIX: &str = "/opt/ml/processing";
pub const DEFAULT_BLUEOIL_CMD: &str = "/home/blueoil/blueoil/cmd/main.py";
pub const FAILURE_FILE: &str = "failure";

/// Container paths used by a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobLayout {
    pub dataset_dir: PathBuf,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub hyperparameters: PathBuf,
}

impl JobLayout {
    /// Training container layout below `prefix` (normally `/opt/ml`).
    pub fn training(prefix: &Path) -> Self {
        Self::under(prefix)
    }

    /// Processing container layout below `prefix` (normally
    /// `/opt/ml/processing`).
    pub fn processing(prefix: &Path) -> Self {
        Self::under(prefix)
    }

    fn under(prefix: &Path) -> Self {
        let input = prefix.join("input/data");
        Self {
            dataset_dir: input.join("dataset"),
            model_dir: input.join("model"),
            output_dir: prefix.join("output"),
            hyperparameters: prefix.join("input/config/hyperparameters.json"),
        }
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.output_dir.join("converted")
    }
}

/// Interpreter and entry script of the Blueoil CLI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlueoilCommand {
    pub python: String,
    pub script: String,
}

impl BlueoilCommand {
    fn argv(&self, subcommand: &str, args: &[String]) -> Vec<String> {
        let mut argv = vec![self.python.clone(), self.script.clone(), subcommand.to_string()];
        argv.extend(args.iter().cloned());
        argv
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Trained,
    /// Path of the compressed converter output.
    Converted(PathBuf),
}

/// A failed job: the top-level message and the full cause chain.
#[derive(Clone, Debug)]
pub struct JobFailure {
    pub message: String,
    pub trace: String,
}

impl From<anyhow::Error> for JobFailure {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: format!("{:#}", err),
            trace: format!("{:?}", err),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exception during training: {}\n{}", self.message, self.trace)
    }
}

pub type JobResult = std::result::Result<JobOutcome, JobFailure>;

pub fn train(layout: &JobLayout, cmd: &BlueoilCommand, ui: &Ui) -> JobResult {
    {
        let _stage = ui.stage("Extract dataset");
        extract_archives(&layout.dataset_dir)?;
    }
    let _stage = ui.stage("Run training");
    let hyperparameters = load_hyperparameters(&layout.hyperparameters)?;
    let argv = cmd.argv("train", &hyperparameters_to_cmd_args(&hyperparameters));
    run_command(&argv, &[])?;
    log::info!("Training is completed.");
    Ok(JobOutcome::Trained)
}

/// Convert a trained model; `args` are forwarded to `convert` verbatim.
pub fn convert(layout: &JobLayout, cmd: &BlueoilCommand, args: &[String], ui: &Ui) -> JobResult {
    {
        let _stage = ui.stage("Extract dataset");
        extract_archives(&layout.dataset_dir)?;
    }
    {
        let _stage = ui.stage("Extract model");
        extract_archives(&layout.model_dir)?;
    }
    {
        let _stage = ui.stage("Run convert");
        let env = [(
            "OUTPUT_DIR".to_string(),
            layout.model_dir.to_string_lossy().into_owned(),
        )];
        run_command(&cmd.argv("convert", args), &env)?;
    }
    let _stage = ui.stage("Compress converted model");
    let output = search_converted_output(&layout.model_dir)?;
    let archive = compress_dir(&output, &layout.converted_dir())?;
    log::info!("Converting is completed: {}", archive.display());
    Ok(JobOutcome::Converted(archive))
}

/// Record a failure as `<output_dir>/failure` and in the log.
pub fn write_failure(output_dir: &Path, failure: &JobFailure) -> Result<PathBuf> {
    let report = failure.to_string();
    log::error!("{}", report);
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("create {}", output_dir.display()))?;
    let path = output_dir.join(FAILURE_FILE);
    std::fs::write(&path, report).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
