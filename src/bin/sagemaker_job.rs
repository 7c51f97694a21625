//! sagemaker_job - train or convert a Blueoil model inside a SageMaker container
//!
//! `sagemaker_job` (or `sagemaker_job train`) trains with the hyperparameters
//! SageMaker mounts; `sagemaker_job convert <args...>` forwards the arguments
//! to the converter and packages its output. Exit status is 0 on success and
//! 255 on failure, with the reason written to `<output>/failure`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use blueoil_deploy::job::{
    self, BlueoilCommand, JobFailure, JobLayout, JobOutcome, DEFAULT_BLUEOIL_CMD,
    PROCESSING_PREFIX, TRAINING_PREFIX,
};
use blueoil_deploy::ui::{Ui, UiMode};
use clap::Parser;

const FAILURE_EXIT: u8 = 255;
const CONVERT: &str = "convert";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Python interpreter used to run the Blueoil CLI.
    #[arg(long, env = "BLUEOIL_PYTHON", default_value = "python3")]
    python: String,
    /// Blueoil CLI entry script.
    #[arg(long, env = "BLUEOIL_CMD", default_value = DEFAULT_BLUEOIL_CMD)]
    blueoil_cmd: String,
    /// Root of the training container layout.
    #[arg(long, env = "SM_TRAINING_PREFIX", default_value = TRAINING_PREFIX)]
    training_prefix: PathBuf,
    /// Root of the processing container layout.
    #[arg(long, env = "SM_PROCESSING_PREFIX", default_value = PROCESSING_PREFIX)]
    processing_prefix: PathBuf,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
    /// `convert [args...]` converts, forwarding every argument verbatim;
    /// anything else trains.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum JobMode {
    Train,
    Convert(Vec<String>),
}

fn job_mode(command: &[String]) -> JobMode {
    match command.split_first() {
        Some((first, rest)) if first == CONVERT => JobMode::Convert(rest.to_vec()),
        Some((first, _)) if first != "train" => {
            log::warn!("unknown command {:?}, running training", first);
            JobMode::Train
        }
        _ => JobMode::Train,
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            if !err.use_stderr() {
                // --help / --version
                return ExitCode::SUCCESS;
            }
            let failure = JobFailure::from(anyhow::Error::new(err));
            let output_dir = JobLayout::training(Path::new(TRAINING_PREFIX)).output_dir;
            return fail(&output_dir, &failure);
        }
    };
    let ui = Ui::new(args.ui);
    let cmd = BlueoilCommand {
        python: args.python,
        script: args.blueoil_cmd,
    };

    let (layout, result) = match job_mode(&args.command) {
        JobMode::Train => {
            let layout = JobLayout::training(&args.training_prefix);
            let result = job::train(&layout, &cmd, &ui);
            (layout, result)
        }
        JobMode::Convert(forwarded) => {
            let layout = JobLayout::processing(&args.processing_prefix);
            let result = job::convert(&layout, &cmd, &forwarded, &ui);
            (layout, result)
        }
    };

    match result {
        Ok(JobOutcome::Trained) => ExitCode::SUCCESS,
        Ok(JobOutcome::Converted(archive)) => {
            log::info!("converted model written to {}", archive.display());
            ExitCode::SUCCESS
        }
        Err(failure) => fail(&layout.output_dir, &failure),
    }
}

fn fail(output_dir: &Path, failure: &JobFailure) -> ExitCode {
    if let Err(err) = job::write_failure(output_dir, failure) {
        log::error!("could not record failure: {:#}", err);
    }
    ExitCode::from(FAILURE_EXIT)
}
