use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};

/// Read the hyperparameters JSON object.
pub fn load_hyperparameters(path: &Path) -> Result<Map<String, Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read hyperparameters {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parse hyperparameters {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "hyperparameters {} must be a JSON object, got {}",
            path.display(),
            other
        )),
    }
}

/// `{"epochs": 5, "config": "a.py"}` becomes `--epochs 5 --config a.py`.
///
/// Strings are passed verbatim; any other value as its JSON text.
pub fn hyperparameters_to_cmd_args(hyperparameters: &Map<String, Value>) -> Vec<String> {
    hyperparameters
        .iter()
        .flat_map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            [format!("--{}", key), value]
        })
        .collect()
}

/// Run `argv` to completion with extra environment variables.
///
/// Stdout is inherited; stderr is captured and reported on failure.
pub fn run_command(argv: &[String], env: &[(String, String)]) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    log::info!("{:?}", argv);

    let output = Command::new(program)
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn {}", program))?
        .wait_with_output()
        .with_context(|| format!("wait for {}", program))?;

    if output.status.success() {
        return Ok(());
    }
    let code = output
        .status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    Err(anyhow!(
        "Return Code: {}, CMD: {:?}, Err: {}",
        code,
        argv,
        String::from_utf8_lossy(&output.stderr).trim_end()
    ))
}
