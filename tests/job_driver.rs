use std::fs::{self, File};
use std::path::Path;

use flate2::read::GzDecoder;
use tempfile::TempDir;

use blueoil_deploy::job::{self, BlueoilCommand, JobLayout, JobOutcome, FAILURE_FILE};
use blueoil_deploy::ui::Ui;

/// Fake Blueoil CLI: records its arguments and, for `convert`, produces the
/// converter's directory tree below `$OUTPUT_DIR`.
fn fake_cli(root: &Path, exit_code: i32) -> BlueoilCommand {
    let script = root.join("blueoil.sh");
    let body = format!(
        r#"echo "$@" > "{log}"
if [ "$1" = "convert" ]; then
  mkdir -p "$OUTPUT_DIR/exp01/export/save.ckpt-1000/224x224/output/models"
  echo weights > "$OUTPUT_DIR/exp01/export/save.ckpt-1000/224x224/output/models/meta.yaml"
fi
if [ {code} -ne 0 ]; then
  echo "config not found" >&2
fi
exit {code}
"#,
        log = root.join("invocation.txt").display(),
        code = exit_code,
    );
    fs::write(&script, body).unwrap();
    BlueoilCommand {
        python: "sh".to_string(),
        script: script.to_string_lossy().into_owned(),
    }
}

fn write_dataset_archive(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let file = File::create(dir.join("cifar.tgz")).unwrap();
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        file,
        flate2::Compression::default(),
    ));
    let contents = b"airplane\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "cifar/labels.txt", &contents[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

fn invocation(root: &TempDir) -> String {
    fs::read_to_string(root.path().join("invocation.txt"))
        .unwrap()
        .trim_end()
        .to_string()
}

#[test]
fn training_extracts_dataset_and_forwards_hyperparameters() {
    let root = TempDir::new().unwrap();
    let layout = JobLayout::training(&root.path().join("opt/ml"));
    write_dataset_archive(&layout.dataset_dir);
    fs::create_dir_all(layout.hyperparameters.parent().unwrap()).unwrap();
    fs::write(
        &layout.hyperparameters,
        r#"{"config": "/opt/ml/input/data/dataset/config.py", "experiment_id": "exp01"}"#,
    )
    .unwrap();

    let outcome = job::train(&layout, &fake_cli(root.path(), 0), &Ui::plain()).unwrap();

    assert_eq!(outcome, JobOutcome::Trained);
    assert!(layout.dataset_dir.join("cifar/labels.txt").is_file());
    assert_eq!(
        invocation(&root),
        "train --config /opt/ml/input/data/dataset/config.py --experiment_id exp01"
    );
}

#[test]
fn conversion_packages_converter_output() {
    let root = TempDir::new().unwrap();
    let layout = JobLayout::processing(&root.path().join("opt/ml/processing"));
    write_dataset_archive(&layout.dataset_dir);
    fs::create_dir_all(&layout.model_dir).unwrap();

    let args = vec!["-e".to_string(), "exp01".to_string()];
    let outcome = job::convert(&layout, &fake_cli(root.path(), 0), &args, &Ui::plain()).unwrap();

    let archive = match outcome {
        JobOutcome::Converted(path) => path,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(archive, layout.converted_dir().join("output.tar.gz"));
    assert_eq!(invocation(&root), "convert -e exp01");

    let mut names: Vec<String> = tar::Archive::new(GzDecoder::new(File::open(&archive).unwrap()))
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert!(names.iter().any(|name| name == "output/models/meta.yaml"));
    assert!(names.iter().all(|name| name.starts_with("output")));
}

#[test]
fn failing_command_is_reported_with_stderr() {
    let root = TempDir::new().unwrap();
    let layout = JobLayout::training(&root.path().join("opt/ml"));
    fs::create_dir_all(layout.hyperparameters.parent().unwrap()).unwrap();
    fs::write(&layout.hyperparameters, "{}").unwrap();

    let failure = job::train(&layout, &fake_cli(root.path(), 3), &Ui::plain()).unwrap_err();
    assert!(failure.message.contains("Return Code: 3"));
    assert!(failure.message.contains("config not found"));

    let path = job::write_failure(&layout.output_dir, &failure).unwrap();
    assert_eq!(path, layout.output_dir.join(FAILURE_FILE));
    let report = fs::read_to_string(path).unwrap();
    assert!(report.starts_with("Exception during training: "));
}

#[test]
fn conversion_without_output_fails() {
    let root = TempDir::new().unwrap();
    let layout = JobLayout::processing(&root.path().join("opt/ml/processing"));
    let script = root.path().join("noop.sh");
    fs::write(&script, "exit 0\n").unwrap();
    let cmd = BlueoilCommand {
        python: "sh".to_string(),
        script: script.to_string_lossy().into_owned(),
    };

    let failure = job::convert(&layout, &cmd, &[], &Ui::plain()).unwrap_err();
    assert!(failure.message.contains("No such file or directory"));
}
