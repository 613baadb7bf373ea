#![cfg(all(feature = "cli", any(target_os = "linux", target_os = "macos")))]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::tempdir;

const REPORT: &str = r#"{"methods": [
  {"name": "add", "description": "(II)I", "class": "Calc", "package": "com/example",
   "classification": "pseudo-tested",
   "mutations": [
     {"mutator": "MATH", "status": "SURVIVED", "tests": ["CalcTest.adds"]},
     {"mutator": "SLOW", "status": "SURVIVED", "tests": ["CalcTest.adds"]},
     {"mutator": "NEGATE", "status": "SURVIVED", "tests": ["CalcTest.adds"]}
   ]}
]}"#;

const RUNNER: &str = r#"#!/usr/bin/env sh
set -e
artifact=classes/com/example/Calc.class
if grep -q SLOW "$artifact"; then
  sleep 5
fi
value=4
if grep -q NEGATE "$artifact"; then
  value=5
fi
mkdir -p "$MUTANT_TRIAGE_RESULTS_DIR"
cat > "$MUTANT_TRIAGE_RESULTS_DIR/point-$MUTANT_TRIAGE_TEST_ID.json" <<EOF
{"variant": "$MUTANT_TRIAGE_VARIANT",
 "point": {"scope": "$MUTANT_TRIAGE_TEST_ID", "class": "com.example.Calc", "method": "add",
           "descriptor": "(II)I", "invocation": 0},
 "snapshot": {"nodes": [{"id": 0, "type_tag": "int", "body": {"shape": "scalar", "value": {"kind": "int", "value": $value}}}],
              "receiver": null, "arguments": [],
              "return_value": {"root": "captured", "link": {"link": "node", "node": 0}}}}
EOF
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("script should be written");
    fs::set_permissions(&path, PermissionsExt::from_mode(0o755))
        .expect("script should be executable");
    path
}

struct Project {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    config: PathBuf,
    artifact: PathBuf,
}

fn project() -> Project {
    let tmp = tempdir().expect("tempdir should be created");
    let root = tmp.path().to_path_buf();
    let bin = root.join("bin");
    fs::create_dir_all(&bin).expect("bin dir should be created");
    let runner = write_script(&bin, "run-tests", RUNNER);
    let instrumentor = write_script(&bin, "instrument", "#!/usr/bin/env sh\ncat\nprintf '|probe'\n");
    let mutator = write_script(&bin, "mutate", "#!/usr/bin/env sh\ncat\nprintf '|%s' \"$4\"\n");

    let artifact = root.join("classes/com/example/Calc.class");
    fs::create_dir_all(artifact.parent().expect("class dir")).expect("class dir should be created");
    fs::write(&artifact, "CALC").expect("class file should be written");
    fs::write(root.join("methods.json"), REPORT).expect("report should be written");

    let config = root.join("mutant-triage.toml");
    fs::write(
        &config,
        format!(
            r#"project_dir = "{root}"
method_report = "methods.json"
artifact_root = "classes"
output_dir = "triage"
test_timeout_secs = 1
runner_command = ["{runner}"]
instrumentor_command = ["{instrumentor}"]
mutator_command = ["{mutator}"]
"#,
            root = root.display(),
            runner = runner.display(),
            instrumentor = instrumentor.display(),
            mutator = mutator.display(),
        ),
    )
    .expect("config should be written");

    Project {
        _tmp: tmp,
        root,
        config,
        artifact,
    }
}

fn run_cli(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mutant-triage"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("cli should start")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn observe_classifies_mutants_and_restores_the_class_file() {
    let project = project();
    let config = project.config.to_str().expect("utf-8 path");

    let output = run_cli(&["observe", "--config", config], &project.root);
    assert!(
        output.status.success(),
        "observe failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).contains("equivalent=1, distinguishable=1, incomparable=1"));
    assert_eq!(fs::read_to_string(&project.artifact).expect("class file"), "CALC");

    let status = run_cli(&["status", "--config", config], &project.root);
    assert!(status.status.success());
    assert!(stdout(&status).contains("completed: true"));

    let summary = run_cli(&["summary", "--config", config], &project.root);
    assert!(summary.status.success());
    let summary: serde_json::Value =
        serde_json::from_slice(&summary.stdout).expect("summary should be json");
    assert_eq!(summary["summary"]["distinguishable"], 1);
    assert_eq!(summary["summary"]["incomparable"], 1);

    let method_dir = project.root.join("triage/observations/methods/0");
    let baseline = method_dir.join("original/points/point-CalcTest.adds.json");
    let negate = method_dir.join("2/points/point-CalcTest.adds.json");
    let diff = run_cli(
        &[
            "diff",
            baseline.to_str().expect("utf-8 path"),
            negate.to_str().expect("utf-8 path"),
        ],
        &project.root,
    );
    assert!(diff.status.success());
    let report: serde_json::Value = serde_json::from_slice(&diff.stdout).expect("diff should be json");
    assert_eq!(report["classification"], "distinguishable");
    assert_eq!(report["differences"][0]["path"], "returnValue");
}

#[test]
fn unreadable_report_fails_the_run() {
    let project = project();
    let config = project.config.to_str().expect("utf-8 path");

    let output = run_cli(
        &["observe", "--config", config, "--report", "missing.json"],
        &project.root,
    );
    assert!(!output.status.success());
    assert_eq!(fs::read_to_string(&project.artifact).expect("class file"), "CALC");
}

#[test]
fn explicit_missing_config_is_rejected() {
    let project = project();
    let output = run_cli(&["status", "--config", "nope.toml"], &project.root);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope.toml"));
}
