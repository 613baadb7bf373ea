//! Collaborator contracts and their command-line adapters.
//!
//! The orchestrator never manipulates artifacts or runs tests itself. It goes through
//! [`Instrumentor`], [`Mutator`] and [`TestRunner`]; the `Command*` adapters implement
//! them by spawning external programs.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::config::TriageConfig;
use super::records::{MethodUnderTest, MutationCandidate};
use super::store::{StoreError, VariantLabel};
use crate::capture::CaptureLimits;
use crate::probe::{MAX_DEPTH_ENV, MAX_NODES_ENV, RESULTS_DIR_ENV, TEST_ID_ENV, VARIANT_ENV};

/// Producing an artifact variant failed. Skips the rest of the method.
#[derive(Debug, Error)]
pub enum InstrumentationError {
    /// Inserting the probe failed.
    #[error("probe insertion failed for {method}: {details}")]
    Probe {
        /// Method display name.
        method: String,
        /// Failure detail.
        details: String,
    },
    /// Applying a mutation failed.
    #[error("mutation {candidate} could not be applied: {details}")]
    Mutation {
        /// Candidate id.
        candidate: String,
        /// Failure detail.
        details: String,
    },
    /// The artifact could not be read or written.
    #[error("artifact {location} is not accessible: {source}")]
    Artifact {
        /// Artifact location.
        location: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Running the tests of one variant produced no usable observation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// No runner command is configured.
    #[error("no test runner command configured")]
    NotConfigured,
    /// Runner process could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Runner exceeded its time budget and was killed.
    #[error("test run timed out after {secs}s")]
    TimedOut {
        /// Budget in seconds.
        secs: u64,
    },
    /// Runner was terminated abnormally.
    #[error("test runner crashed: {0}")]
    Crashed(String),
    /// IO failure around the runner process.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Point files written by the probe could not be read.
    #[error("observations could not be read: {0}")]
    Observations(#[from] StoreError),
}

/// Tests to run for one variant, and where its observations go.
#[derive(Debug, Clone, Copy)]
pub struct TestRun<'a> {
    /// Test ids to execute.
    pub tests: &'a BTreeSet<String>,
    /// Installed variant.
    pub variant: &'a VariantLabel,
    /// Results directory announced to the probe.
    pub points_dir: &'a Path,
    /// File receiving the runner output; appended to.
    pub log_path: &'a Path,
}

/// Exit status summary of a completed test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOutcome {
    /// Runner processes started.
    pub processes: usize,
    /// Processes that exited non-zero.
    pub failed: usize,
    /// First non-zero exit code.
    pub exit_code: Option<i32>,
}

impl RunOutcome {
    /// True when every process exited successfully.
    pub fn passed(&self) -> bool {
        self.failed == 0
    }
}

/// Inserts the observation probe into an artifact.
pub trait Instrumentor {
    /// Return a copy of `artifact` where `method` reports its calls to the probe.
    fn insert_probe(
        &self,
        artifact: &[u8],
        method: &MethodUnderTest,
    ) -> Result<Vec<u8>, InstrumentationError>;
}

/// Applies one mutation to an artifact.
pub trait Mutator {
    /// Return a copy of `artifact` with `candidate` applied.
    fn apply(
        &self,
        artifact: &[u8],
        candidate: &MutationCandidate,
    ) -> Result<Vec<u8>, InstrumentationError>;
}

/// Executes tests against whatever artifact is installed.
///
/// Failing tests still produce observations and are not an error.
pub trait TestRunner {
    /// Run `request.tests` and wait for completion.
    fn run(&self, request: &TestRun<'_>) -> Result<RunOutcome, ExecutionError>;
}

/// Runs an external test command with the probe environment set.
///
/// Test ids are appended as arguments. With isolation on, each test gets its own
/// process and `MUTANT_TRIAGE_TEST_ID`, so invocation counters are scoped per test.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: Vec<String>,
    working_dir: PathBuf,
    limits: CaptureLimits,
    timeout: Option<Duration>,
    isolate_tests: bool,
}

impl CommandTestRunner {
    /// Runner executing `command` from `working_dir`.
    pub fn new(command: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
            limits: CaptureLimits::default(),
            timeout: None,
            isolate_tests: true,
        }
    }

    /// Runner set up from `config`.
    pub fn from_config(config: &TriageConfig) -> Self {
        let mut runner = Self::new(config.runner_command.clone(), &config.project_dir)
            .with_limits(config.capture)
            .with_isolation(config.isolate_tests);
        if let Some(secs) = config.test_timeout_secs {
            runner = runner.with_timeout(Duration::from_secs(secs));
        }
        runner
    }

    /// Capture limits announced to the probe.
    pub fn with_limits(mut self, limits: CaptureLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Kill a runner process that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// One process per test (`true`) or one process for all tests.
    pub fn with_isolation(mut self, isolate_tests: bool) -> Self {
        self.isolate_tests = isolate_tests;
        self
    }

    fn spawn(
        &self,
        request: &TestRun<'_>,
        tests: &[&String],
        log: &File,
    ) -> Result<Child, ExecutionError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(ExecutionError::NotConfigured)?;
        let mut command = Command::new(program);
        command
            .args(args)
            .args(tests)
            .current_dir(&self.working_dir)
            .env(RESULTS_DIR_ENV, request.points_dir)
            .env(VARIANT_ENV, request.variant.as_str())
            .env(MAX_DEPTH_ENV, self.limits.max_depth.to_string())
            .env(MAX_NODES_ENV, self.limits.max_nodes.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?));
        // Own process group, so a timeout also reaches the runner's children.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        match tests {
            [single] if self.isolate_tests => {
                command.env(TEST_ID_ENV, single.as_str());
            }
            _ => {
                command.env_remove(TEST_ID_ENV);
            }
        }
        command.spawn().map_err(|source| ExecutionError::Spawn {
            program: program.clone(),
            source,
        })
    }
}

impl TestRunner for CommandTestRunner {
    fn run(&self, request: &TestRun<'_>) -> Result<RunOutcome, ExecutionError> {
        if let Some(parent) = request.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(request.points_dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(request.log_path)?;
        if request.tests.is_empty() {
            tracing::debug!(variant = %request.variant, "no tests selected; runner not started");
            return Ok(RunOutcome::default());
        }

        let all: Vec<&String> = request.tests.iter().collect();
        let batches: Vec<&[&String]> = if self.isolate_tests {
            all.chunks(1).collect()
        } else {
            vec![all.as_slice()]
        };

        let mut outcome = RunOutcome::default();
        for batch in batches {
            tracing::debug!(variant = %request.variant, tests = batch.len(), "starting test runner");
            let mut child = self.spawn(request, batch, &log)?;
            let status = wait_with_timeout(&mut child, self.timeout)?;
            outcome.processes += 1;
            match status.code() {
                Some(0) => {}
                Some(code) => {
                    outcome.failed += 1;
                    outcome.exit_code.get_or_insert(code);
                }
                None => return Err(ExecutionError::Crashed(format!("terminated by {status}"))),
            }
        }
        Ok(outcome)
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus, ExecutionError> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() > timeout {
            kill_process_group(child);
            let _ = child.wait();
            return Err(ExecutionError::TimedOut {
                secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(group, Signal::SIGKILL) {
        tracing::debug!(pid = child.id(), error = %err, "process group kill failed; killing runner only");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

/// Pipe `input` through `command` with `args` appended; returns stdout.
fn pipe_through(command: &[String], args: &[&str], input: &[u8]) -> Result<Vec<u8>, String> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| "no command configured".to_string())?;
    let mut child = Command::new(program)
        .args(rest)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| format!("failed to spawn `{program}`: {err}"))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| "child stdin unavailable".to_string())?;
    let output = std::thread::scope(|scope| {
        scope.spawn(move || {
            // A child that exits early closes the pipe; its exit status reports that.
            let _ = stdin.write_all(input);
        });
        child.wait_with_output()
    })
    .map_err(|err| format!("failed to wait for `{program}`: {err}"))?;

    if !output.status.success() {
        return Err(format!(
            "`{program}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    if output.stdout.is_empty() {
        return Err(format!("`{program}` produced no output"));
    }
    Ok(output.stdout)
}

/// Probe insertion through an external program.
///
/// Invoked as `<command...> <class> <method> <descriptor>` with the artifact on stdin;
/// the instrumented artifact is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandInstrumentor {
    command: Vec<String>,
}

impl CommandInstrumentor {
    /// Instrumentor spawning `command`.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Instrumentor for CommandInstrumentor {
    fn insert_probe(
        &self,
        artifact: &[u8],
        method: &MethodUnderTest,
    ) -> Result<Vec<u8>, InstrumentationError> {
        let class = method.qualified_class();
        pipe_through(
            &self.command,
            &[&class, &method.name, &method.descriptor],
            artifact,
        )
        .map_err(|details| InstrumentationError::Probe {
            method: method.location().to_string(),
            details,
        })
    }
}

/// Mutation through an external program.
///
/// Invoked as `<command...> <class> <method> <descriptor> <mutator>` with the
/// artifact on stdin; the mutated artifact is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandMutator {
    command: Vec<String>,
}

impl CommandMutator {
    /// Mutator spawning `command`.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Mutator for CommandMutator {
    fn apply(
        &self,
        artifact: &[u8],
        candidate: &MutationCandidate,
    ) -> Result<Vec<u8>, InstrumentationError> {
        let location = &candidate.location;
        pipe_through(
            &self.command,
            &[
                &location.class,
                &location.method,
                &location.descriptor,
                &candidate.mutator,
            ],
            artifact,
        )
        .map_err(|details| InstrumentationError::Mutation {
            candidate: candidate.id.clone(),
            details,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::*;
    use crate::triage::records::{MethodClassification, MethodLocation, MutationStatus};

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script should write");
        let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("script should be executable");
        path.to_string_lossy().into_owned()
    }

    fn method() -> MethodUnderTest {
        MethodUnderTest {
            class: "Calc".to_string(),
            package: "com.example".to_string(),
            name: "add".to_string(),
            descriptor: "(II)I".to_string(),
            classification: MethodClassification::PseudoTested,
            candidates: vec![MutationCandidate {
                id: "com.example.Calc.add(II)I:MATH#0".to_string(),
                ordinal: 0,
                mutator: "MATH".to_string(),
                location: MethodLocation {
                    class: "com.example.Calc".to_string(),
                    method: "add".to_string(),
                    descriptor: "(II)I".to_string(),
                },
                status: MutationStatus::Survived,
                tests: ["t1".to_string(), "t2".to_string()].into_iter().collect(),
            }],
        }
    }

    #[test]
    fn instrumentor_pipes_bytes_and_passes_location() {
        let tmp = tempdir().expect("tempdir should be created");
        let cmd = script(tmp.path(), "probe.sh", "cat; printf '|%s' \"$1\" \"$2\" \"$3\"");
        let out = CommandInstrumentor::new(vec![cmd])
            .insert_probe(b"BYTES", &method())
            .expect("instrumentation should succeed");
        assert_eq!(out, b"BYTES|com.example.Calc|add|(II)I".to_vec());
    }

    #[test]
    fn failing_or_silent_commands_are_instrumentation_errors() {
        let tmp = tempdir().expect("tempdir should be created");
        let failing = script(tmp.path(), "fail.sh", "cat >/dev/null; echo nope >&2; exit 3");
        let err = CommandMutator::new(vec![failing])
            .apply(b"x", &method().candidates[0])
            .expect_err("non-zero exit should fail");
        assert!(err.to_string().contains("nope"));

        let silent = script(tmp.path(), "silent.sh", "cat >/dev/null");
        assert!(
            CommandInstrumentor::new(vec![silent])
                .insert_probe(b"x", &method())
                .is_err()
        );
    }

    #[test]
    fn runner_sets_probe_environment_per_test() {
        let tmp = tempdir().expect("tempdir should be created");
        let cmd = script(
            tmp.path(),
            "run.sh",
            "echo \"$MUTANT_TRIAGE_TEST_ID $MUTANT_TRIAGE_VARIANT $1\" >> \"$MUTANT_TRIAGE_RESULTS_DIR/seen.txt\"",
        );
        let tests = method().tests();
        let points = tmp.path().join("points");
        let log = tmp.path().join("runner.log");
        let variant = VariantLabel::Original;
        let outcome = CommandTestRunner::new(vec![cmd], tmp.path())
            .run(&TestRun {
                tests: &tests,
                variant: &variant,
                points_dir: &points,
                log_path: &log,
            })
            .expect("run should succeed");
        assert_eq!(outcome.processes, 2);
        assert!(outcome.passed());
        let seen = std::fs::read_to_string(points.join("seen.txt")).expect("seen file");
        assert_eq!(seen, "t1 original t1\nt2 original t2\n");
    }

    #[test]
    fn runner_reports_failures_and_timeouts() {
        let tmp = tempdir().expect("tempdir should be created");
        let tests = method().tests();
        let points = tmp.path().join("points");
        let log = tmp.path().join("runner.log");
        let variant = VariantLabel::Original;
        let request = TestRun {
            tests: &tests,
            variant: &variant,
            points_dir: &points,
            log_path: &log,
        };

        let failing = script(tmp.path(), "failing.sh", "exit 1");
        let outcome = CommandTestRunner::new(vec![failing], tmp.path())
            .with_isolation(false)
            .run(&request)
            .expect("failing tests are not an execution error");
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(outcome.processes, 1);

        let slow = script(tmp.path(), "slow.sh", "sleep 5");
        let err = CommandTestRunner::new(vec![slow], tmp.path())
            .with_timeout(Duration::from_millis(100))
            .run(&request)
            .expect_err("slow run should time out");
        assert!(matches!(err, ExecutionError::TimedOut { .. }));

        let err = CommandTestRunner::new(Vec::new(), tmp.path())
            .run(&request)
            .expect_err("empty command should fail");
        assert!(matches!(err, ExecutionError::NotConfigured));
    }

    #[test]
    fn timeout_kills_processes_started_by_the_runner() {
        let tmp = tempdir().expect("tempdir should be created");
        let late = tmp.path().join("late.txt");
        let wrapper = script(
            tmp.path(),
            "wrapper.sh",
            &format!("(sleep 1; echo late > '{}') &\nwait", late.display()),
        );
        let tests = method().tests();
        let points = tmp.path().join("points");
        let log = tmp.path().join("runner.log");
        let variant = VariantLabel::Original;
        let err = CommandTestRunner::new(vec![wrapper], tmp.path())
            .with_isolation(false)
            .with_timeout(Duration::from_millis(200))
            .run(&TestRun {
                tests: &tests,
                variant: &variant,
                points_dir: &points,
                log_path: &log,
            })
            .expect_err("wrapper should time out");
        assert!(matches!(err, ExecutionError::TimedOut { .. }));

        std::thread::sleep(Duration::from_millis(1500));
        assert!(!late.exists(), "background child outlived the timeout");
    }

    #[test]
    fn empty_test_set_starts_no_runner() {
        let tmp = tempdir().expect("tempdir should be created");
        let marker = tmp.path().join("started.txt");
        let cmd = script(tmp.path(), "run.sh", &format!("touch '{}'", marker.display()));
        let tests = BTreeSet::new();
        let points = tmp.path().join("points");
        let log = tmp.path().join("runner.log");
        let variant = VariantLabel::Original;
        let outcome = CommandTestRunner::new(vec![cmd], tmp.path())
            .with_isolation(false)
            .run(&TestRun {
                tests: &tests,
                variant: &variant,
                points_dir: &points,
                log_path: &log,
            })
            .expect("empty run should succeed");
        assert_eq!(outcome.processes, 0);
        assert!(!marker.exists());
    }
}
