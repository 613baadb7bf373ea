//! Triage run configuration.
//!
//! Loaded from an optional TOML file, then overridden from `MUTANT_TRIAGE_*`
//! environment variables, then validated. Relative paths in the file are resolved
//! against `project_dir`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureLimits;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mutant-triage.toml";

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// An explicitly requested config file does not exist.
    #[error("config file {path} does not exist")]
    MissingConfig {
        /// Config path.
        path: PathBuf,
    },
    /// Config file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// An environment override could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
    },
    /// Values are inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one triage run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageConfig {
    /// Project whose tests are executed.
    pub project_dir: PathBuf,
    /// Where events, observations and the summary are written.
    pub output_dir: PathBuf,
    /// Method report produced by the upstream mutation run.
    pub method_report: PathBuf,
    /// Root of the compiled artifacts that are instrumented and mutated.
    pub artifact_root: PathBuf,
    /// File extension of one artifact.
    pub artifact_extension: String,
    /// Capture budget handed to the probe.
    pub capture: CaptureLimits,
    /// Optional per-run test timeout in seconds.
    pub test_timeout_secs: Option<u64>,
    /// Run each test in its own runner process so invocation counters reset per test.
    pub isolate_tests: bool,
    /// Test runner command; test ids are appended as arguments.
    pub runner_command: Vec<String>,
    /// Probe insertion command; artifact bytes on stdin and stdout.
    pub instrumentor_command: Vec<String>,
    /// Mutation command; artifact bytes on stdin and stdout.
    pub mutator_command: Vec<String>,
    /// Keep point files after diffing.
    pub retain_snapshots: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        let project_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_project(project_dir)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    project_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    method_report: Option<PathBuf>,
    artifact_root: Option<PathBuf>,
    artifact_extension: Option<String>,
    capture: Option<CaptureLimits>,
    test_timeout_secs: Option<u64>,
    isolate_tests: Option<bool>,
    runner_command: Option<Vec<String>>,
    instrumentor_command: Option<Vec<String>>,
    mutator_command: Option<Vec<String>>,
    retain_snapshots: Option<bool>,
}

impl TriageConfig {
    /// Defaults rooted at `project_dir`.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let target = project_dir.join("target");
        Self {
            output_dir: target.join("mutant-triage"),
            method_report: target.join("methods.json"),
            artifact_root: target.join("classes"),
            artifact_extension: "class".to_string(),
            capture: CaptureLimits::default(),
            test_timeout_secs: None,
            isolate_tests: true,
            runner_command: Vec::new(),
            instrumentor_command: Vec::new(),
            mutator_command: Vec::new(),
            retain_snapshots: true,
            project_dir,
        }
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path_buf = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = std::fs::read_to_string(&path_buf).map_err(|source| ConfigError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
                path: path_buf.clone(),
                source,
            })?
        } else if path.is_some() {
            return Err(ConfigError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document; unset paths default relative to its `project_dir`.
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(raw)?;
        let mut cfg = match file.project_dir {
            Some(dir) => Self::for_project(dir),
            None => Self::default(),
        };

        let project_dir = cfg.project_dir.clone();
        let resolve = |p: PathBuf| if p.is_relative() { project_dir.join(p) } else { p };
        if let Some(dir) = file.output_dir {
            cfg.output_dir = resolve(dir);
        }
        if let Some(report) = file.method_report {
            cfg.method_report = resolve(report);
        }
        if let Some(root) = file.artifact_root {
            cfg.artifact_root = resolve(root);
        }
        if let Some(ext) = file.artifact_extension {
            cfg.artifact_extension = ext;
        }
        if let Some(capture) = file.capture {
            cfg.capture = capture;
        }
        cfg.test_timeout_secs = file.test_timeout_secs.or(cfg.test_timeout_secs);
        if let Some(isolate) = file.isolate_tests {
            cfg.isolate_tests = isolate;
        }
        if let Some(command) = file.runner_command {
            cfg.runner_command = command;
        }
        if let Some(command) = file.instrumentor_command {
            cfg.instrumentor_command = command;
        }
        if let Some(command) = file.mutator_command {
            cfg.mutator_command = command;
        }
        if let Some(retain) = file.retain_snapshots {
            cfg.retain_snapshots = retain;
        }
        Ok(cfg)
    }

    /// Apply `MUTANT_TRIAGE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(dir) = var("MUTANT_TRIAGE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(depth) = parse_var(&var, "MUTANT_TRIAGE_MAX_DEPTH")? {
            self.capture.max_depth = depth;
        }
        if let Some(nodes) = parse_var(&var, "MUTANT_TRIAGE_MAX_NODES")? {
            self.capture.max_nodes = nodes;
        }
        if let Some(secs) = parse_var(&var, "MUTANT_TRIAGE_TIMEOUT_SECS")? {
            self.test_timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Reject configurations that cannot produce observations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.max_depth == 0 {
            return Err(ConfigError::Invalid("capture.max_depth must be at least 1".to_string()));
        }
        if self.capture.max_nodes == 0 {
            return Err(ConfigError::Invalid("capture.max_nodes must be at least 1".to_string()));
        }
        if self.artifact_extension.trim().is_empty() {
            return Err(ConfigError::Invalid("artifact_extension must not be empty".to_string()));
        }
        if self.test_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("test_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Set project directory.
    ///
    /// Paths still at their defaults for the previous project are re-derived from the
    /// new one; paths set explicitly are kept.
    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        let previous = Self::for_project(self.project_dir.clone());
        let next = Self::for_project(project_dir);
        if self.output_dir == previous.output_dir {
            self.output_dir = next.output_dir;
        }
        if self.method_report == previous.method_report {
            self.method_report = next.method_report;
        }
        if self.artifact_root == previous.artifact_root {
            self.artifact_root = next.artifact_root;
        }
        self.project_dir = next.project_dir;
        self
    }

    /// Set output directory.
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Set method report path.
    pub fn with_method_report(mut self, method_report: impl Into<PathBuf>) -> Self {
        self.method_report = method_report.into();
        self
    }

    /// Set artifact root.
    pub fn with_artifact_root(mut self, artifact_root: impl Into<PathBuf>) -> Self {
        self.artifact_root = artifact_root.into();
        self
    }

    /// Set capture limits.
    pub fn with_capture(mut self, capture: CaptureLimits) -> Self {
        self.capture = capture;
        self
    }

    /// Set timeout in seconds.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.test_timeout_secs = Some(timeout_secs);
        self
    }

    /// Run each test in its own runner process, or all tests in one.
    pub fn with_isolate_tests(mut self, isolate_tests: bool) -> Self {
        self.isolate_tests = isolate_tests;
        self
    }

    /// Keep or delete point files after diffing.
    pub fn with_retain_snapshots(mut self, retain: bool) -> Self {
        self.retain_snapshots = retain;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn default_paths_and_builder_overrides_work() {
        let default = TriageConfig::for_project("/work/app");
        assert_eq!(default.output_dir, PathBuf::from("/work/app/target/mutant-triage"));
        assert_eq!(default.method_report, PathBuf::from("/work/app/target/methods.json"));
        assert!(default.retain_snapshots);

        let cfg = TriageConfig::for_project("/work/app")
            .with_output_dir("/tmp/out")
            .with_method_report("/tmp/methods.json")
            .with_timeout_secs(42)
            .with_retain_snapshots(false);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.test_timeout_secs, Some(42));
        assert!(!cfg.retain_snapshots);
    }

    #[test]
    fn changing_project_moves_default_paths_only() {
        let cfg = TriageConfig::for_project("/cwd")
            .with_artifact_root("/shared/classes")
            .with_project_dir("/proj");
        assert_eq!(cfg.project_dir, PathBuf::from("/proj"));
        assert_eq!(cfg.method_report, PathBuf::from("/proj/target/methods.json"));
        assert_eq!(cfg.output_dir, PathBuf::from("/proj/target/mutant-triage"));
        assert_eq!(cfg.artifact_root, PathBuf::from("/shared/classes"));

        let from_file = TriageConfig::from_toml(
            r#"
            project_dir = "/cwd"
            output_dir = "triage-out"
            "#,
        )
        .expect("config should parse")
        .with_project_dir("/proj");
        assert_eq!(from_file.output_dir, PathBuf::from("/cwd/triage-out"));
        assert_eq!(from_file.method_report, PathBuf::from("/proj/target/methods.json"));
    }

    #[test]
    fn toml_paths_resolve_against_project_dir() {
        let cfg = TriageConfig::from_toml(
            r#"
            project_dir = "/work/app"
            output_dir = "triage-out"
            runner_command = ["./run-tests.sh"]

            [capture]
            max_depth = 4
            "#,
        )
        .expect("config should parse");
        assert_eq!(cfg.output_dir, PathBuf::from("/work/app/triage-out"));
        assert_eq!(cfg.artifact_root, PathBuf::from("/work/app/target/classes"));
        assert_eq!(cfg.capture.max_depth, 4);
        assert_eq!(cfg.capture.max_nodes, CaptureLimits::default().max_nodes);
        assert_eq!(cfg.runner_command, vec!["./run-tests.sh".to_string()]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(TriageConfig::from_toml("mystery = 1").is_err());
    }

    #[test]
    fn env_overrides_apply_and_reject_garbage() {
        let env: HashMap<&str, &str> = [
            ("MUTANT_TRIAGE_OUTPUT_DIR", "/env/out"),
            ("MUTANT_TRIAGE_MAX_NODES", "128"),
            ("MUTANT_TRIAGE_TIMEOUT_SECS", " 30 "),
        ]
        .into_iter()
        .collect();
        let mut cfg = TriageConfig::for_project("/p");
        cfg.apply_overrides_from(|name| env.get(name).map(|v| v.to_string()))
            .expect("overrides should apply");
        assert_eq!(cfg.output_dir, PathBuf::from("/env/out"));
        assert_eq!(cfg.capture.max_nodes, 128);
        assert_eq!(cfg.test_timeout_secs, Some(30));

        let err = cfg
            .apply_overrides_from(|name| {
                (name == "MUTANT_TRIAGE_MAX_DEPTH").then(|| "deep".to_string())
            })
            .expect_err("garbage should be rejected");
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn validate_rejects_empty_budgets() {
        let cfg = TriageConfig::for_project("/p").with_capture(CaptureLimits {
            max_depth: 0,
            max_nodes: 10,
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempdir().expect("tempdir should be created");
        let err = TriageConfig::load(Some(&tmp.path().join("absent.toml")))
            .expect_err("missing explicit config should fail");
        assert!(matches!(err, ConfigError::MissingConfig { .. }));
    }
}
