use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_OUTPUT_TYPE, DEFAULT_WORK_DIR};

/// Everything needed to execute one submission.
///
/// The dispatcher owns the request and lends it mutably to each stage in
/// turn: `modify_opts` may touch any field, directive scraping writes `shell`
/// and `github_repo`, the shell stage writes `shell_result`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunRequest {
    pub language: String,
    #[serde(alias = "code")]
    pub solution: String,
    pub setup: Option<String>,
    pub fixture: Option<String>,
    pub test_framework: Option<String>,
    /// Wall-clock budget in milliseconds
    pub timeout: Option<u64>,
    pub services: Vec<String>,
    pub shell: Option<String>,
    pub github_repo: Option<String>,
    pub files: BTreeMap<String, String>,
    pub format: OutputFormat,
    pub debug: bool,
    pub dir: Option<PathBuf>,
    #[serde(skip)]
    pub shell_result: Option<Box<ResultRecord>>,
}

impl RunRequest {
    pub fn new(language: &str, solution: &str) -> Self {
        RunRequest {
            language: language.to_string(),
            solution: solution.to_string(),
            ..Default::default()
        }
    }

    pub fn has_fixture(&self) -> bool {
        self.fixture.as_deref().is_some_and(|f| !f.is_empty())
    }

    pub fn work_dir(&self) -> &Path {
        self.dir.as_deref().unwrap_or(Path::new(DEFAULT_WORK_DIR))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(from = "Option<String>")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

impl From<Option<String>> for OutputFormat {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("json") => OutputFormat::Json,
            _ => OutputFormat::Plain,
        }
    }
}

/// What a strategy hands to the supervisor to start a child process.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub options: ProcessOptions,
    pub stdin: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessOptions {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub clear_env: bool,
}

impl LaunchSpec {
    pub fn new(program: &str) -> Self {
        LaunchSpec {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn arg<S: AsRef<str>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.options.cwd = Some(dir.as_ref().into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.options.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn stdin(mut self, input: &str) -> Self {
        self.stdin = Some(input.to_string());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    MaxBufferReached,
    MaxTimeReached,
}

/// The outcome of one supervised process, or of a failure synthesized in
/// its place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultRecord {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    /// Milliseconds
    pub wall_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub compilation_failure: bool,
    pub output_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<Box<ResultRecord>>,
}

impl ResultRecord {
    /// A record for a run that never produced a process.
    pub fn compilation_failure(stdout: &str, stderr: &str) -> Self {
        ResultRecord {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            compilation_failure: true,
            output_type: DEFAULT_OUTPUT_TYPE.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.status.is_none() && !self.compilation_failure
    }
}
