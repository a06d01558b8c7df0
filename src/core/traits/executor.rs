use std::path::PathBuf;
use std::time::Duration;

use crate::core::domain::{LaunchSpec, ResultRecord};

/// Spawns and supervises a single child process.
///
/// Implementations never fail once the child exists: timeouts, output caps
/// and broken pipes all end in an `Ok(ResultRecord)`. `Err` means no process
/// was started.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Executor: std::fmt::Debug + Send + Sync {
    async fn supervise(
        &self,
        spec: LaunchSpec,
        opts: SuperviseOptions,
    ) -> Result<ResultRecord, ExecError>;
}

#[derive(Clone, Debug, Default)]
pub struct SuperviseOptions {
    pub timeout: Duration,
    /// Set for provisioning steps. Leaves the child's process group alive
    /// after completion so that daemons started by setup scripts survive.
    pub compiling: bool,
    /// Removed once the record is finalized.
    pub temp_files: Vec<PathBuf>,
}

impl SuperviseOptions {
    pub fn new(timeout: Duration) -> Self {
        SuperviseOptions {
            timeout,
            ..Default::default()
        }
    }

    pub fn compiling(mut self) -> Self {
        self.compiling = true;
        self
    }

    pub fn temp_file(mut self, path: PathBuf) -> Self {
        self.temp_files.push(path);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("Error: spawn {program} {msg}")]
    Spawn { program: String, msg: String },
}
