use std::path::Path;

use crate::core::{
    domain::{ResultRecord, RunRequest},
    pipeline::{dispatching::RunContext, provisioning::write_files},
    traits::executor::ExecError,
};
use crate::constants::DEFAULT_OUTPUT_TYPE;

/// Per-language behaviour driven by the dispatcher.
///
/// Only the two execution modes are mandatory; every other hook defaults to
/// a no-op (or, for `files`, to writing the blobs verbatim).
#[async_trait::async_trait]
pub trait Strategy: Send + Sync {
    /// Runs the solution on its own. Chosen when the request has no fixture.
    async fn solution_only(
        &self,
        request: &RunRequest,
        ctx: &RunContext<'_>,
    ) -> Result<ResultRecord, StrategyError>;

    /// Runs the solution against the request's fixture.
    async fn test_integration(
        &self,
        request: &RunRequest,
        ctx: &RunContext<'_>,
    ) -> Result<ResultRecord, StrategyError>;

    /// Adjusts the request before provisioning, e.g. to add implied services.
    fn modify_opts(&self, _request: &mut RunRequest) {}

    async fn before(&self, _request: &RunRequest) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Materializes `request.files`. Only called when there are files.
    async fn files(&self, request: &RunRequest, dir: &Path) -> Result<(), StrategyError> {
        write_files(dir, &request.files).await?;
        Ok(())
    }

    fn transform_buffer(&self, _record: &mut ResultRecord) {}

    /// Replacement for stdout derived from run artifacts.
    fn transform_output(&self, _request: &RunRequest) -> Option<String> {
        None
    }

    fn sanitize_stderr(&self, text: &str) -> String {
        text.to_string()
    }

    fn sanitize_stdout(&self, text: &str) -> String {
        text.to_string()
    }

    fn output_type(&self) -> &str {
        DEFAULT_OUTPUT_TYPE
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// A build step run by the strategy failed; its output is reported as-is.
    #[error("Compilation failed")]
    Compilation { stdout: String, stderr: String },
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl StrategyError {
    pub fn message<S: Into<String>>(msg: S) -> Self {
        StrategyError::Message(msg.into())
    }
}
