use tokio::fs;

use crate::core::{
    domain::{LaunchSpec, ResultRecord, RunRequest},
    pipeline::dispatching::RunContext,
    traits::{
        executor::SuperviseOptions,
        strategy::{Strategy, StrategyError},
    },
};
use crate::strategies::interpreted::join_sources;

/// Languages built into a native binary before they run.
#[derive(Debug, Clone)]
pub struct Compiled {
    compiler: String,
    flags: Vec<String>,
    extension: String,
}

impl Compiled {
    pub fn new(compiler: &str, flags: &[&str], extension: &str) -> Self {
        Compiled {
            compiler: compiler.to_string(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
            extension: extension.to_string(),
        }
    }

    /// Builds `name.{ext}` into `name` inside the working directory. The
    /// compiler is supervised like any other child, with the same wall-clock
    /// budget and output caps as the run.
    #[tracing::instrument(skip(self, source, ctx))]
    async fn compile(
        &self,
        name: &str,
        source: &str,
        ctx: &RunContext<'_>,
    ) -> Result<(), StrategyError> {
        let source_name = format!("{}.{}", name, self.extension);
        fs::write(ctx.dir().join(&source_name), source).await?;

        let spec = LaunchSpec::new(&self.compiler)
            .args(&self.flags)
            .arg("-o")
            .arg(name)
            .arg(&source_name);
        let record = ctx
            .supervise(spec, SuperviseOptions::new(ctx.timeout()))
            .await?;

        if !record.is_success() {
            return Err(StrategyError::Compilation {
                stdout: record.stdout,
                stderr: record.stderr,
            });
        }

        tracing::debug!("Compiled {}", source_name);
        Ok(())
    }

    async fn build_and_run(
        &self,
        name: &str,
        sources: &[Option<&str>],
        ctx: &RunContext<'_>,
    ) -> Result<ResultRecord, StrategyError> {
        self.compile(name, &join_sources(sources), ctx).await?;

        let binary = ctx.dir().join(name);
        ctx.run_code(LaunchSpec::new(&binary.to_string_lossy()))
            .await
    }
}

#[async_trait::async_trait]
impl Strategy for Compiled {
    async fn solution_only(
        &self,
        request: &RunRequest,
        ctx: &RunContext<'_>,
    ) -> Result<ResultRecord, StrategyError> {
        self.build_and_run(
            "solution",
            &[request.setup.as_deref(), Some(request.solution.as_str())],
            ctx,
        )
        .await
    }

    async fn test_integration(
        &self,
        request: &RunRequest,
        ctx: &RunContext<'_>,
    ) -> Result<ResultRecord, StrategyError> {
        self.build_and_run(
            "fixture",
            &[
                request.setup.as_deref(),
                Some(request.solution.as_str()),
                request.fixture.as_deref(),
            ],
            ctx,
        )
        .await
    }
}
