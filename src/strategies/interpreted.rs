use itertools::Itertools;
use tokio::fs;

use crate::core::{
    domain::{LaunchSpec, ResultRecord, RunRequest},
    pipeline::dispatching::RunContext,
    traits::strategy::{Strategy, StrategyError},
};

/// Languages run straight from source by an interpreter.
#[derive(Debug, Clone)]
pub struct Interpreted {
    program: String,
    args: Vec<String>,
    extension: String,
}

impl Interpreted {
    pub fn new(program: &str, args: &[&str], extension: &str) -> Self {
        Interpreted {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            extension: extension.to_string(),
        }
    }

    async fn run_file(
        &self,
        name: &str,
        sources: &[Option<&str>],
        ctx: &RunContext<'_>,
    ) -> Result<ResultRecord, StrategyError> {
        let file_name = format!("{}.{}", name, self.extension);
        fs::write(ctx.dir().join(&file_name), join_sources(sources)).await?;

        let spec = LaunchSpec::new(&self.program)
            .args(&self.args)
            .arg(&file_name);
        ctx.run_code(spec).await
    }
}

#[async_trait::async_trait]
impl Strategy for Interpreted {
    async fn solution_only(
        &self,
        request: &RunRequest,
        ctx: &RunContext<'_>,
    ) -> Result<ResultRecord, StrategyError> {
        self.run_file(
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
        self.run_file(
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

/// Concatenates the present, non-empty sources separated by a blank line.
pub(crate) fn join_sources(sources: &[Option<&str>]) -> String {
    sources
        .iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .join("\n\n")
}
