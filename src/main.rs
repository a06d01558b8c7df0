use std::io::{self, Read};
use std::panic;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shovel::config::CliArgs;
use shovel::core::domain::RunRequest;
use shovel::core::pipeline::{
    dispatching::Dispatcher, provisioning::Provisioner, reporting::Reporter,
};
use shovel::core::traits::{executor::Executor, publisher::TracingPublisher};
use shovel::native::{executor::NativeExecutor, services::CommandServices};
use shovel::strategies::StrategyRegistry;

const EXIT_INVALID_INPUT: u8 = 2;

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    set_panic_hook();

    let args = CliArgs::parse();
    let config = Arc::new(args.to_config()?);

    let mut request = match read_request(&args) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("Invalid run request: {}", e);
            return Ok(ExitCode::from(EXIT_INVALID_INPUT));
        }
    };
    if let Some(format) = args.format {
        request.format = format;
    }
    request.debug |= args.debug;

    let registry = StrategyRegistry::builtin();
    let Some(strategy) = registry.get(&request.language) else {
        tracing::error!(
            "Unsupported language {:?}, expected one of: {}",
            request.language,
            registry.languages().join(", ")
        );
        return Ok(ExitCode::from(EXIT_INVALID_INPUT));
    };

    let publisher = Arc::new(TracingPublisher);
    let executor: Arc<dyn Executor> =
        Arc::new(NativeExecutor::new(config.limits, publisher.clone()));
    let services = CommandServices::new(
        config.services.clone(),
        executor.clone(),
        config.shell_timeout(),
    );
    let provisioner = Provisioner::new(
        executor.clone(),
        Arc::new(services),
        publisher,
        config.shell_timeout(),
    );
    let dispatcher = Dispatcher::new(executor, provisioner, config.clone()).on_completed(
        |record| tracing::debug!(wall_time = record.wall_time, "Run completed"),
    );

    tracing::info!("Running {} submission", request.language);
    let mut reporter = Reporter::new(io::stdout(), io::stderr());
    dispatcher
        .run(&mut request, strategy.as_ref(), &mut reporter)
        .await?;

    Ok(ExitCode::SUCCESS)
}

fn read_request(args: &CliArgs) -> Result<RunRequest, Box<dyn std::error::Error>> {
    let raw = match &args.request_path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut raw = String::new();
            io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
