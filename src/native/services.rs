use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    domain::LaunchSpec,
    traits::{
        executor::{Executor, SuperviseOptions},
        services::{ServiceBootstrap, ServiceError},
    },
};

/// Starts each service by running a configured shell command, e.g.
/// `redis-server --daemonize yes`.
#[derive(Debug, Clone)]
pub struct CommandServices {
    commands: HashMap<String, String>,
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl CommandServices {
    pub fn new(
        commands: HashMap<String, String>,
        executor: Arc<dyn Executor>,
        timeout: Duration,
    ) -> Self {
        CommandServices {
            commands,
            executor,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl ServiceBootstrap for CommandServices {
    #[tracing::instrument(skip(self))]
    async fn start(&self, service: &str, dir: &Path) -> Result<(), ServiceError> {
        let command = self
            .commands
            .get(service)
            .ok_or_else(|| ServiceError::Unknown(service.to_string()))?;

        let spec = LaunchSpec::new("bash").arg("-c").arg(command).cwd(dir);
        let record = self
            .executor
            .supervise(spec, SuperviseOptions::new(self.timeout).compiling())
            .await
            .map_err(|e| ServiceError::Failed {
                service: service.to_string(),
                msg: e.to_string(),
            })?;

        if !record.is_success() {
            return Err(ServiceError::Failed {
                service: service.to_string(),
                msg: record.stderr,
            });
        }

        tracing::debug!("Service {} started", service);
        Ok(())
    }
}
