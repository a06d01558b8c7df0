use std::path::Path;

/// Starts sidecar services (databases, caches) a run depends on.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ServiceBootstrap: std::fmt::Debug + Send + Sync {
    async fn start(&self, service: &str, dir: &Path) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Unknown service: {0}")]
    Unknown(String),
    #[error("Service {service} failed to start: {msg}")]
    Failed { service: String, msg: String },
}
