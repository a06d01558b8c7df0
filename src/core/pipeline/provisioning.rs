use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use uuid::Uuid;

use crate::constants::{
    GITHUB_API_REPOS, STATUS_DOWNLOAD, STATUS_EVENT, STATUS_SERVICES, STATUS_SHELL,
};
use crate::core::{
    directives,
    domain::{LaunchSpec, ResultRecord, RunRequest},
    traits::{
        executor::{ExecError, Executor, SuperviseOptions},
        publisher::StatusPublisher,
        services::{ServiceBootstrap, ServiceError},
        strategy::{Strategy, StrategyError},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Failed to download {repo}: {msg}")]
    Download { repo: String, msg: String },
    #[error("Failed to run setup script: {0}")]
    Shell(ExecError),
    #[error("Failed to write files: {0}")]
    Files(StrategyError),
}

/// Prepares the working directory before a strategy runs. Stages run in a
/// fixed order and each is skipped when the request does not ask for it:
/// services, remote content, files, shell pre-script.
#[derive(Debug, Clone)]
pub struct Provisioner {
    executor: Arc<dyn Executor>,
    services: Arc<dyn ServiceBootstrap>,
    publisher: Arc<dyn StatusPublisher>,
    shell_timeout: Duration,
}

impl Provisioner {
    pub fn new(
        executor: Arc<dyn Executor>,
        services: Arc<dyn ServiceBootstrap>,
        publisher: Arc<dyn StatusPublisher>,
        shell_timeout: Duration,
    ) -> Self {
        Provisioner {
            executor,
            services,
            publisher,
            shell_timeout,
        }
    }

    /// Writes: `shell`, `github_repo` (from setup directives) and
    /// `shell_result`.
    #[tracing::instrument(skip_all, fields(language = %request.language))]
    pub async fn provision(
        &self,
        request: &mut RunRequest,
        strategy: &dyn Strategy,
    ) -> Result<(), ProvisionError> {
        directives::apply(request);

        self.start_services(request).await?;
        self.download_repo(request).await?;
        self.setup_files(request, strategy).await?;
        self.run_shell(request).await?;

        Ok(())
    }

    async fn start_services(&self, request: &RunRequest) -> Result<(), ProvisionError> {
        if request.services.is_empty() {
            return Ok(());
        }

        self.publisher.publish(STATUS_EVENT, STATUS_SERVICES);
        for service in &request.services {
            tracing::debug!("Starting service {}", service);
            self.services.start(service, request.work_dir()).await?;
        }

        Ok(())
    }

    async fn download_repo(&self, request: &RunRequest) -> Result<(), ProvisionError> {
        let Some(repo) = request.github_repo.as_deref() else {
            return Ok(());
        };

        let url = github_tarball_url(repo);
        tracing::debug!("Downloading {}", url);
        self.publisher.publish(STATUS_EVENT, STATUS_DOWNLOAD);

        let script = format!(
            "cd {} && wget -qO- {} | tar xvz --strip-components=1",
            request.work_dir().display(),
            url
        );
        let record = self
            .run_script(&script, request.work_dir())
            .await
            .map_err(|e| ProvisionError::Download {
                repo: repo.to_string(),
                msg: e.to_string(),
            })?;

        if !record.is_success() {
            return Err(ProvisionError::Download {
                repo: repo.to_string(),
                msg: record.stderr,
            });
        }

        Ok(())
    }

    async fn setup_files(
        &self,
        request: &RunRequest,
        strategy: &dyn Strategy,
    ) -> Result<(), ProvisionError> {
        if request.files.is_empty() {
            return Ok(());
        }

        strategy
            .files(request, request.work_dir())
            .await
            .map_err(ProvisionError::Files)
    }

    async fn run_shell(&self, request: &mut RunRequest) -> Result<(), ProvisionError> {
        let Some(shell) = request.shell.as_deref() else {
            return Ok(());
        };

        self.publisher.publish(STATUS_EVENT, STATUS_SHELL);
        let record = self
            .run_script(shell, request.work_dir())
            .await
            .map_err(ProvisionError::Shell)?;
        tracing::debug!(exit_code = ?record.exit_code, "Setup script finished");

        request.shell_result = Some(Box::new(record));
        Ok(())
    }

    /// Runs `script` with bash under its own timeout. The script file is
    /// removed by the executor once the run completes.
    async fn run_script(&self, script: &str, dir: &Path) -> Result<ResultRecord, ExecError> {
        let path = std::env::temp_dir().join(format!("shovel_shell_{}.sh", Uuid::new_v4()));
        fs::write(&path, format!("#!/bin/bash\n{}", script))
            .await
            .map_err(|e| ExecError::Spawn {
                program: "bash".to_string(),
                msg: format!("failed to write {}: {}", path.display(), e),
            })?;

        let spec = LaunchSpec::new("bash")
            .arg(path.to_string_lossy())
            .cwd(dir);
        let opts = SuperviseOptions::new(self.shell_timeout)
            .compiling()
            .temp_file(path);

        self.executor.supervise(spec, opts).await
    }
}

/// `owner/repo` becomes `https://api.github.com/repos/owner/repo/tarball`.
pub fn github_tarball_url(repo: &str) -> String {
    let mut url = repo.trim().to_string();
    if !url.contains("/tarball") {
        url.push_str("/tarball");
    }
    if !url.contains("api.github.com") {
        url.insert_str(0, GITHUB_API_REPOS);
    }
    url
}

/// Writes every blob verbatim under `dir`, creating parent directories.
/// Names must stay inside `dir`.
pub async fn write_files(dir: &Path, files: &BTreeMap<String, String>) -> io::Result<()> {
    for (name, content) in files {
        let path = contained_path(dir, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        tracing::debug!("Wrote {}", path.display());
    }
    Ok(())
}

fn contained_path(dir: &Path, name: &str) -> io::Result<PathBuf> {
    let relative = Path::new(name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

    if escapes || name.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file name: {}", name),
        ));
    }
    Ok(dir.join(relative))
}
