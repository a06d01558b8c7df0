use std::any::Any;
use std::io::{self, Write};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::fs;

use crate::config::EngineConfig;
use crate::constants::SOLUTION_INSPECTION_FILE;
use crate::core::{
    domain::{LaunchSpec, ResultRecord, RunRequest},
    pipeline::{provisioning::Provisioner, reporting::Reporter},
    traits::{
        executor::{Executor, SuperviseOptions},
        strategy::{Strategy, StrategyError},
    },
};

pub type CompletionHook = Box<dyn Fn(&ResultRecord) + Send + Sync>;

/// What a strategy gets to work with while one of its modes runs.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    executor: &'a dyn Executor,
    timeout: Duration,
    dir: &'a Path,
}

impl<'a> RunContext<'a> {
    pub fn new(executor: &'a dyn Executor, timeout: Duration, dir: &'a Path) -> Self {
        RunContext {
            executor,
            timeout,
            dir,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn dir(&self) -> &'a Path {
        self.dir
    }

    /// Runs the main process under the resolved timeout. The child starts in
    /// the working directory unless `spec.options.cwd` is set.
    pub async fn run_code(&self, spec: LaunchSpec) -> Result<ResultRecord, StrategyError> {
        self.supervise(spec, SuperviseOptions::new(self.timeout))
            .await
    }

    pub async fn supervise(
        &self,
        mut spec: LaunchSpec,
        opts: SuperviseOptions,
    ) -> Result<ResultRecord, StrategyError> {
        if spec.options.cwd.is_none() {
            spec.options.cwd = Some(self.dir.to_path_buf());
        }
        Ok(self.executor.supervise(spec, opts).await?)
    }

    /// Builds a failure record without spawning anything.
    pub fn fail(&self, error: &StrategyError, stdout: &str, stderr: &str) -> ResultRecord {
        synthesize_failure(error, stdout, stderr)
    }
}

/// Turns an error into the record reported in place of a run.
///
/// Compilation errors already carry the build output and are wrapped as-is.
/// Anything else reports its message on stderr, followed by `stderr` unless
/// the message already contains it.
pub fn synthesize_failure(error: &StrategyError, stdout: &str, stderr: &str) -> ResultRecord {
    if let StrategyError::Compilation { stdout, stderr } = error {
        return ResultRecord::compilation_failure(stdout, stderr);
    }

    let mut message = error.to_string();
    if !stderr.is_empty() && !message.contains(stderr) {
        message.push_str(stderr);
    }

    ResultRecord::compilation_failure(stdout, &message)
}

/// Drives one request from provisioning to a finished record.
pub struct Dispatcher {
    executor: Arc<dyn Executor>,
    provisioner: Provisioner,
    config: Arc<EngineConfig>,
    on_completed: Vec<CompletionHook>,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn Executor>,
        provisioner: Provisioner,
        config: Arc<EngineConfig>,
    ) -> Self {
        Dispatcher {
            executor,
            provisioner,
            config,
            on_completed: Vec::new(),
        }
    }

    /// Registers a hook that receives the reported record once a run is
    /// complete.
    pub fn on_completed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ResultRecord) + Send + Sync + 'static,
    {
        self.on_completed.push(Box::new(hook));
        self
    }

    /// Dispatches, reports, then runs the completion hooks.
    pub async fn run<O: Write, E: Write>(
        &self,
        request: &mut RunRequest,
        strategy: &dyn Strategy,
        reporter: &mut Reporter<O, E>,
    ) -> io::Result<ResultRecord> {
        let record = self.dispatch(request, strategy).await;
        let record = reporter.report(request, record, strategy)?;

        for hook in &self.on_completed {
            hook(&record);
        }

        Ok(record)
    }

    /// Never fails: every error on the way is folded into the returned
    /// record.
    ///
    /// Writes: `dir` (when unset), then whatever `modify_opts` and the
    /// provisioning stages write.
    #[tracing::instrument(skip_all, fields(language = %request.language))]
    pub async fn dispatch(
        &self,
        request: &mut RunRequest,
        strategy: &dyn Strategy,
    ) -> ResultRecord {
        if request.dir.is_none() {
            request.dir = Some(self.config.work_dir.clone());
        }
        write_solution(request).await;

        strategy.modify_opts(request);

        if let Err(e) = self.provisioner.provision(request, strategy).await {
            tracing::warn!("Provisioning failed: {}", e);
            return synthesize_failure(&StrategyError::message(e.to_string()), "", "");
        }

        let request: &RunRequest = request;
        let timeout = self.config.timeout_for(&request.language, request.timeout);
        let ctx = RunContext::new(self.executor.as_ref(), timeout, request.work_dir());

        let outcome = AssertUnwindSafe(run_strategy(request, strategy, &ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(record)) => {
                tracing::info!(
                    exit_code = ?record.exit_code,
                    status = ?record.status,
                    wall_time = record.wall_time,
                    "Run finished"
                );
                record
            }
            Ok(Err(e)) => {
                tracing::debug!("Strategy failed: {}", e);
                ctx.fail(&e, "", "")
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!("Strategy panicked: {}", msg);
                ctx.fail(&StrategyError::message(msg), "", "")
            }
        }
    }
}

async fn run_strategy(
    request: &RunRequest,
    strategy: &dyn Strategy,
    ctx: &RunContext<'_>,
) -> Result<ResultRecord, StrategyError> {
    strategy.before(request).await?;

    if request.has_fixture() {
        tracing::debug!("Running in test integration mode");
        strategy.test_integration(request, ctx).await
    } else {
        tracing::debug!("Running in solution only mode");
        strategy.solution_only(request, ctx).await
    }
}

/// Keeps a copy of the submission next to the run for later inspection.
async fn write_solution(request: &RunRequest) {
    let dir = request.work_dir();
    let result = async {
        fs::create_dir_all(dir).await?;
        fs::write(dir.join(SOLUTION_INSPECTION_FILE), &request.solution).await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!("Failed to write {} to {}: {}", SOLUTION_INSPECTION_FILE, dir.display(), e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "strategy panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::RunStatus;
    use crate::core::traits::{
        executor::{ExecError, MockExecutor},
        publisher::MockStatusPublisher,
        services::{MockServiceBootstrap, ServiceError},
    };
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records which mode ran and answers with a canned outcome.
    #[derive(Default)]
    struct ScriptedStrategy {
        solution_calls: AtomicUsize,
        integration_calls: AtomicUsize,
        failure: Option<fn() -> StrategyError>,
        panics: bool,
        timeout: Mutex<Option<Duration>>,
    }

    impl ScriptedStrategy {
        fn answer(&self) -> Result<ResultRecord, StrategyError> {
            if self.panics {
                panic!("boom");
            }
            match self.failure {
                Some(make) => Err(make()),
                None => Ok(ResultRecord {
                    stdout: "ok\n".to_string(),
                    exit_code: Some(0),
                    ..Default::default()
                }),
            }
        }
    }

    #[async_trait::async_trait]
    impl Strategy for ScriptedStrategy {
        async fn solution_only(
            &self,
            _request: &RunRequest,
            ctx: &RunContext<'_>,
        ) -> Result<ResultRecord, StrategyError> {
            self.solution_calls.fetch_add(1, Ordering::SeqCst);
            *self.timeout.lock().unwrap() = Some(ctx.timeout());
            self.answer()
        }

        async fn test_integration(
            &self,
            _request: &RunRequest,
            ctx: &RunContext<'_>,
        ) -> Result<ResultRecord, StrategyError> {
            self.integration_calls.fetch_add(1, Ordering::SeqCst);
            *self.timeout.lock().unwrap() = Some(ctx.timeout());
            self.answer()
        }
    }

    /// Launches `sh -c <solution>` through the context.
    struct ShellStrategy;

    #[async_trait::async_trait]
    impl Strategy for ShellStrategy {
        async fn solution_only(
            &self,
            request: &RunRequest,
            ctx: &RunContext<'_>,
        ) -> Result<ResultRecord, StrategyError> {
            ctx.run_code(LaunchSpec::new("sh").arg("-c").arg(&request.solution))
                .await
        }

        async fn test_integration(
            &self,
            _request: &RunRequest,
            _ctx: &RunContext<'_>,
        ) -> Result<ResultRecord, StrategyError> {
            Err(StrategyError::Unsupported("no fixtures".to_string()))
        }

        fn modify_opts(&self, request: &mut RunRequest) {
            request.timeout.get_or_insert(2500);
        }
    }

    fn dispatcher(executor: MockExecutor, services: MockServiceBootstrap) -> Dispatcher {
        let mut publisher = MockStatusPublisher::new();
        publisher.expect_publish().return_const(());

        let executor: Arc<dyn Executor> = Arc::new(executor);
        let provisioner = Provisioner::new(
            executor.clone(),
            Arc::new(services),
            Arc::new(publisher),
            Duration::from_secs(10),
        );
        Dispatcher::new(executor, provisioner, Arc::new(EngineConfig::default()))
    }

    fn request_in(dir: &Path, fixture: Option<&str>) -> RunRequest {
        let mut request = RunRequest::new("python", "print('hi')");
        request.dir = Some(dir.to_path_buf());
        request.fixture = fixture.map(str::to_string);
        request
    }

    #[test]
    fn test_synthesize_failure_wraps_compilation_output() {
        let error = StrategyError::Compilation {
            stdout: "".to_string(),
            stderr: "main.c:1: error: expected ';'".to_string(),
        };

        let record = synthesize_failure(&error, "ignored", "ignored");

        assert_eq!(
            record,
            ResultRecord::compilation_failure("", "main.c:1: error: expected ';'")
        );
        assert_eq!(record.exit_code, None);
        assert_eq!(record.wall_time, 0);
    }

    #[test]
    fn test_synthesize_failure_appends_new_stderr() {
        let error = StrategyError::message("Error: build failed");

        let record = synthesize_failure(&error, "partial", "\nlinker said no");

        assert_eq!(record.stdout, "partial");
        assert_eq!(record.stderr, "Error: build failed\nlinker said no");
        assert!(record.compilation_failure);
    }

    #[test]
    fn test_synthesize_failure_skips_repeated_stderr() {
        let error = StrategyError::message("Error: cannot find symbol");

        let record = synthesize_failure(&error, "", "cannot find symbol");

        assert_eq!(record.stderr, "Error: cannot find symbol");
    }

    #[tokio::test]
    async fn test_solution_only_without_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(MockExecutor::new(), MockServiceBootstrap::new());
        let strategy = ScriptedStrategy::default();

        for fixture in [None, Some("")] {
            let mut request = request_in(dir.path(), fixture);
            let record = dispatcher.dispatch(&mut request, &strategy).await;
            assert_eq!(record.stdout, "ok\n");
        }

        assert_eq!(strategy.solution_calls.load(Ordering::SeqCst), 2);
        assert_eq!(strategy.integration_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_integration_with_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(MockExecutor::new(), MockServiceBootstrap::new());
        let strategy = ScriptedStrategy::default();
        let mut request = request_in(dir.path(), Some("assert True"));

        dispatcher.dispatch(&mut request, &strategy).await;

        assert_eq!(strategy.solution_calls.load(Ordering::SeqCst), 0);
        assert_eq!(strategy.integration_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_solution_written_for_inspection() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("nested/run");
        let dispatcher = dispatcher(MockExecutor::new(), MockServiceBootstrap::new());
        let mut request = request_in(&work_dir, None);

        dispatcher
            .dispatch(&mut request, &ScriptedStrategy::default())
            .await;

        assert_eq!(
            std::fs::read_to_string(work_dir.join(SOLUTION_INSPECTION_FILE)).unwrap(),
            "print('hi')"
        );
    }

    #[tokio::test]
    async fn test_compile_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(MockExecutor::new(), MockServiceBootstrap::new());
        let strategy = ScriptedStrategy {
            failure: Some(|| StrategyError::Compilation {
                stdout: "".to_string(),
                stderr: "solution.c:3:5: error: unknown type name 'pint'".to_string(),
            }),
            ..Default::default()
        };
        let mut request = request_in(dir.path(), None);

        let record = dispatcher.dispatch(&mut request, &strategy).await;

        assert!(record.compilation_failure);
        assert_eq!(record.stderr, "solution.c:3:5: error: unknown type name 'pint'");
        assert_eq!(record.exit_code, None);
        assert_eq!(record.exit_signal, None);
    }

    #[tokio::test]
    async fn test_strategy_panic_is_caught() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(MockExecutor::new(), MockServiceBootstrap::new());
        let strategy = ScriptedStrategy {
            panics: true,
            ..Default::default()
        };
        let mut request = request_in(dir.path(), None);

        let record = dispatcher.dispatch(&mut request, &strategy).await;

        assert!(record.compilation_failure);
        assert_eq!(record.stderr, "boom");
    }

    #[tokio::test]
    async fn test_run_code_defaults_cwd_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let expected_dir = dir.path().to_path_buf();

        let mut executor = MockExecutor::new();
        executor
            .expect_supervise()
            .withf(move |spec, opts| {
                spec.program == "sh"
                    && spec.options.cwd.as_deref() == Some(expected_dir.as_path())
                    && opts.timeout == Duration::from_millis(2500)
                    && !opts.compiling
            })
            .times(1)
            .returning(|_, _| {
                Ok(ResultRecord {
                    stdout: "hi\n".to_string(),
                    exit_code: Some(0),
                    ..Default::default()
                })
            });

        let dispatcher = dispatcher(executor, MockServiceBootstrap::new());
        let mut request = request_in(dir.path(), None);
        request.solution = "echo hi".to_string();

        let record = dispatcher.dispatch(&mut request, &ShellStrategy).await;

        assert_eq!(record.stdout, "hi\n");
        assert_eq!(request.timeout, Some(2500));
    }

    #[tokio::test]
    async fn test_timeout_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(MockExecutor::new(), MockServiceBootstrap::new());

        for (language, timeout, expected) in [
            ("python", None, 8000),
            ("java", None, 11000),
            ("java", Some(300), 300),
        ] {
            let strategy = ScriptedStrategy::default();
            let mut request = request_in(dir.path(), None);
            request.language = language.to_string();
            request.timeout = timeout;

            dispatcher.dispatch(&mut request, &strategy).await;

            assert_eq!(
                *strategy.timeout.lock().unwrap(),
                Some(Duration::from_millis(expected)),
                "language: {language}"
            );
        }
    }

    #[tokio::test]
    async fn test_spawn_error_becomes_record() {
        let dir = tempfile::tempdir().unwrap();

        let mut executor = MockExecutor::new();
        executor.expect_supervise().times(1).returning(|spec, _| {
            Err(ExecError::Spawn {
                program: spec.program,
                msg: "ENOENT".to_string(),
            })
        });

        let dispatcher = dispatcher(executor, MockServiceBootstrap::new());
        let mut request = request_in(dir.path(), None);

        let record = dispatcher.dispatch(&mut request, &ShellStrategy).await;

        assert!(record.compilation_failure);
        assert_eq!(record.stderr, "Error: spawn sh ENOENT");
        assert_eq!(record.exit_code, None);
    }

    #[tokio::test]
    async fn test_provisioning_failure_skips_strategy() {
        let dir = tempfile::tempdir().unwrap();

        let mut services = MockServiceBootstrap::new();
        services
            .expect_start()
            .times(1)
            .returning(|service, _| Err(ServiceError::Unknown(service.to_string())));

        let dispatcher = dispatcher(MockExecutor::new(), services);
        let strategy = ScriptedStrategy::default();
        let mut request = request_in(dir.path(), None);
        request.services = vec!["cassandra".to_string()];

        let record = dispatcher.dispatch(&mut request, &strategy).await;

        assert!(record.compilation_failure);
        assert_eq!(record.stderr, "Unknown service: cassandra");
        assert_eq!(strategy.solution_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_limit_outcomes_pass_through() {
        let dir = tempfile::tempdir().unwrap();

        let mut executor = MockExecutor::new();
        executor.expect_supervise().times(1).returning(|_, _| {
            Ok(ResultRecord {
                exit_signal: Some("SIGKILL".to_string()),
                status: Some(RunStatus::MaxTimeReached),
                ..Default::default()
            })
        });

        let dispatcher = dispatcher(executor, MockServiceBootstrap::new());
        let mut request = request_in(dir.path(), None);

        let record = dispatcher.dispatch(&mut request, &ShellStrategy).await;

        assert_eq!(record.status, Some(RunStatus::MaxTimeReached));
        assert!(!record.compilation_failure);
    }

    #[tokio::test]
    async fn test_completion_hooks_see_reported_record() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let dispatcher = dispatcher(MockExecutor::new(), MockServiceBootstrap::new())
            .on_completed(move |record| sink.lock().unwrap().push(record.clone()));
        let mut reporter = Reporter::new(Vec::new(), Vec::new());
        let mut request = request_in(dir.path(), None);

        let record = dispatcher
            .run(&mut request, &ScriptedStrategy::default(), &mut reporter)
            .await
            .unwrap();

        assert_eq!(record.output_type, "pre");
        assert_eq!(seen.lock().unwrap().as_slice(), &[record]);
        let (out, _) = reporter.into_inner();
        assert_eq!(out, b"ok\n");
    }
}
