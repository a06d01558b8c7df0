use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::mpsc::{self, Sender},
    task::JoinHandle,
    time::{Instant, sleep_until, timeout},
};

use crate::config::Limits;
use crate::constants::{
    KB, KILL_SIGNAL_NAME, MAX_BUFFER_MSG, READ_CHUNK_SIZE, REAP_TIMEOUT_MS, STATUS_EVENT,
    STATUS_RUNNING,
};
use crate::core::{
    domain::{LaunchSpec, ResultRecord, RunStatus},
    traits::{
        executor::{ExecError, Executor, SuperviseOptions},
        publisher::StatusPublisher,
    },
};

/// Runs children directly on the host with tokio's process support.
#[derive(Clone, Debug)]
pub struct NativeExecutor {
    limits: Limits,
    publisher: Arc<dyn StatusPublisher>,
}

impl NativeExecutor {
    pub fn new(limits: Limits, publisher: Arc<dyn StatusPublisher>) -> Self {
        NativeExecutor { limits, publisher }
    }
}

#[async_trait::async_trait]
impl Executor for NativeExecutor {
    #[tracing::instrument(skip(self, spec, opts), fields(program = %spec.program))]
    async fn supervise(
        &self,
        spec: LaunchSpec,
        opts: SuperviseOptions,
    ) -> Result<ResultRecord, ExecError> {
        self.publisher.publish(STATUS_EVENT, STATUS_RUNNING);

        let start = Instant::now();
        let mut child = match build_command(&spec).spawn() {
            Ok(child) => child,
            Err(e) => {
                remove_temp_files(&opts.temp_files).await;
                return Err(ExecError::Spawn {
                    program: spec.program,
                    msg: e.to_string(),
                });
            }
        };
        let pid = child.id();
        tracing::debug!(?pid, args = ?spec.args, "Child spawned");

        let (tx, rx) = mpsc::channel(64);
        let readers = [
            spawn_reader(child.stdout.take(), Stream::Stdout, tx.clone()),
            spawn_reader(child.stderr.take(), Stream::Stderr, tx),
        ];
        // Written concurrently with the watch so a child that never reads
        // stdin cannot hold off the deadline.
        let writer = spawn_writer(child.stdin.take(), spec.stdin);

        let mut watch = Watch {
            child: &mut child,
            rx,
            buffer: OutputBuffer::new(self.limits),
            completion: CompletionCell::default(),
            publisher: self.publisher.as_ref(),
            start,
            deadline: start + opts.timeout,
            flush_grace: self.limits.flush_grace(),
        };
        let killed = watch.run(opts.timeout).await;
        let Watch {
            buffer,
            completion,
            rx,
            ..
        } = watch;
        drop(rx);

        for reader in &readers {
            reader.abort();
        }
        if let Some(writer) = writer {
            writer.abort();
        }

        if killed {
            reap(&mut child).await;
        }
        if !opts.compiling {
            if let Some(pid) = pid {
                kill_group(pid);
            }
        }
        remove_temp_files(&opts.temp_files).await;

        let termination = completion.take().unwrap_or_else(|| Termination {
            exit_code: None,
            exit_signal: None,
            wall_time: start.elapsed(),
        });
        let record = buffer.freeze(termination);
        tracing::debug!(
            exit_code = ?record.exit_code,
            exit_signal = ?record.exit_signal,
            status = ?record.status,
            wall_time = record.wall_time,
            "Child finished"
        );

        Ok(record)
    }
}

fn build_command(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    if spec.options.clear_env {
        cmd.env_clear();
    }
    cmd.envs(&spec.options.env);
    if let Some(cwd) = &spec.options.cwd {
        cmd.current_dir(cwd);
    }

    cmd
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

#[derive(Debug)]
enum OutputEvent {
    Chunk(Stream, Vec<u8>),
    Closed(Stream),
}

fn spawn_reader<R>(pipe: Option<R>, stream: Stream, tx: Sender<OutputEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(mut pipe) = pipe {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match pipe.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx
                            .send(OutputEvent::Chunk(stream, buf[..n].to_vec()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read {}: {}", stream.name(), e);
                        break;
                    }
                }
            }
        }
        let _ = tx.send(OutputEvent::Closed(stream)).await;
    })
}

/// Writes `input` to the child's stdin, then drops the pipe to signal EOF.
fn spawn_writer(pipe: Option<ChildStdin>, input: Option<String>) -> Option<JoinHandle<()>> {
    let (mut pipe, input) = (pipe?, input?);
    Some(tokio::spawn(async move {
        if let Err(e) = pipe.write_all(input.as_bytes()).await {
            tracing::debug!("Failed to write to stdin: {}", e);
        }
    }))
}

/// How the child ended, as seen by whichever observer got there first.
#[derive(Clone, Debug, PartialEq)]
struct Termination {
    exit_code: Option<i32>,
    exit_signal: Option<String>,
    wall_time: Duration,
}

impl Termination {
    fn exited(status: ExitStatus, wall_time: Duration) -> Self {
        Termination {
            exit_code: status.code(),
            exit_signal: status.signal().map(signal_name),
            wall_time,
        }
    }

    fn killed(wall_time: Duration) -> Self {
        Termination {
            exit_code: None,
            exit_signal: Some(KILL_SIGNAL_NAME.to_string()),
            wall_time,
        }
    }
}

/// Single-assignment slot for the termination of one child. Only the first
/// `complete` is stored; later calls leave it untouched.
#[derive(Debug, Default)]
struct CompletionCell(OnceLock<Termination>);

impl CompletionCell {
    fn complete(&self, termination: Termination) -> bool {
        self.0.set(termination).is_ok()
    }

    fn is_complete(&self) -> bool {
        self.0.get().is_some()
    }

    fn take(self) -> Option<Termination> {
        self.0.into_inner()
    }
}

/// Output accumulated while the child is alive.
#[derive(Debug)]
struct OutputBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_len: usize,
    status: Option<RunStatus>,
    limits: Limits,
}

impl OutputBuffer {
    fn new(limits: Limits) -> Self {
        OutputBuffer {
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_len: 0,
            status: None,
            limits,
        }
    }

    /// Appends a chunk. Returns `true` once stdout has grown past the
    /// cumulative cap; the crossing chunk is clipped at the boundary.
    fn push(&mut self, stream: Stream, chunk: &[u8]) -> bool {
        match stream {
            Stream::Stdout => {
                let remaining = self.limits.max_stdout_bytes.saturating_sub(self.stdout_len);
                let accepted = &chunk[..chunk.len().min(remaining)];
                self.stdout_len += chunk.len();
                append_truncated(&mut self.stdout, accepted, self.limits.max_chunk_bytes);
                self.stdout_len > self.limits.max_stdout_bytes
            }
            Stream::Stderr => {
                append_truncated(&mut self.stderr, chunk, self.limits.max_chunk_bytes);
                false
            }
        }
    }

    fn note(&mut self, msg: &str) {
        self.stderr.extend_from_slice(msg.as_bytes());
        self.stderr.push(b'\n');
    }

    fn freeze(self, termination: Termination) -> ResultRecord {
        ResultRecord {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_code: termination.exit_code,
            exit_signal: termination.exit_signal,
            wall_time: termination.wall_time.as_millis() as u64,
            status: self.status,
            ..Default::default()
        }
    }
}

fn append_truncated(out: &mut Vec<u8>, chunk: &[u8], max_chunk: usize) {
    if chunk.len() > max_chunk {
        out.extend_from_slice(&chunk[..max_chunk]);
        out.extend_from_slice(
            format!(
                "\nContent truncated due to max data buffer of {}kb being reached. Try flushing buffer with less content.\n",
                max_chunk / KB
            )
            .as_bytes(),
        );
    } else {
        out.extend_from_slice(chunk);
    }
}

/// Event loop for one child. Reconciles the two termination observers:
/// `exit` (the child was reaped) and `close` (both pipes hit EOF after
/// exit), plus the deadline and the stdout cap.
struct Watch<'a> {
    child: &'a mut Child,
    rx: mpsc::Receiver<OutputEvent>,
    buffer: OutputBuffer,
    completion: CompletionCell,
    publisher: &'a dyn StatusPublisher,
    start: Instant,
    deadline: Instant,
    flush_grace: Duration,
}

impl Watch<'_> {
    /// Returns `true` if the child had to be killed.
    async fn run(&mut self, budget: Duration) -> bool {
        let mut open_streams: usize = 2;
        let mut exit: Option<ExitStatus> = None;
        let mut grace: Option<Instant> = None;

        while !self.completion.is_complete() {
            tokio::select! {
                biased;

                event = self.rx.recv(), if open_streams > 0 => match event {
                    Some(OutputEvent::Chunk(stream, bytes)) => {
                        self.publisher
                            .publish(stream.name(), &String::from_utf8_lossy(&bytes));
                        if self.buffer.push(stream, &bytes) {
                            self.publisher.publish(STATUS_EVENT, MAX_BUFFER_MSG);
                            self.buffer.status = Some(RunStatus::MaxBufferReached);
                            self.buffer.note(MAX_BUFFER_MSG);
                            return self.force_kill(exit);
                        }
                    }
                    Some(OutputEvent::Closed(_)) => {
                        open_streams -= 1;
                        self.close_observed(open_streams, exit);
                    }
                    None => {
                        open_streams = 0;
                        self.close_observed(open_streams, exit);
                    }
                },

                status = self.child.wait(), if exit.is_none() => match status {
                    Ok(status) => {
                        exit = Some(status);
                        if open_streams == 0 {
                            self.completion
                                .complete(Termination::exited(status, self.start.elapsed()));
                        } else {
                            grace = Some((Instant::now() + self.flush_grace).min(self.deadline));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to wait for child: {}", e);
                        self.buffer.note(&e.to_string());
                        self.completion.complete(Termination {
                            exit_code: None,
                            exit_signal: None,
                            wall_time: self.start.elapsed(),
                        });
                    }
                },

                _ = sleep_until(grace.unwrap_or(self.deadline)), if grace.is_some() => {
                    if let Some(status) = exit {
                        self.completion
                            .complete(Termination::exited(status, self.start.elapsed()));
                    }
                },

                _ = sleep_until(self.deadline) => {
                    let msg = format!(
                        "Process was terminated. It took longer than {}ms to complete",
                        budget.as_millis()
                    );
                    self.buffer.status = Some(RunStatus::MaxTimeReached);
                    self.buffer.note(&msg);
                    return self.force_kill(exit);
                },
            }
        }

        false
    }

    fn close_observed(&self, open_streams: usize, exit: Option<ExitStatus>) {
        if open_streams == 0 {
            if let Some(status) = exit {
                self.completion
                    .complete(Termination::exited(status, self.start.elapsed()));
            }
        }
    }

    /// Stops the child and everything in its group. A child whose exit was
    /// already observed keeps its real exit status.
    fn force_kill(&mut self, exit: Option<ExitStatus>) -> bool {
        let elapsed = self.start.elapsed();
        if let Some(status) = exit {
            if let Some(pid) = self.child.id() {
                kill_group(pid);
            }
            self.completion.complete(Termination::exited(status, elapsed));
            return false;
        }

        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Child already gone: {}", e);
        }
        if let Some(pid) = self.child.id() {
            kill_group(pid);
        }
        self.completion.complete(Termination::killed(elapsed));
        true
    }
}

/// SIGKILLs every process in the group led by `pid`.
fn kill_group(pid: u32) {
    // SAFETY: killpg only sends a signal; ESRCH for an empty group is fine.
    let res = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if res == 0 {
        tracing::debug!(pid, "Killed process group");
    }
}

async fn reap(child: &mut Child) {
    if timeout(Duration::from_millis(REAP_TIMEOUT_MS), child.wait())
        .await
        .is_err()
    {
        tracing::warn!("Killed child was not reaped in time");
    }
}

async fn remove_temp_files(files: &[PathBuf]) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(file).await {
            tracing::debug!("Failed to remove temp file {}: {}", file.display(), e);
        }
    }
}

fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        _ => return format!("SIG{}", signal),
    };
    name.to_string()
}
