pub const KB: usize = 1024;

/// Largest single write accepted from a child before it is truncated.
pub const MAX_DATA_BUFFER: usize = KB * 50;
/// Total stdout a child may produce before it is killed.
pub const MAX_BUFFER: usize = KB * 1500;
pub const READ_CHUNK_SIZE: usize = KB * 64;

pub const DEFAULT_TIMEOUT_MS: u64 = 8000;
pub const JVM_TIMEOUT_MS: u64 = 11000;
pub const SHELL_TIMEOUT_MS: u64 = 10000;
pub const FLUSH_GRACE_MS: u64 = 100;
pub const REAP_TIMEOUT_MS: u64 = 1000;

pub const DEFAULT_WORK_DIR: &str = "/home/codewarrior";
pub const SOLUTION_INSPECTION_FILE: &str = "solution.txt";
pub const DEFAULT_OUTPUT_TYPE: &str = "pre";
pub const KILL_SIGNAL_NAME: &str = "SIGKILL";

pub const MAX_BUFFER_MSG: &str =
    "Max Buffer reached: Too much information has been written to stdout.";

pub const STATUS_EVENT: &str = "status";
pub const STATUS_RUNNING: &str = "Running...";
pub const STATUS_SERVICES: &str = "Starting services...";
pub const STATUS_SHELL: &str = "Running setup scripts...";
pub const STATUS_DOWNLOAD: &str = "Downloading files from Github...";

pub const GITHUB_API_REPOS: &str = "https://api.github.com/repos/";
