use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

/// Flags shared by the `sandbox` and `child` subcommands.
///
/// The supervisor re-execs itself as `child` with its own argv tail, so
/// both modes parse exactly this struct and agree on every value.
#[derive(Args, Debug, Clone)]
pub struct SandboxArgs {
  #[arg(long, default_value = "/tmp", help = "Root filesystem that becomes / inside the sandbox")]
  pub rootfs: PathBuf,

  #[arg(long = "cmd", default_value = "/bin/false", help = "Command line to execute")]
  pub command: String,

  #[arg(long = "cwd", default_value = "/code", help = "Working directory inside the sandbox")]
  pub workdir: PathBuf,

  #[arg(long, help = "Redirect stdin from this path [default: inherit]")]
  pub stdin: Option<String>,

  #[arg(long, help = "Redirect stdout to this path [default: capture]")]
  pub stdout: Option<String>,

  #[arg(long, help = "Redirect stderr to this path [default: capture]")]
  pub stderr: Option<String>,

  #[arg(long, default_value_t = 1000, help = "CPU time limit (unit: ms)")]
  pub time: u64,

  #[arg(long, default_value_t = 262144, help = "Memory limit (unit: KB)")]
  pub memory: u64,

  #[arg(long, default_value_t = 0, help = "Solution id, used to name the per-run cgroup")]
  pub sid: i64,
}

impl SandboxArgs {
  pub fn cpu_time_limit(&self) -> Duration {
    Duration::from_millis(self.time)
  }

  /// Wall-clock budget: I/O-bound runs get three times the CPU budget.
  pub fn real_time_limit(&self) -> Duration {
    Duration::from_millis(self.time * 3)
  }

  /// Cgroup memory cap, with a little slack for kernel bookkeeping so a
  /// program sitting exactly at the limit is not charged a false ML.
  pub fn memory_max_bytes(&self) -> u64 {
    self.memory * 1024 + 4096
  }

  pub fn stdin_path(&self) -> Option<&str> {
    nonempty(&self.stdin)
  }

  pub fn stdout_path(&self) -> Option<&str> {
    nonempty(&self.stdout)
  }

  pub fn stderr_path(&self) -> Option<&str> {
    nonempty(&self.stderr)
  }

  /// Combined stdout+stderr capture happens only when the caller redirects
  /// neither stream (the compile-log case).
  pub fn capture_output(&self) -> bool {
    self.stdout_path().is_none() && self.stderr_path().is_none()
  }

  /// argv for the user program: the command line split on spaces. argv[0]
  /// is resolved inside the pivoted root, without a PATH search.
  pub fn split_command(&self) -> Vec<String> {
    self
      .command
      .split(' ')
      .filter(|part| !part.is_empty())
      .map(str::to_string)
      .collect()
  }
}

/// An empty redirection string means the same as an absent one: inherit.
fn nonempty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|path| !path.is_empty())
}
