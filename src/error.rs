use std::{
  error::Error,
  fmt::{Debug, Display},
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::sys::signal::Signal;
use nix::{errno::Errno, libc::STDERR_FILENO, unistd::isatty};

/// Fatal setup failures. No verdict is emitted for these: the process
/// exits non-zero and the caller treats the run as a system error.
pub enum SandboxError {
  Fork(String),
  Cgroup(String),
  Exec(String),
  Nix(Errno),
  Fs(String),
  Cli(String),
  Logger(FlexiLoggerError),
  Json(serde_json::Error),
}

#[allow(unused)]
pub enum SandboxExit {
  Ok,
  Err(SandboxError),
}

impl SandboxError {
  pub fn fork<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Fork(msg.into())
  }

  pub fn cgroup<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Cgroup(msg.into())
  }

  pub fn exec<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Exec(msg.into())
  }

  pub fn cli<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Cli(msg.into())
  }
}

impl Debug for SandboxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for SandboxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      SandboxError::Fork(msg) => f.write_fmt(format_args!("Sandbox Fork Error: {}", msg)),
      SandboxError::Cgroup(msg) => f.write_fmt(format_args!("Sandbox Cgroup Error: {}", msg)),
      SandboxError::Exec(msg) => f.write_fmt(format_args!("Sandbox Exec Error: {}", msg)),
      SandboxError::Nix(errno) => f.write_fmt(format_args!("Sandbox Nix Error: {}", errno)),
      SandboxError::Fs(msg) => f.write_fmt(format_args!("Sandbox File System Error: {}", msg)),
      SandboxError::Cli(msg) => f.write_fmt(format_args!("Sandbox CLI Error: {}", msg)),
      SandboxError::Logger(err) => f.write_fmt(format_args!("Sandbox Logger Error: {}", err)),
      SandboxError::Json(err) => f.write_fmt(format_args!("Sandbox Report Error: {}", err)),
    }
  }
}

impl From<Errno> for SandboxError {
  fn from(errno: Errno) -> Self {
    SandboxError::Nix(errno)
  }
}

impl From<std::io::Error> for SandboxError {
  fn from(err: std::io::Error) -> Self {
    SandboxError::Fs(err.to_string())
  }
}

impl From<FlexiLoggerError> for SandboxError {
  fn from(err: FlexiLoggerError) -> Self {
    SandboxError::Logger(err)
  }
}

impl From<serde_json::Error> for SandboxError {
  fn from(err: serde_json::Error) -> Self {
    SandboxError::Json(err)
  }
}

impl Error for SandboxError {}

impl Termination for SandboxExit {
  fn report(self) -> ExitCode {
    match self {
      SandboxExit::Ok => ExitCode::SUCCESS.report(),
      SandboxExit::Err(err) => {
        let text = format!("{}", err);
        let text = match text.split_once(": ") {
          Some((prefix, message)) => {
            let is_tty = isatty(STDERR_FILENO).unwrap_or(false);
            if is_tty {
              format!("\x1b[1m\x1b[91m{}\x1b[39m\x1b[22m  {}", prefix, message)
            } else {
              format!(
                "{{\n  \"ok\": false,\n  \"type\": \"{}\",\n  \"message\": \"{}\"\n}}",
                prefix, message
              )
            }
          }
          None => text,
        };
        eprintln!("{}", text);
        ExitCode::FAILURE.report()
      }
    }
  }
}

/// The closed set of recoverable run classifications. At most one of these
/// survives per invocation; each maps onto a verdict status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
  /// The tracee burned through its CPU budget per cgroup accounting
  CgroupLimitExceeded,
  /// Wall-clock budget exhausted while the CPU budget still had room
  RealTimeTimeout,
  /// SIGXFSZ was raised against the tracee
  OutputLimitExceeded,
  /// The tracee died by signal, or the shim failed before exec
  RuntimeError(Option<Signal>),
}

impl Display for RunError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      RunError::CgroupLimitExceeded => f.write_str("cgroup CPU time limit exceeded"),
      RunError::RealTimeTimeout => f.write_str("real-time execution timeout"),
      RunError::OutputLimitExceeded => f.write_str("output limit exceed"),
      RunError::RuntimeError(_) => f.write_str("runtime error"),
    }
  }
}
