use std::fs::File;
use std::io::Write;
use std::os::unix::io::{FromRawFd, RawFd};
use std::time::Duration;

use nix::libc;
use nix::sys::signal::Signal;
use serde::Serialize;

use crate::error::{RunError, SandboxError};
use crate::utils::truncate_output;

/// HUSTOJ verdict codes understood by the outer judge.
pub const OJ_AC: i32 = 4;
pub const OJ_TL: i32 = 7;
pub const OJ_ML: i32 = 8;
pub const OJ_OL: i32 = 9;
pub const OJ_RE: i32 = 10;

/// The caller hands us a pipe writer on fd 3; the verdict goes there,
/// exactly once per invocation.
pub const VERDICT_FD: RawFd = 3;

/// Captured output is cut to this many bytes before reporting.
pub const OUTPUT_LIMIT: usize = 1024;

/// Marker the judge recognizes on wall-clock kills: reported time becomes
/// the real-time limit plus this offset.
pub const REAL_TIME_SENTINEL_MS: u64 = 233;

/// Result record consumed by the judge driver.
///
/// Field names are part of the wire contract, do not rename.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
  pub user_status: i32,
  pub exit_status: i32,
  pub time: u64,
  pub memory: u64,
  pub combined_output: String,
  pub process_cnt: u64,
  pub exit_signal: String,
}

impl Verdict {
  /// Fold the run classification and the final cgroup counters into the
  /// record the judge consumes. The default is AC; the outer judge still
  /// compares output files before a run counts as accepted.
  #[allow(clippy::too_many_arguments)]
  pub fn classify(
    error: Option<RunError>,
    exit_status: i32,
    time_limit: Duration,
    memory_limit_kib: u64,
    cpu_time: Duration,
    memory_kib: u64,
    process_cnt: u64,
    output: &[u8],
  ) -> Verdict {
    let mut verdict = Verdict {
      user_status: OJ_AC,
      exit_status,
      time: cpu_time.as_millis() as u64,
      memory: memory_kib,
      combined_output: truncate_output(output, OUTPUT_LIMIT),
      process_cnt,
      exit_signal: String::new(),
    };

    match error {
      Some(RunError::CgroupLimitExceeded) => {
        verdict.user_status = OJ_TL;
      }
      Some(RunError::RealTimeTimeout) => {
        verdict.user_status = OJ_TL;
        // The judge matches this exact value to tell a wall-clock kill
        // from a CPU burn.
        verdict.time = time_limit.as_millis() as u64 * 3 + REAL_TIME_SENTINEL_MS;
      }
      Some(RunError::RuntimeError(signal)) => {
        if verdict.memory > memory_limit_kib {
          verdict.user_status = OJ_ML;
        } else {
          verdict.user_status = OJ_RE;
          if let Some(signal) = signal {
            verdict.exit_signal = signal_name(signal);
          }
        }
      }
      Some(RunError::OutputLimitExceeded) => {
        verdict.user_status = OJ_OL;
      }
      None => {}
    }

    verdict
  }

  /// Write the record as a single newline-terminated JSON line and close
  /// the descriptor.
  pub fn write_to(&self, fd: RawFd) -> Result<(), SandboxError> {
    let mut file = unsafe { File::from_raw_fd(fd) };
    serde_json::to_writer(&mut file, self)?;
    file.write_all(b"\n")?;
    Ok(())
  }
}

/// Human signal names as the judge database stores them; unlisted signals
/// fall back to their SIG* name.
pub fn signal_name(signal: Signal) -> String {
  let name = match signal as i32 {
    libc::SIGHUP => "hangup",
    libc::SIGINT => "interrupt",
    libc::SIGQUIT => "quit",
    libc::SIGILL => "illegal instruction",
    libc::SIGTRAP => "trace/breakpoint trap",
    libc::SIGABRT => "aborted",
    libc::SIGBUS => "bus error",
    libc::SIGFPE => "floating point exception",
    libc::SIGKILL => "killed",
    libc::SIGUSR1 => "user defined signal 1",
    libc::SIGSEGV => "segmentation fault",
    libc::SIGUSR2 => "user defined signal 2",
    libc::SIGPIPE => "broken pipe",
    libc::SIGALRM => "alarm clock",
    libc::SIGTERM => "terminated",
    libc::SIGSTKFLT => "stack fault",
    libc::SIGCHLD => "child exited",
    libc::SIGCONT => "continued",
    libc::SIGSTOP => "stopped (signal)",
    libc::SIGTSTP => "stopped",
    libc::SIGTTIN => "stopped (tty input)",
    libc::SIGTTOU => "stopped (tty output)",
    libc::SIGURG => "urgent I/O condition",
    libc::SIGXCPU => "CPU time limit exceeded",
    libc::SIGXFSZ => "file size limit exceeded",
    libc::SIGVTALRM => "virtual timer expired",
    libc::SIGPROF => "profiling timer expired",
    libc::SIGWINCH => "window changed",
    libc::SIGIO => "I/O possible",
    libc::SIGPWR => "power failure",
    libc::SIGSYS => "bad system call",
    _ => return signal.to_string(),
  };
  name.to_string()
}
