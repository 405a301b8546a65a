use std::env;
use std::fs::{self, File};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sched::{unshare, CloneFlags};
use nix::sys::ptrace::{self, Event, Options};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, setpgid, Pid};

use crate::cgroup::RunCgroup;
use crate::config::SandboxArgs;
use crate::error::{RunError, SandboxError};
use crate::verdict::VERDICT_FD;

/// What the tracer learned from following the traced tree.
#[derive(Debug, Clone)]
pub struct TraceOutcome {
  /// Terminal classification, if the run was anything but a clean exit
  pub error: Option<RunError>,
  /// Raw exit code of the shim; -1 when it died by signal
  pub exit_status: i32,
  /// The terminating signal, if any
  pub signal: Option<Signal>,
  /// Observed clone/fork/vfork events plus one
  pub process_cnt: u64,
}

/// Handshake message: the shim is stopped, the cgroup is provisioned and
/// the pid is attached. Ownership of the cgroup moves to the supervisor.
pub struct TracerReady {
  pub shim_pid: Pid,
  pub cgroup: RunCgroup,
}

/// Spawn the shim and follow its tree until the shim exits or something in
/// the tree dies by signal.
///
/// Must run on a dedicated OS thread for its whole lifetime: the kernel
/// ties the tracer role to the thread that collected the first stop.
pub fn run(
  args: &SandboxArgs,
  capture_sink: Option<File>,
  ready: Sender<TracerReady>,
) -> Result<TraceOutcome, SandboxError> {
  let shim_pid = spawn_shim(capture_sink)?;
  let group = Pid::from_raw(-shim_pid.as_raw());
  info!("Shim spawned (pid = {})", shim_pid);

  // First stop: the shim raised SIGSTOP after TRACEME.
  match waitpid(group, Some(WaitPidFlag::__WALL))? {
    WaitStatus::Stopped(pid, Signal::SIGSTOP) if pid == shim_pid => {}
    WaitStatus::Exited(_, code) => {
      // The shim died during setup, before the handshake. No cgroup
      // exists yet; surface the failure as a runtime error.
      error!("Shim exited with status {} during setup", code);
      return Ok(TraceOutcome {
        error: Some(RunError::RuntimeError(None)),
        exit_status: code,
        signal: None,
        process_cnt: 1,
      });
    }
    status => {
      kill(shim_pid, Signal::SIGKILL).ok();
      waitpid(group, Some(WaitPidFlag::__WALL)).ok();
      return Err(SandboxError::fork(format!(
        "unexpected handshake status {:?}",
        status
      )));
    }
  }

  let cgroup = match RunCgroup::create(args.sid, shim_pid, args.memory_max_bytes())
    .and_then(|cgroup| cgroup.attach(shim_pid).map(|_| cgroup))
  {
    Ok(cgroup) => cgroup,
    Err(err) => {
      // Do not leave a stopped tracee behind.
      kill(shim_pid, Signal::SIGKILL).ok();
      waitpid(group, Some(WaitPidFlag::__WALL)).ok();
      return Err(err);
    }
  };

  if let Err(errno) = ptrace::setoptions(
    shim_pid,
    Options::PTRACE_O_EXITKILL
      | Options::PTRACE_O_TRACECLONE
      | Options::PTRACE_O_TRACEFORK
      | Options::PTRACE_O_TRACEVFORK
      | Options::PTRACE_O_TRACEVFORKDONE
      | Options::PTRACE_O_TRACEEXIT
      | Options::PTRACE_O_TRACEEXEC
      | Options::PTRACE_O_TRACESYSGOOD
      | Options::PTRACE_O_TRACESECCOMP,
  ) {
    kill(shim_pid, Signal::SIGKILL).ok();
    waitpid(group, Some(WaitPidFlag::__WALL)).ok();
    return Err(errno.into());
  }

  // The supervisor may start the limit checker from here on.
  ready.send(TracerReady { shim_pid, cgroup }).ok();

  // Consume the handshake SIGSTOP rather than delivering it.
  if let Err(err) = ptrace::cont(shim_pid, None) {
    error!("Resume shim fails: {}", err);
  }

  let outcome = trace_loop(shim_pid);

  if let Err(err) = ptrace::detach(shim_pid, None) {
    debug!("Ptrace detach: {}", err);
  }
  // Reap whatever is left, without blocking on survivors.
  loop {
    match waitpid(group, Some(WaitPidFlag::__WALL | WaitPidFlag::WNOHANG)) {
      Ok(WaitStatus::StillAlive) | Err(_) => break,
      Ok(status) => debug!("Final reap: {:?}", status),
    }
  }

  Ok(outcome)
}

/// The wait loop proper: classify every stop of every process in the
/// shim's process group and keep the tree moving.
fn trace_loop(shim_pid: Pid) -> TraceOutcome {
  let group = Pid::from_raw(-shim_pid.as_raw());
  let mut process_cnt: u64 = 1;

  loop {
    let status = match waitpid(group, Some(WaitPidFlag::__WALL)) {
      Ok(status) => status,
      Err(err) => {
        error!("Wait on traced tree fails: {}", err);
        return TraceOutcome {
          error: None,
          exit_status: 0,
          signal: None,
          process_cnt,
        };
      }
    };

    match status {
      WaitStatus::Exited(pid, code) => {
        info!("Process #{} exited with status {}", pid, code);
        if pid == shim_pid {
          return TraceOutcome {
            error: None,
            exit_status: code,
            signal: None,
            process_cnt,
          };
        }
      }
      WaitStatus::Signaled(pid, signal, _) => {
        info!("Process #{} killed by {}", pid, signal);
        let error = if signal == Signal::SIGXFSZ {
          RunError::OutputLimitExceeded
        } else {
          RunError::RuntimeError(Some(signal))
        };
        return TraceOutcome {
          error: Some(error),
          exit_status: -1,
          signal: Some(signal),
          process_cnt,
        };
      }
      WaitStatus::PtraceSyscall(pid) => {
        // SIGTRAP|0x80 per TRACESYSGOOD; nothing to inspect.
        resume(pid, None);
      }
      WaitStatus::PtraceEvent(pid, _, event) => {
        handle_event(pid, event, &mut process_cnt);
        resume(pid, None);
      }
      WaitStatus::Stopped(pid, signal) => {
        debug!("Process #{} stopped by {}", pid, signal);
        // Hand the signal back so normal handling can proceed.
        resume(pid, Some(signal));
        if signal == Signal::SIGURG {
          let _ = kill(pid, Signal::SIGCONT);
        }
      }
      status => {
        debug!("Unhandled wait status: {:?}", status);
      }
    }
  }
}

fn handle_event(pid: Pid, event: i32, process_cnt: &mut u64) {
  if event == Event::PTRACE_EVENT_CLONE as i32
    || event == Event::PTRACE_EVENT_FORK as i32
    || event == Event::PTRACE_EVENT_VFORK as i32
  {
    *process_cnt += 1;
    info!("Process #{} spawned a child (event {})", pid, event);
  } else if event == Event::PTRACE_EVENT_EXEC as i32 {
    match fs::read(format!("/proc/{}/cmdline", pid)) {
      Ok(cmdline) => {
        let argv = String::from_utf8_lossy(&cmdline)
          .split('\0')
          .filter(|part| !part.is_empty())
          .map(str::to_string)
          .collect::<Vec<String>>();
        info!("Process #{} exec: {:?}", pid, argv);
      }
      Err(err) => debug!("Read cmdline of #{} fails: {}", pid, err),
    }
  } else if event == Event::PTRACE_EVENT_VFORK_DONE as i32 {
    debug!("Process #{} vfork done", pid);
  } else if event == Event::PTRACE_EVENT_EXIT as i32 {
    debug!("Process #{} is exiting", pid);
  } else {
    debug!("Process #{} raised ptrace event {}", pid, event);
  }

  match ptrace::getevent(pid) {
    Ok(message) => debug!("Event message for #{}: {}", pid, message),
    Err(err) => debug!("Get event message of #{} fails: {}", pid, err),
  }
}

/// PTRACE_CONT that tolerates a racing death.
fn resume(pid: Pid, signal: Option<Signal>) {
  if let Err(err) = ptrace::cont(pid, signal) {
    warn!("Resume #{} fails: {}", pid, err);
  }
}

/// Re-exec ourselves as `child` with the identical flag tail, inside fresh
/// namespaces and as the leader of a new process group (the wait loop
/// addresses the tree as -pgid).
fn spawn_shim(capture_sink: Option<File>) -> Result<Pid, SandboxError> {
  let current_exe = env::current_exe()?;
  let mut command = Command::new(current_exe);
  command.arg("child").args(env::args().skip(2));

  if let Some(sink) = capture_sink {
    let cloned = sink.try_clone()?;
    command.stdout(Stdio::from(cloned));
    command.stderr(Stdio::from(sink));
  }

  unsafe {
    command.pre_exec(|| {
      // Pid namespace is deliberately left shared so the tracer can
      // address every descendant by pid.
      unshare(
        CloneFlags::CLONE_NEWNS
          | CloneFlags::CLONE_NEWNET
          | CloneFlags::CLONE_NEWUTS
          | CloneFlags::CLONE_NEWIPC,
      )
      .map_err(io_error)?;
      setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io_error)?;
      // Keep the caller's verdict pipe out of the sandbox: fd 3 becomes
      // another stderr, as harmless as we can make it.
      dup2(nix::libc::STDERR_FILENO, VERDICT_FD).map_err(io_error)?;
      Ok(())
    });
  }

  let child = command.spawn()?;
  Ok(Pid::from_raw(child.id() as i32))
}

fn io_error(errno: Errno) -> io::Error {
  io::Error::from_raw_os_error(errno as i32)
}
