use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use nix::sys::signal::{kill, Signal};

use crate::capture::OutputCapture;
use crate::checker;
use crate::config::SandboxArgs;
use crate::error::{RunError, SandboxError};
use crate::tracer::{self, TraceOutcome, TracerReady};
use crate::verdict::Verdict;

/// The first of these to arrive decides how the run ends.
enum RunEvent {
  TracerDone(Result<TraceOutcome, SandboxError>),
  CheckerFailed(RunError),
}

/// Entry point of the `sandbox` subcommand: run one traced program to
/// completion and produce its verdict.
///
/// Two legs run in parallel. The tracer owns its OS thread (ptrace is
/// per-thread) and follows the traced tree; the checker polls resource
/// usage. Whoever reports first wins: a checker violation makes us SIGKILL
/// the shim and wait for the tracer to drain the death, a finished tracer
/// just cancels the checker. Both threads are joined before the final
/// counters are read and the cgroup is torn down.
pub fn run(args: &SandboxArgs) -> Result<Verdict, SandboxError> {
  let cpu_limit = args.cpu_time_limit();
  let real_time_limit = args.real_time_limit();
  info!(
    "Supervisor started (cpu {:?}, wall {:?})",
    cpu_limit, real_time_limit
  );

  let (capture, capture_sink) = if args.capture_output() {
    let (capture, sink) = OutputCapture::new()?;
    (Some(capture), Some(sink))
  } else {
    (None, None)
  };

  let (event_tx, event_rx) = mpsc::channel();
  let (ready_tx, ready_rx) = mpsc::channel();
  let start = Instant::now();

  let tracer_handle = {
    let args = args.clone();
    let event_tx = event_tx.clone();
    thread::Builder::new().name("tracer".into()).spawn(move || {
      let result = tracer::run(&args, capture_sink, ready_tx);
      event_tx.send(RunEvent::TracerDone(result)).ok();
    })?
  };

  // The checker must not start before the cgroup exists; the tracer tells
  // us when it does.
  let TracerReady { shim_pid, cgroup } = match ready_rx.recv() {
    Ok(ready) => ready,
    Err(_) => {
      // The tracer bailed before the handshake; its event says why.
      let result = wait_tracer(&event_rx);
      tracer_handle.join().ok();
      let outcome = result?;
      let output = capture.map(|capture| capture.contents()).unwrap_or_default();
      return Ok(Verdict::classify(
        outcome.error.clone(),
        outcome.exit_status,
        cpu_limit,
        args.memory,
        Duration::ZERO,
        0,
        outcome.process_cnt,
        &output,
      ));
    }
  };

  let cancel = Arc::new(AtomicBool::new(false));
  let checker_handle = {
    let cancel = Arc::clone(&cancel);
    let stat_path = cgroup.stat_path();
    let event_tx = event_tx.clone();
    thread::Builder::new().name("checker".into()).spawn(move || {
      if let Some(violation) = checker::run(&stat_path, start, cpu_limit, real_time_limit, &cancel) {
        event_tx.send(RunEvent::CheckerFailed(violation)).ok();
      }
    })?
  };
  drop(event_tx);

  let mut final_error: Option<RunError> = None;

  let result = match event_rx.recv() {
    Ok(RunEvent::CheckerFailed(violation)) => {
      warn!("Checker reported {}; killing pid {}", violation, shim_pid);
      final_error = Some(violation);
      if let Err(err) = kill(shim_pid, Signal::SIGKILL) {
        error!("Kill pid {} fails: {}", shim_pid, err);
      }
      // The tracer observes the death and reports in.
      wait_tracer(&event_rx)
    }
    Ok(RunEvent::TracerDone(result)) => result,
    Err(_) => Err(SandboxError::fork("tracer and checker vanished")),
  };

  cancel.store(true, Ordering::Relaxed);
  checker_handle.join().ok();
  tracer_handle.join().ok();

  let outcome = result?;
  // A deliberate kill outranks whatever the tracer saw afterwards.
  let final_error = final_error.or_else(|| outcome.error.clone());

  let cpu_time = match cgroup.cpu_usage() {
    Ok(used) => used,
    Err(err) => {
      warn!("Read final CPU usage fails: {}", err);
      Duration::ZERO
    }
  };
  let memory_kib = cgroup.memory_peak_kib();
  // Migrate stragglers and remove the group before reporting.
  drop(cgroup);

  let output = capture.map(|capture| capture.contents()).unwrap_or_default();

  Ok(Verdict::classify(
    final_error,
    outcome.exit_status,
    cpu_limit,
    args.memory,
    cpu_time,
    memory_kib,
    outcome.process_cnt,
    &output,
  ))
}

/// Drain events until the tracer's report arrives. Late checker failures
/// are irrelevant once a kill is in flight.
fn wait_tracer(event_rx: &Receiver<RunEvent>) -> Result<TraceOutcome, SandboxError> {
  loop {
    match event_rx.recv() {
      Ok(RunEvent::TracerDone(result)) => return result,
      Ok(RunEvent::CheckerFailed(_)) => continue,
      Err(_) => return Err(SandboxError::fork("tracer thread died without reporting")),
    }
  }
}
