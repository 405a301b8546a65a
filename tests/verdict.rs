use std::time::Duration;

use nix::sys::signal::Signal;

use hustbox::error::RunError;
use hustbox::verdict::{signal_name, Verdict, OJ_AC, OJ_ML, OJ_OL, OJ_RE, OJ_TL};

mod common;

const TIME_LIMIT: Duration = Duration::from_millis(1000);
const MEMORY_LIMIT_KIB: u64 = 262144;

fn classify(error: Option<RunError>, exit_status: i32, time_ms: u64, memory_kib: u64) -> Verdict {
  Verdict::classify(
    error,
    exit_status,
    TIME_LIMIT,
    MEMORY_LIMIT_KIB,
    Duration::from_millis(time_ms),
    memory_kib,
    1,
    b"",
  )
}

#[test]
fn it_should_accept_clean_exit() {
  common::setup();
  let verdict = classify(None, 0, 12, 1024);
  assert_eq!(verdict.user_status, OJ_AC);
  assert_eq!(verdict.exit_status, 0);
  assert_eq!(verdict.time, 12);
  assert_eq!(verdict.memory, 1024);
  assert_eq!(verdict.exit_signal, "");
}

#[test]
fn it_should_keep_default_status_without_classification() {
  common::setup();
  // A non-zero exit with no recorded violation stays AC; the outer judge
  // decides based on the output files.
  let verdict = classify(None, 1, 5, 512);
  assert_eq!(verdict.user_status, OJ_AC);
  assert_eq!(verdict.exit_status, 1);
}

#[test]
fn it_should_map_cpu_burn_to_time_limit() {
  common::setup();
  let verdict = classify(Some(RunError::CgroupLimitExceeded), -1, 1104, 2048);
  assert_eq!(verdict.user_status, OJ_TL);
  assert_eq!(verdict.time, 1104);
}

#[test]
fn it_should_stamp_the_wall_clock_sentinel() {
  common::setup();
  let verdict = classify(Some(RunError::RealTimeTimeout), -1, 7, 2048);
  assert_eq!(verdict.user_status, OJ_TL);
  // 3 * 1000 + 233, bit for bit: the judge matches this value.
  assert_eq!(verdict.time, 3233);
}

#[test]
fn it_should_name_the_fatal_signal() {
  common::setup();
  let verdict = classify(
    Some(RunError::RuntimeError(Some(Signal::SIGSEGV))),
    -1,
    20,
    2048,
  );
  assert_eq!(verdict.user_status, OJ_RE);
  assert_eq!(verdict.exit_signal, "segmentation fault");
}

#[test]
fn it_should_remap_oom_kills_to_memory_limit() {
  common::setup();
  let verdict = classify(
    Some(RunError::RuntimeError(Some(Signal::SIGKILL))),
    -1,
    20,
    MEMORY_LIMIT_KIB + 2,
  );
  assert_eq!(verdict.user_status, OJ_ML);
  // ML swallows the signal name.
  assert_eq!(verdict.exit_signal, "");
}

#[test]
fn it_should_map_sigxfsz_to_output_limit() {
  common::setup();
  let verdict = classify(Some(RunError::OutputLimitExceeded), -1, 20, 2048);
  assert_eq!(verdict.user_status, OJ_OL);
}

#[test]
fn it_should_report_shim_setup_death_as_runtime_error() {
  common::setup();
  let verdict = classify(Some(RunError::RuntimeError(None)), 1, 0, 0);
  assert_eq!(verdict.user_status, OJ_RE);
  assert_eq!(verdict.exit_status, 1);
  assert_eq!(verdict.exit_signal, "");
}

#[test]
fn it_should_keep_the_wire_field_names() {
  common::setup();
  let verdict = classify(None, 0, 1, 1);
  let value = serde_json::to_value(&verdict).unwrap();
  let object = value.as_object().unwrap();
  let mut keys = object.keys().map(String::as_str).collect::<Vec<&str>>();
  keys.sort_unstable();
  assert_eq!(
    keys,
    vec![
      "combined_output",
      "exit_signal",
      "exit_status",
      "memory",
      "process_cnt",
      "time",
      "user_status"
    ]
  );
}

#[test]
fn it_should_encode_as_a_single_line() {
  common::setup();
  let verdict = classify(None, 0, 1, 1);
  let encoded = serde_json::to_string(&verdict).unwrap();
  assert!(!encoded.contains('\n'));
}

#[test]
fn it_should_truncate_captured_output() {
  common::setup();
  let output = vec![b'x'; 4000];
  let verdict = Verdict::classify(
    None,
    0,
    TIME_LIMIT,
    MEMORY_LIMIT_KIB,
    Duration::from_millis(1),
    1,
    1,
    &output,
  );
  assert_eq!(verdict.combined_output.len(), 1024);
}

#[test]
fn it_should_survive_a_multibyte_cut() {
  common::setup();
  // 1023 ASCII bytes followed by a three-byte character straddling the cut.
  let mut output = vec![b'a'; 1023];
  output.extend_from_slice("中".as_bytes());
  let verdict = Verdict::classify(
    None,
    0,
    TIME_LIMIT,
    MEMORY_LIMIT_KIB,
    Duration::from_millis(1),
    1,
    1,
    &output,
  );
  assert!(verdict.combined_output.starts_with("aaa"));
  assert!(verdict.combined_output.len() <= 1024);
}

#[test]
fn it_should_bound_binary_output() {
  common::setup();
  // Crashed programs routinely dump raw binary; every invalid byte decodes
  // to a three-byte replacement character, which must not stretch the cap.
  let output = vec![0xFF; 2000];
  let verdict = Verdict::classify(
    None,
    0,
    TIME_LIMIT,
    MEMORY_LIMIT_KIB,
    Duration::from_millis(1),
    1,
    1,
    &output,
  );
  assert!(!verdict.combined_output.is_empty());
  assert!(verdict.combined_output.len() <= 1024);
}

#[test]
fn it_should_use_human_signal_names() {
  common::setup();
  assert_eq!(signal_name(Signal::SIGKILL), "killed");
  assert_eq!(signal_name(Signal::SIGXFSZ), "file size limit exceeded");
  assert_eq!(signal_name(Signal::SIGXCPU), "CPU time limit exceeded");
  assert_eq!(signal_name(Signal::SIGABRT), "aborted");
}
