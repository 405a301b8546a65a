use std::fs;
use std::path::Path;

use nix::unistd::Pid;
use tempfile::tempdir;

use hustbox::cgroup::{is_managed_path, parse_usage_usec, read_cpu_usage, RunCgroup};

mod common;

const CPU_STAT: &str = "usage_usec 1234567\n\
                        user_usec 1000000\n\
                        system_usec 234567\n\
                        nr_periods 0\n\
                        nr_throttled 0\n\
                        throttled_usec 0\n";

#[test]
fn it_should_parse_usage_usec() {
  common::setup();
  assert_eq!(parse_usage_usec(CPU_STAT), Some(1234567));
}

#[test]
fn it_should_reject_stat_blobs_without_usage() {
  common::setup();
  assert_eq!(parse_usage_usec(""), None);
  assert_eq!(parse_usage_usec("user_usec 10\nsystem_usec 2\n"), None);
  assert_eq!(parse_usage_usec("usage_usec not-a-number\n"), None);
}

#[test]
fn it_should_read_cpu_usage_from_a_stat_file() {
  common::setup();
  let dir = tempdir().unwrap();
  let stat = dir.path().join("cpu.stat");
  fs::write(&stat, CPU_STAT).unwrap();

  let usage = read_cpu_usage(&stat).unwrap();
  assert_eq!(usage.as_millis(), 1234);
}

#[test]
fn it_should_error_on_a_missing_stat_file() {
  common::setup();
  let dir = tempdir().unwrap();
  assert!(read_cpu_usage(&dir.path().join("cpu.stat")).is_err());
}

#[test]
fn it_should_name_the_group_after_solution_and_pid() {
  common::setup();
  let path = RunCgroup::path_for(42, Pid::from_raw(1000));
  assert_eq!(
    path,
    Path::new("/sys/fs/cgroup/hustoj/run-42-1000").to_path_buf()
  );
}

#[test]
fn it_should_only_manage_paths_below_the_hustoj_subtree() {
  common::setup();
  assert!(is_managed_path(Path::new("/sys/fs/cgroup/hustoj/run-1-2")));
  assert!(!is_managed_path(Path::new("/sys/fs/cgroup/hustoj")));
  assert!(!is_managed_path(Path::new("/sys/fs/cgroup/system.slice")));
  assert!(!is_managed_path(Path::new("/tmp/hustoj/run-1-2")));
}
