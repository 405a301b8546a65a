use clap::Parser;

use hustbox::config::SandboxArgs;

mod common;

#[derive(Parser, Debug)]
struct TestCli {
  #[command(flatten)]
  args: SandboxArgs,
}

fn parse(argv: &[&str]) -> SandboxArgs {
  let mut full = vec!["hustbox"];
  full.extend_from_slice(argv);
  TestCli::try_parse_from(full).unwrap().args
}

#[test]
fn it_should_apply_the_documented_defaults() {
  common::setup();
  let args = parse(&[]);
  assert_eq!(args.rootfs.to_str(), Some("/tmp"));
  assert_eq!(args.command, "/bin/false");
  assert_eq!(args.workdir.to_str(), Some("/code"));
  assert_eq!(args.time, 1000);
  assert_eq!(args.memory, 262144);
  assert_eq!(args.sid, 0);
}

#[test]
fn it_should_parse_the_full_flag_set() {
  common::setup();
  let args = parse(&[
    "--rootfs=/judge/rootfs",
    "--cmd=/code/Main",
    "--cwd=/code",
    "--stdin=/code/data.in",
    "--stdout=/code/user.out",
    "--time=2000",
    "--memory=65536",
    "--sid=42",
  ]);
  assert_eq!(args.rootfs.to_str(), Some("/judge/rootfs"));
  assert_eq!(args.command, "/code/Main");
  assert_eq!(args.stdin_path(), Some("/code/data.in"));
  assert_eq!(args.stdout_path(), Some("/code/user.out"));
  assert_eq!(args.stderr_path(), None);
  assert_eq!(args.time, 2000);
  assert_eq!(args.sid, 42);
}

#[test]
fn it_should_split_the_command_on_spaces() {
  common::setup();
  let args = parse(&["--cmd=/usr/bin/python3 -c print(1)"]);
  assert_eq!(
    args.split_command(),
    vec!["/usr/bin/python3", "-c", "print(1)"]
  );
}

#[test]
fn it_should_drop_empty_command_tokens() {
  common::setup();
  let args = parse(&["--cmd=/bin/echo  hello"]);
  assert_eq!(args.split_command(), vec!["/bin/echo", "hello"]);
}

#[test]
fn it_should_treat_empty_redirections_as_inherit() {
  common::setup();
  let args = parse(&["--stdin=", "--stdout="]);
  assert_eq!(args.stdin_path(), None);
  assert_eq!(args.stdout_path(), None);
  assert!(args.capture_output());
}

#[test]
fn it_should_only_capture_when_nothing_is_redirected() {
  common::setup();
  assert!(parse(&[]).capture_output());
  assert!(!parse(&["--stdout=/tmp/u.out"]).capture_output());
  assert!(!parse(&["--stderr=/tmp/u.err"]).capture_output());
}

#[test]
fn it_should_derive_the_wall_clock_budget() {
  common::setup();
  let args = parse(&["--time=1500"]);
  assert_eq!(args.cpu_time_limit().as_millis(), 1500);
  assert_eq!(args.real_time_limit().as_millis(), 4500);
}

#[test]
fn it_should_pad_the_memory_cap_for_bookkeeping() {
  common::setup();
  let args = parse(&["--memory=262144"]);
  assert_eq!(args.memory_max_bytes(), 262144 * 1024 + 4096);
}
