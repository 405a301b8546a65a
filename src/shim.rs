use std::ffi::CString;
use std::fs::{create_dir_all, remove_dir_all, remove_file};
use std::path::Path;

use log::{debug, error, info, warn};
use nix::fcntl::{open, OFlag};
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::ptrace;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{raise, Signal};
use nix::sys::stat::{fchmodat, makedev, mknod, FchmodatFlags, Mode, SFlag};
use nix::unistd::{chdir, close, dup2, pivot_root, setgid, setuid, Gid, Uid};

use crate::config::SandboxArgs;
use crate::error::SandboxError;
use crate::utils::into_c_string;

/// Unprivileged uid/gid the user program runs as.
const SANDBOX_UID: u32 = 65534;
const SANDBOX_GID: u32 = 65534;

/// Output file size cap. Overruns raise SIGXFSZ, which the tracer maps to
/// an output-limit verdict.
const FSIZE_LIMIT: u64 = 256 << 20;

/// Entry point of the `child` subcommand.
///
/// Runs inside the fresh mount/net/uts/ipc namespaces the supervisor
/// created for us. Everything here happens before the user program gains
/// control; on success this function never returns because `execv` takes
/// over the process image.
pub fn child_main(args: &SandboxArgs) -> Result<(), SandboxError> {
  change_root(&args.rootfs)?;

  debug!("Change to workdir {}", args.workdir.display());
  if let Err(err) = chdir(&args.workdir) {
    error!("Chdir {} fails: {}", args.workdir.display(), err);
  }

  prepare_mounts();
  redirect_io(args)?;

  setrlimit(Resource::RLIMIT_FSIZE, FSIZE_LIMIT, FSIZE_LIMIT)?;

  drop_privileges();

  let argv = args
    .split_command()
    .iter()
    .map(|part| into_c_string(part))
    .collect::<Vec<CString>>();
  if argv.is_empty() {
    return Err(SandboxError::exec("empty command"));
  }

  // Stop here so the supervisor can attach the cgroup and install its
  // ptrace options; it resumes us once everything is in place.
  ptrace::traceme()?;
  raise(Signal::SIGSTOP)?;

  info!("Exec {}", args.command);
  nix::unistd::execv(&argv[0], &argv)?;
  unreachable!()
}

/// Swap / for the caller-supplied rootfs. We are in a private mount
/// namespace, so the host never sees any of this.
fn change_root(rootfs: &Path) -> Result<(), SandboxError> {
  info!("Pivot root into {}", rootfs.display());

  // Stop mount events from propagating back to the host.
  mount(
    None::<&str>,
    "/",
    None::<&str>,
    MsFlags::MS_PRIVATE | MsFlags::MS_REC,
    None::<&str>,
  )?;

  // pivot_root demands that the new root is a mount point.
  mount(Some(rootfs), rootfs, None::<&str>, MsFlags::MS_BIND, None::<&str>)?;

  let put_old = rootfs.join(".old_root");
  create_dir_all(&put_old)?;
  pivot_root(rootfs, &put_old)?;
  chdir("/")?;

  // Detaching the old root is the point of the whole exercise.
  umount2("/.old_root", MntFlags::MNT_DETACH)?;
  if let Err(err) = remove_dir_all("/.old_root") {
    warn!("Remove /.old_root fails: {}", err);
  }

  Ok(())
}

/// Stage /proc, /dev, /dev/pts and /sys inside the new root, then recreate
/// /dev/null on the fresh tmpfs. Failures are logged and skipped: a rootfs
/// without the mount points can still run static binaries.
fn prepare_mounts() {
  debug!("Mount pseudo filesystems");
  try_mount("proc", "/proc", "proc");
  try_mount("tmpfs", "/dev", "tmpfs");
  if let Err(err) = create_dir_all("/dev/pts") {
    warn!("Create /dev/pts fails: {}", err);
  }
  try_mount("devpts", "/dev/pts", "devpts");
  try_mount("sysfs", "/sys", "sysfs");

  debug!("Prepare /dev/null");
  let _ = remove_file("/dev/null");
  match mknod(
    "/dev/null",
    SFlag::S_IFCHR,
    Mode::from_bits_truncate(0o666),
    makedev(1, 3),
  ) {
    Ok(_) => {
      // mknod is subject to umask; fix the mode up afterwards.
      if let Err(err) = fchmodat(
        None,
        "/dev/null",
        Mode::from_bits_truncate(0o666),
        FchmodatFlags::FollowSymlink,
      ) {
        warn!("Chmod /dev/null fails: {}", err);
      }
    }
    Err(err) => warn!("Mknod /dev/null fails: {}", err),
  }
}

fn try_mount(source: &str, target: &str, fstype: &str) {
  if let Err(err) = mount(Some(source), target, Some(fstype), MsFlags::empty(), None::<&str>) {
    warn!("Mount {} at {} fails: {}", fstype, target, err);
  }
}

/// Point fds 0/1/2 at the caller-requested files. The paths resolve inside
/// the pivoted root.
fn redirect_io(args: &SandboxArgs) -> Result<(), SandboxError> {
  if let Some(path) = args.stdin_path() {
    debug!("Redirect stdin from {}", path);
    let fd = open(path, OFlag::O_RDONLY, Mode::empty())?;
    dup2(fd, STDIN_FILENO)?;
    close(fd)?;
  }
  if let Some(path) = args.stdout_path() {
    debug!("Redirect stdout to {}", path);
    let fd = open(
      path,
      OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_TRUNC,
      Mode::from_bits_truncate(0o644),
    )?;
    dup2(fd, STDOUT_FILENO)?;
    close(fd)?;
  }
  if let Some(path) = args.stderr_path() {
    debug!("Redirect stderr to {}", path);
    let fd = open(
      path,
      OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_TRUNC,
      Mode::from_bits_truncate(0o644),
    )?;
    dup2(fd, STDERR_FILENO)?;
    close(fd)?;
  }
  Ok(())
}

/// Become nobody, gid first while we still may. Failures are logged so
/// unprivileged smoke runs still reach exec; on a judge host these always
/// succeed.
fn drop_privileges() {
  if let Err(err) = setgid(Gid::from_raw(SANDBOX_GID)) {
    error!("Set gid {} fails: {}", SANDBOX_GID, err);
  }
  if let Err(err) = setuid(Uid::from_raw(SANDBOX_UID)) {
    error!("Set uid {} fails: {}", SANDBOX_UID, err);
  }
}
