use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use nix::unistd::Pid;

use crate::error::SandboxError;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";
const CGROUP_PARENT: &str = "/sys/fs/cgroup/hustoj";
const SUBTREE_CONTROLLERS: &str = "+cpu +memory +pids";
const PIDS_MAX: &str = "64";

/// 1.2 cores over a 100 ms period: short parallel bursts fit inside the
/// wall-clock budget without granting a whole extra core.
const CPU_MAX: &str = "120000 100000";

/// Per-run cgroup v2 control group.
///
/// Created while the shim is stopped for the trace handshake and torn down
/// on drop: processes still in the group are migrated back to the root
/// group first, then the directory is removed.
pub struct RunCgroup {
  path: PathBuf,
}

impl RunCgroup {
  /// The directory name embeds both solution id and shim pid, so
  /// concurrent invocations never collide.
  pub fn path_for(solution_id: i64, pid: Pid) -> PathBuf {
    Path::new(CGROUP_PARENT).join(format!("run-{}-{}", solution_id, pid))
  }

  pub fn create(solution_id: i64, pid: Pid, memory_max_bytes: u64) -> Result<RunCgroup, SandboxError> {
    let path = Self::path_for(solution_id, pid);
    debug!("Create cgroup {}", path.display());
    fs::create_dir_all(&path)
      .map_err(|err| SandboxError::cgroup(format!("mkdir {}: {}", path.display(), err)))?;

    // Controllers must be enabled at both parent boundaries before the
    // per-run limit files exist.
    write_control(Path::new(CGROUP_ROOT), "cgroup.subtree_control", SUBTREE_CONTROLLERS)?;
    write_control(Path::new(CGROUP_PARENT), "cgroup.subtree_control", SUBTREE_CONTROLLERS)?;

    write_control(&path, "memory.max", &memory_max_bytes.to_string())?;
    write_control(&path, "cpu.max", CPU_MAX)?;
    write_control(&path, "pids.max", PIDS_MAX)?;

    Ok(RunCgroup { path })
  }

  pub fn attach(&self, pid: Pid) -> Result<(), SandboxError> {
    info!("Attach pid {} to cgroup {}", pid, self.path.display());
    write_control(&self.path, "cgroup.procs", &pid.to_string())
  }

  pub fn stat_path(&self) -> PathBuf {
    self.path.join("cpu.stat")
  }

  /// Cumulative CPU time consumed by the whole group.
  pub fn cpu_usage(&self) -> Result<Duration, SandboxError> {
    read_cpu_usage(&self.stat_path())
  }

  /// Peak resident memory in KiB; a missing or unreadable counter reads
  /// as zero.
  pub fn memory_peak_kib(&self) -> u64 {
    let path = self.path.join("memory.peak");
    match fs::read_to_string(&path) {
      Ok(data) => data.trim().parse::<u64>().unwrap_or(0) / 1024,
      Err(err) => {
        warn!("Read {} fails: {}", path.display(), err);
        0
      }
    }
  }
}

impl Drop for RunCgroup {
  fn drop(&mut self) {
    // Never remove anything outside the managed subtree.
    if !is_managed_path(&self.path) {
      warn!("Refuse to remove cgroup outside {}: {}", CGROUP_PARENT, self.path.display());
      return;
    }

    if let Ok(data) = fs::read_to_string(self.path.join("cgroup.procs")) {
      for pid in data.split_whitespace() {
        debug!("Migrate straggler pid {} to the root cgroup", pid);
        if let Err(err) = fs::write(Path::new(CGROUP_ROOT).join("cgroup.procs"), pid) {
          warn!("Migrate pid {} fails: {}", pid, err);
        }
      }
    }

    debug!("Remove cgroup {}", self.path.display());
    if let Err(err) = fs::remove_dir(&self.path) {
      warn!("Remove cgroup {} fails: {}", self.path.display(), err);
    }
  }
}

/// Removal guard: only paths strictly below the hustoj subtree are ours.
pub fn is_managed_path(path: &Path) -> bool {
  path.starts_with(CGROUP_PARENT) && path != Path::new(CGROUP_PARENT)
}

fn write_control(dir: &Path, file: &str, value: &str) -> Result<(), SandboxError> {
  let path = dir.join(file);
  fs::write(&path, value)
    .map_err(|err| SandboxError::cgroup(format!("write {}: {}", path.display(), err)))
}

/// Pull the `usage_usec` field out of a v2 `cpu.stat` blob.
pub fn parse_usage_usec(content: &str) -> Option<u64> {
  content.lines().find_map(|line| {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
      (Some("usage_usec"), Some(value)) => value.parse().ok(),
      _ => None,
    }
  })
}

/// Read cumulative CPU time from a `cpu.stat` file.
pub fn read_cpu_usage(path: &Path) -> Result<Duration, SandboxError> {
  let content = fs::read_to_string(path)
    .map_err(|err| SandboxError::cgroup(format!("read {}: {}", path.display(), err)))?;
  parse_usage_usec(&content)
    .map(Duration::from_micros)
    .ok_or_else(|| SandboxError::cgroup(format!("no usage_usec field in {}", path.display())))
}
