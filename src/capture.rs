use std::fs::File;
use std::io::Read;
use std::os::unix::io::FromRawFd;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::error::SandboxError;

/// Upper bound on the bytes kept in memory; the verdict truncates further.
const CAPTURE_KEEP: usize = 4096;

/// Bounded in-memory capture of the shim's combined stdout and stderr,
/// used when the caller redirects neither stream (compile logs).
///
/// The writer half is installed as the child's fd 1 and fd 2. A detached
/// reader thread keeps draining the pipe so the tracee never blocks on a
/// full pipe buffer; bytes past the keep limit are read and discarded.
pub struct OutputCapture {
  buffer: Arc<Mutex<Vec<u8>>>,
}

impl OutputCapture {
  /// Returns the capture handle and the write end destined for the child.
  pub fn new() -> Result<(OutputCapture, File), SandboxError> {
    let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC)?;
    let mut reader = unsafe { File::from_raw_fd(read_fd) };
    let writer = unsafe { File::from_raw_fd(write_fd) };

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    // The reader is deliberately detached; it dies with the process.
    let _reader = thread::Builder::new()
      .name("capture".into())
      .spawn(move || {
        let mut chunk = [0u8; 1024];
        loop {
          match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(count) => {
              let mut buffer = sink.lock().unwrap();
              let room = CAPTURE_KEEP.saturating_sub(buffer.len());
              buffer.extend_from_slice(&chunk[..count.min(room)]);
            }
            Err(err) => {
              warn!("Capture read fails: {}", err);
              break;
            }
          }
        }
        debug!("Capture pipe drained");
      })?;

    Ok((OutputCapture { buffer }, writer))
  }

  /// Snapshot of what has been captured so far. Does not wait for the
  /// pipe to close: a straggler descendant holding fd 1 open must not be
  /// able to stall the verdict.
  pub fn contents(&self) -> Vec<u8> {
    self.buffer.lock().unwrap().clone()
  }
}
