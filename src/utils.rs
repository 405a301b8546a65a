use std::ffi::CString;

use flexi_logger::DeferredNow;
use log::Record;

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Attach pid 4242 to cgroup```
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

pub(crate) fn into_c_string(string: &str) -> CString {
  CString::new(string).expect("Convert &str to CString should work")
}

/// Decode `bytes` lossily and keep at most `max` bytes of the result.
///
/// The cut happens on the decoded string, backing off to the previous char
/// boundary: replacement characters are three bytes each, so cutting the
/// raw input first could let invalid tails expand past the bound.
pub fn truncate_output(bytes: &[u8], max: usize) -> String {
  let mut text = String::from_utf8_lossy(bytes).into_owned();
  if text.len() > max {
    let mut end = max;
    while !text.is_char_boundary(end) {
      end -= 1;
    }
    text.truncate(end);
  }
  text
}
