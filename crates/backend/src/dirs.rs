use std::path::{Path, PathBuf};

/// Port file the networked worker writes for the process `pid`.
pub fn port_file_path(pid: u32) -> PathBuf {
  std::env::temp_dir().join(format!("out-{pid}-port.txt"))
}

/// Check whether the current user can write into `path`.
#[cfg(unix)]
pub fn is_writable(path: &Path) -> bool {
  use std::{ffi::CString, os::unix::ffi::OsStrExt};

  let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
    return false;
  };
  // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
  unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
pub fn is_writable(path: &Path) -> bool {
  std::fs::metadata(path).map(|m| !m.permissions().readonly()).unwrap_or(false)
}

/// Check whether a process with `pid` still exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
  let Ok(pid) = libc::pid_t::try_from(pid) else {
    return false;
  };
  // SAFETY: signal 0 performs only the existence and permission check
  let rc = unsafe { libc::kill(pid, 0) };
  rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_port_file_name() {
    let path = port_file_path(4242);
    assert_eq!(path.file_name().unwrap(), "out-4242-port.txt");
    assert_eq!(path.parent().unwrap(), std::env::temp_dir());
  }

  #[test]
  fn test_temp_dir_is_writable() {
    let dir = TempDir::new().unwrap();
    assert!(is_writable(dir.path()));
    assert!(!is_writable(&dir.path().join("missing")));
  }

  #[test]
  fn test_own_process_alive() {
    assert!(process_alive(std::process::id()));
  }
}
