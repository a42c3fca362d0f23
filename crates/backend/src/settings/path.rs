//! Path template resolution.
//!
//! Templates are slash separated and use `{token}` placeholders. A template
//! that names a token with no current value resolves to `None`; partial paths
//! are never produced.

use std::path::{Component, MAIN_SEPARATOR, PathBuf};

use super::SettingsStore;

const TIMESPEC_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Values available to templates, gathered once per resolution.
struct Tokens {
  timespec: Option<String>,
  run_id: Option<String>,
  run_mode: &'static str,
  proc: u32,
  stage_dir: String,
}

impl Tokens {
  fn lookup(&self, name: &str) -> Option<String> {
    match name {
      "timespec" => self.timespec.clone(),
      "run_id" => self.run_id.clone(),
      "run_mode" => Some(self.run_mode.to_string()),
      "proc" => Some(self.proc.to_string()),
      "stage_dir" => Some(self.stage_dir.clone()),
      _ => None,
    }
  }
}

/// Formats one segment; `None` when a placeholder cannot be filled or the
/// braces are unbalanced.
fn format_segment(segment: &str, tokens: &Tokens) -> Option<String> {
  let mut out = String::with_capacity(segment.len());
  let mut chars = segment.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '{' if chars.peek() == Some(&'{') => {
        chars.next();
        out.push('{');
      }
      '}' if chars.peek() == Some(&'}') => {
        chars.next();
        out.push('}');
      }
      '{' => {
        let mut name = String::new();
        loop {
          match chars.next()? {
            '}' => break,
            ch => name.push(ch),
          }
        }
        out.push_str(&tokens.lookup(&name)?);
      }
      '}' => return None,
      ch => out.push(ch),
    }
  }
  Some(out)
}

fn split_part(part: &str) -> impl Iterator<Item = &str> {
  let sep = if part.contains(MAIN_SEPARATOR) { MAIN_SEPARATOR } else { '/' };
  part.split(sep)
}

fn expand_home(path: PathBuf) -> PathBuf {
  let mut components = path.components();
  match components.next() {
    Some(Component::Normal(first)) if first == "~" => match ::dirs::home_dir() {
      Some(home) => home.join(components.as_path()),
      None => path,
    },
    _ => path,
  }
}

impl SettingsStore {
  /// Joins and formats `parts` into a path.
  pub fn resolve_path(&self, parts: &[&str]) -> Option<PathBuf> {
    let tokens = self.tokens();
    let mut path = PathBuf::new();
    for part in parts {
      if part.starts_with('/') {
        path.push("/");
      }
      for segment in split_part(part).filter(|s| !s.is_empty()) {
        path.push(format_segment(segment, &tokens)?);
      }
    }
    Some(expand_home(path))
  }

  fn tokens(&self) -> Tokens {
    Tokens {
      timespec: self.started_at().map(|t| t.format(TIMESPEC_FORMAT).to_string()),
      run_id: self.str_value("run_id").map(str::to_string),
      run_mode: if self.offline() { "offline-run" } else { "run" },
      proc: std::process::id(),
      stage_dir: self.stage_dir().to_string_lossy().into_owned(),
    }
  }
}
