//! Report rendering for the CLI.
//!
//! Every command produces a serializable report. With `--output json` the
//! report is printed as is; otherwise the command renders it as status lines
//! and labelled stats. Status lines for warnings and errors go to stderr.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{AnsiColors, OwoColorize, Stream};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }

  /// Print `report` as JSON, or hand it to `text` for the human rendering.
  pub fn report<T: Serialize>(self, report: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    if self.is_json() {
      let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
      println!("{}", json);
    } else {
      println!();
      text(report);
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy)]
enum Status {
  Success,
  Error,
  Warning,
  Info,
}

impl Status {
  fn symbol(self) -> &'static str {
    match self {
      Status::Success => "✓",
      Status::Error => "✗",
      Status::Warning => "⚠",
      Status::Info => "•",
    }
  }

  fn color(self) -> AnsiColors {
    match self {
      Status::Success => AnsiColors::Green,
      Status::Error => AnsiColors::Red,
      Status::Warning => AnsiColors::Yellow,
      Status::Info => AnsiColors::Blue,
    }
  }
}

fn status_line(status: Status, message: &str) {
  let color = status.color();
  match status {
    Status::Success | Status::Info => println!(
      "{} {}",
      status.symbol().if_supports_color(Stream::Stdout, |s| s.color(color)),
      message
    ),
    Status::Error | Status::Warning => eprintln!(
      "{} {}",
      status.symbol().if_supports_color(Stream::Stderr, |s| s.color(color)),
      message.if_supports_color(Stream::Stderr, |s| s.color(color))
    ),
  }
}

pub fn success(message: &str) {
  status_line(Status::Success, message);
}

pub fn error(message: &str) {
  status_line(Status::Error, message);
}

pub fn warning(message: &str) {
  status_line(Status::Warning, message);
}

pub fn info(message: &str) {
  status_line(Status::Info, message);
}

pub fn stat(label: &str, value: impl Display) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// `1 file`, `3 files`.
pub fn count(n: usize, noun: &str) -> String {
  if n == 1 {
    format!("1 {}", noun)
  } else {
    format!("{} {}s", n, noun)
  }
}

/// Teardown wording for a part of the stage that was or was not there.
pub fn removal(deleted: bool) -> &'static str {
  if deleted { "deleted" } else { "absent" }
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];
  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut size = bytes as f64 / 1024.0;
  let mut unit = 0;
  while size >= 1024.0 && unit + 1 < UNITS.len() {
    size /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", size, UNITS[unit])
}

/// Deploys take seconds to minutes; sub-second precision only below a minute.
pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else {
    format!("{:.1}s", duration.as_secs_f64())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counts_are_pluralized() {
    assert_eq!(count(0, "object"), "0 objects");
    assert_eq!(count(1, "file"), "1 file");
    assert_eq!(count(3, "function"), "3 functions");
  }

  #[test]
  fn removal_wording() {
    assert_eq!(removal(true), "deleted");
    assert_eq!(removal(false), "absent");
  }

  #[test]
  fn bytes_use_binary_units() {
    assert_eq!(format_bytes(10), "10 B");
    assert_eq!(format_bytes(2048), "2.0 KB");
    assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
  }

  #[test]
  fn durations_round_for_deploys() {
    assert_eq!(format_duration(Duration::from_millis(50)), "0.1s");
    assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
    assert_eq!(format_duration(Duration::from_secs(185)), "3m 5s");
  }

  #[test]
  fn output_format_parses_from_flag() {
    assert!(OutputFormat::from_str("json", true).unwrap().is_json());
    assert!(!OutputFormat::default().is_json());
  }
}
