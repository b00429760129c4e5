//! Terminal and JSON rendering for command results.
//!
//! Human output goes to stdout (results) and stderr (problems), coloured only
//! when the stream supports it. `-o json` replaces the human output with one
//! pretty-printed JSON document on stdout.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{AnsiColors, OwoColorize, Stream};

use restpack_lib::pipeline::{StepRecord, StepStatus};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIPPED: &str = "○";
}

#[derive(Clone, Copy)]
enum Tone {
  Success,
  Error,
  Warning,
  Info,
}

impl Tone {
  fn symbol(self) -> &'static str {
    match self {
      Tone::Success => symbols::SUCCESS,
      Tone::Error => symbols::ERROR,
      Tone::Warning => symbols::WARNING,
      Tone::Info => symbols::INFO,
    }
  }

  fn color(self) -> AnsiColors {
    match self {
      Tone::Success => AnsiColors::Green,
      Tone::Error => AnsiColors::Red,
      Tone::Warning => AnsiColors::Yellow,
      Tone::Info => AnsiColors::Blue,
    }
  }

  /// Problems go to stderr and are coloured in full.
  fn is_problem(self) -> bool {
    matches!(self, Tone::Error | Tone::Warning)
  }
}

fn status_line(tone: Tone, message: &str) {
  let color = tone.color();
  if tone.is_problem() {
    eprintln!(
      "{} {}",
      tone.symbol().if_supports_color(Stream::Stderr, |s| s.color(color)),
      message.if_supports_color(Stream::Stderr, |s| s.color(color))
    );
  } else {
    println!(
      "{} {}",
      tone.symbol().if_supports_color(Stream::Stdout, |s| s.color(color)),
      message
    );
  }
}

pub fn print_success(message: &str) {
  status_line(Tone::Success, message);
}

pub fn print_error(message: &str) {
  status_line(Tone::Error, message);
}

pub fn print_warning(message: &str) {
  status_line(Tone::Warning, message);
}

pub fn print_info(message: &str) {
  status_line(Tone::Info, message);
}

/// An indented `label: value` line under a status line.
pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One line per pipeline step: symbol, dotted step name, then timing, failure
/// category or the step that caused the skip.
pub fn print_step(record: &StepRecord) {
  let (symbol, color, note) = match &record.status {
    StepStatus::Succeeded { duration_ms, .. } => (
      symbols::SUCCESS,
      AnsiColors::Green,
      format_duration(Duration::from_millis(*duration_ms)),
    ),
    StepStatus::Failed { kind, .. } => (symbols::ERROR, AnsiColors::Red, kind.to_string()),
    StepStatus::Skipped { failed_dependency } => (
      symbols::SKIPPED,
      AnsiColors::BrightBlack,
      format!("skipped after {failed_dependency}"),
    ),
  };

  println!(
    "  {} {:<22} {}",
    symbol.if_supports_color(Stream::Stdout, |s| s.color(color)),
    record.step.name(),
    note.if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

/// Short form of a content hash for human output.
pub fn short_hash(hash: &str) -> &str {
  hash.get(..12).unwrap_or(hash)
}

/// Compact duration: `840ms`, `3.2s`, `2m07s`.
pub fn format_duration(duration: Duration) -> String {
  let millis = duration.as_millis();
  match millis {
    0..=999 => format!("{millis}ms"),
    1_000..=59_999 => format!("{:.1}s", duration.as_secs_f64()),
    _ => {
      let secs = duration.as_secs();
      format!("{}m{:02}s", secs / 60, secs % 60)
    }
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
