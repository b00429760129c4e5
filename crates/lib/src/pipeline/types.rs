//! Step identifiers, step results and pipeline errors.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::exec::CommandError;
use crate::lock::ImagesLockError;
use crate::placeholder::PlaceholderError;

/// The two stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Builder,
  Target,
}

impl std::fmt::Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Stage::Builder => write!(f, "builder"),
      Stage::Target => write!(f, "target"),
    }
  }
}

/// Every step the pipeline knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StepId {
  #[serde(rename = "builder.toolchain")]
  BuilderToolchain,
  #[serde(rename = "builder.sources")]
  BuilderSources,
  #[serde(rename = "builder.driver")]
  BuilderDriver,
  #[serde(rename = "builder.bytecode")]
  BuilderBytecode,
  #[serde(rename = "builder.seal")]
  BuilderSeal,
  #[serde(rename = "target.rootfs")]
  TargetRootfs,
  #[serde(rename = "target.interpreter")]
  TargetInterpreter,
  #[serde(rename = "target.venv")]
  TargetVenv,
  #[serde(rename = "target.dependencies")]
  TargetDependencies,
  #[serde(rename = "target.copy")]
  TargetCopy,
  #[serde(rename = "target.entrypoint")]
  TargetEntrypoint,
  #[serde(rename = "target.publish")]
  TargetPublish,
}

impl StepId {
  /// All steps in pipeline order.
  pub const ALL: [StepId; 12] = [
    StepId::BuilderToolchain,
    StepId::BuilderSources,
    StepId::BuilderDriver,
    StepId::BuilderBytecode,
    StepId::BuilderSeal,
    StepId::TargetRootfs,
    StepId::TargetInterpreter,
    StepId::TargetVenv,
    StepId::TargetDependencies,
    StepId::TargetCopy,
    StepId::TargetEntrypoint,
    StepId::TargetPublish,
  ];

  pub fn name(self) -> &'static str {
    match self {
      StepId::BuilderToolchain => "builder.toolchain",
      StepId::BuilderSources => "builder.sources",
      StepId::BuilderDriver => "builder.driver",
      StepId::BuilderBytecode => "builder.bytecode",
      StepId::BuilderSeal => "builder.seal",
      StepId::TargetRootfs => "target.rootfs",
      StepId::TargetInterpreter => "target.interpreter",
      StepId::TargetVenv => "target.venv",
      StepId::TargetDependencies => "target.dependencies",
      StepId::TargetCopy => "target.copy",
      StepId::TargetEntrypoint => "target.entrypoint",
      StepId::TargetPublish => "target.publish",
    }
  }

  pub fn stage(self) -> Stage {
    match self {
      StepId::BuilderToolchain
      | StepId::BuilderSources
      | StepId::BuilderDriver
      | StepId::BuilderBytecode
      | StepId::BuilderSeal => Stage::Builder,
      _ => Stage::Target,
    }
  }

  pub fn description(self) -> &'static str {
    match self {
      StepId::BuilderToolchain => "install and probe the build interpreter",
      StepId::BuilderSources => "stage the source tree into the work directory",
      StepId::BuilderDriver => "run the build driver into the destination",
      StepId::BuilderBytecode => "byte-compile scripts in place",
      StepId::BuilderSeal => "hash and seal the build output",
      StepId::TargetRootfs => "prepare the image filesystem",
      StepId::TargetInterpreter => "install and probe the runtime interpreter",
      StepId::TargetVenv => "create the isolated environment",
      StepId::TargetDependencies => "install runtime dependencies",
      StepId::TargetCopy => "copy the build output into the image",
      StepId::TargetEntrypoint => "declare the entry point",
      StepId::TargetPublish => "publish the image",
    }
  }
}

impl std::fmt::Display for StepId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

/// What a successful step produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub artifact: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
}

impl StepOutcome {
  pub fn artifact(path: impl Into<PathBuf>) -> Self {
    Self {
      artifact: Some(path.into()),
      detail: None,
    }
  }

  pub fn detail(detail: impl Into<String>) -> Self {
    Self {
      artifact: None,
      detail: Some(detail.into()),
    }
  }

  pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
    self.detail = Some(detail.into());
    self
  }
}

/// Why a step failed. Every variant is fatal to the whole pipeline.
#[derive(Debug, Error)]
pub enum StepError {
  #[error("environment setup failed: {message}")]
  EnvironmentSetup { message: String },

  #[error("build failed: {message}")]
  Build { message: String },

  #[error("bytecode compilation failed: {message}")]
  BytecodeCompile { message: String },

  #[error("dependency installation failed: {message}")]
  DependencyInstall { message: String },

  #[error("copy failed: {message}")]
  Copy { message: String },

  #[error("entry point {path} not found in image")]
  EntrypointMissing { path: String },

  #[error("placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),
}

impl StepError {
  pub fn environment(err: impl std::fmt::Display) -> Self {
    StepError::EnvironmentSetup { message: err.to_string() }
  }

  pub fn build(err: impl std::fmt::Display) -> Self {
    StepError::Build { message: err.to_string() }
  }

  pub fn bytecode(err: impl std::fmt::Display) -> Self {
    StepError::BytecodeCompile { message: err.to_string() }
  }

  pub fn dependency(err: impl std::fmt::Display) -> Self {
    StepError::DependencyInstall { message: err.to_string() }
  }

  pub fn copy(err: impl std::fmt::Display) -> Self {
    StepError::Copy { message: err.to_string() }
  }

  /// Failure category as reported to users.
  pub fn kind(&self) -> &'static str {
    match self {
      StepError::EnvironmentSetup { .. } => "EnvironmentSetupFailure",
      StepError::Build { .. } => "BuildFailure",
      StepError::BytecodeCompile { .. } => "BytecodeCompileFailure",
      StepError::DependencyInstall { .. } => "DependencyInstallFailure",
      StepError::Copy { .. } => "CopyFailure",
      StepError::EntrypointMissing { .. } => "EntrypointMissing",
      StepError::Placeholder(_) => "ConfigurationFailure",
    }
  }
}

/// Command failures carry their stderr tail into the step message.
pub(crate) fn describe_command_error(err: &CommandError) -> String {
  match err.stderr_tail() {
    Some(tail) => format!("{err}\n{tail}"),
    None => err.to_string(),
  }
}

/// Status of one step after the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
  Succeeded {
    outcome: StepOutcome,
    duration_ms: u64,
  },
  Failed {
    kind: &'static str,
    error: String,
  },
  /// Not attempted because an earlier step failed.
  Skipped { failed_dependency: StepId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
  pub step: StepId,
  pub stage: Stage,
  #[serde(flatten)]
  pub status: StepStatus,
}

impl StepRecord {
  pub fn succeeded(step: StepId, outcome: StepOutcome, duration: Duration) -> Self {
    Self {
      step,
      stage: step.stage(),
      status: StepStatus::Succeeded {
        outcome,
        duration_ms: duration.as_millis() as u64,
      },
    }
  }

  pub fn failed(step: StepId, error: &StepError) -> Self {
    Self {
      step,
      stage: step.stage(),
      status: StepStatus::Failed {
        kind: error.kind(),
        error: error.to_string(),
      },
    }
  }

  pub fn skipped(step: StepId, failed_dependency: StepId) -> Self {
    Self {
      step,
      stage: step.stage(),
      status: StepStatus::Skipped { failed_dependency },
    }
  }
}

/// The step that aborted the pipeline.
#[derive(Debug)]
pub struct StepFailure {
  pub step: StepId,
  pub error: StepError,
}

/// Result of running the pipeline.
///
/// Step failures are recorded here rather than returned as errors so callers
/// can report which steps ran, which failed and which were never attempted.
#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
  pub steps: Vec<StepRecord>,

  /// Step that failed (at most one, stops execution).
  #[serde(skip)]
  pub failure: Option<StepFailure>,

  /// Sealed BuildOutput hash, once the builder stage completed.
  pub build_output_hash: Option<String>,

  /// Published image directory, once the target stage completed.
  pub image: Option<PathBuf>,

  /// Retained work directory when `keep_work` was requested.
  pub work_dir: Option<PathBuf>,
}

impl PipelineReport {
  pub fn is_success(&self) -> bool {
    self.failure.is_none() && self.skipped_count() == 0
  }

  pub fn succeeded_count(&self) -> usize {
    self
      .steps
      .iter()
      .filter(|r| matches!(r.status, StepStatus::Succeeded { .. }))
      .count()
  }

  pub fn skipped_count(&self) -> usize {
    self
      .steps
      .iter()
      .filter(|r| matches!(r.status, StepStatus::Skipped { .. }))
      .count()
  }

  pub fn record(&self, step: StepId) -> Option<&StepRecord> {
    self.steps.iter().find(|r| r.step == step)
  }
}

/// Errors that prevent the pipeline from running at all.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Lock(#[from] ImagesLockError),

  #[error("dependency cycle detected in task graph")]
  CycleDetected,

  #[error("failed to prepare {what}: {source}")]
  Prepare {
    what: &'static str,
    #[source]
    source: std::io::Error,
  },

  #[error("placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn step_names_are_unique_and_staged() {
    let names: std::collections::BTreeSet<_> = StepId::ALL.iter().map(|s| s.name()).collect();
    assert_eq!(names.len(), StepId::ALL.len());

    for step in StepId::ALL {
      let prefix = format!("{}.", step.stage());
      assert!(step.name().starts_with(&prefix), "{step} should start with {prefix}");
    }
  }

  #[test]
  fn builder_steps_precede_target_steps() {
    let first_target = StepId::ALL.iter().position(|s| s.stage() == Stage::Target).unwrap();
    assert!(StepId::ALL[..first_target].iter().all(|s| s.stage() == Stage::Builder));
    assert!(StepId::ALL[first_target..].iter().all(|s| s.stage() == Stage::Target));
  }

  #[test]
  fn error_kinds_match_taxonomy() {
    assert_eq!(StepError::environment("x").kind(), "EnvironmentSetupFailure");
    assert_eq!(StepError::build("x").kind(), "BuildFailure");
    assert_eq!(StepError::bytecode("x").kind(), "BytecodeCompileFailure");
    assert_eq!(StepError::dependency("x").kind(), "DependencyInstallFailure");
    assert_eq!(StepError::copy("x").kind(), "CopyFailure");
  }

  #[test]
  fn report_success_requires_no_failure_or_skip() {
    let mut report = PipelineReport::default();
    report
      .steps
      .push(StepRecord::succeeded(StepId::BuilderToolchain, StepOutcome::default(), Duration::ZERO));
    assert!(report.is_success());

    report.steps.push(StepRecord::skipped(StepId::BuilderSources, StepId::BuilderToolchain));
    assert!(!report.is_success());
    assert_eq!(report.succeeded_count(), 1);
    assert_eq!(report.skipped_count(), 1);
  }

  #[test]
  fn step_record_serializes_with_status_tag() {
    let record = StepRecord::skipped(StepId::TargetCopy, StepId::BuilderDriver);
    let json = serde_json::to_value(&record).unwrap();

    assert_eq!(json["step"], "target.copy");
    assert_eq!(json["stage"], "target");
    assert_eq!(json["status"], "skipped");
    assert_eq!(json["failed_dependency"], "builder.driver");
  }
}
