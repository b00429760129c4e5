//! Pipeline orchestration.
//!
//! This module provides the main entry points for running the two-stage
//! pipeline. It handles:
//! - Task graph ordering of builder and target steps
//! - Sequential execution with failure recording and skip tracking
//! - Work directory and images directory lifetimes
//! - Dry-run planning

pub mod graph;
pub mod types;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::builder::{BuildOutput, BuilderStage, WorkLayout};
use crate::config::PipelineConfig;
use crate::consts::{ROOTFS_DIR, SOURCE_STAGING_DIR, WORK_MARKER};
use crate::exec::cmd::display_command;
use crate::exec::{ExecContext, run_command};
use crate::lock::{ImagesLock, LockMode};
use crate::placeholder::{Vars, substitute_args};
use crate::target::TargetStage;

pub use graph::TaskGraph;
pub(crate) use types::describe_command_error;
pub use types::{
  PipelineError, PipelineReport, Stage, StepError, StepFailure, StepId, StepOutcome, StepRecord, StepStatus,
};

/// Options for a pipeline run that are not part of the config file.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
  /// Keep the builder work directory after the run.
  pub keep_work: bool,
  /// Accept unpinned dependencies even if the config does not.
  pub allow_unpinned: bool,
}

/// Executes individual steps for [`execute_graph`].
pub trait StepRunner {
  fn run_step(&mut self, step: StepId) -> impl Future<Output = Result<StepOutcome, StepError>>;
}

/// Run every step of `graph` in order.
///
/// Steps run one at a time. The first failure is recorded in the report and
/// every step after it is recorded as skipped; step failures never surface as
/// `Err`.
pub async fn execute_graph<R: StepRunner>(graph: &TaskGraph, runner: &mut R) -> Result<PipelineReport, PipelineError> {
  let order = graph.order()?;
  info!(steps = order.len(), "starting pipeline");

  let mut report = PipelineReport::default();
  let mut failed: Option<StepId> = None;

  for step in order {
    if let Some(failed_step) = failed {
      warn!(step = %step, failed_dep = %failed_step, "skipping step due to failed dependency");
      report.steps.push(StepRecord::skipped(step, failed_step));
      continue;
    }

    info!(step = %step, stage = %step.stage(), "running step");
    let start = Instant::now();

    match runner.run_step(step).await {
      Ok(outcome) => {
        let elapsed = start.elapsed();
        info!(step = %step, elapsed_ms = elapsed.as_millis() as u64, "step succeeded");
        report.steps.push(StepRecord::succeeded(step, outcome, elapsed));
      }
      Err(e) => {
        error!(step = %step, kind = e.kind(), error = %e, "step failed");
        report.steps.push(StepRecord::failed(step, &e));
        report.failure = Some(StepFailure { step, error: e });
        failed = Some(step);
      }
    }
  }

  info!(
    succeeded = report.succeeded_count(),
    failed = report.failure.is_some(),
    skipped = report.skipped_count(),
    "pipeline complete"
  );

  Ok(report)
}

/// Install (optionally) and probe an interpreter.
pub(crate) async fn setup_interpreter(
  install: Option<&[String]>,
  probe: &[String],
  vars: &Vars,
  ctx: &ExecContext,
) -> Result<StepOutcome, StepError> {
  if let Some(install) = install {
    let argv = substitute_args(install, vars)?;
    run_command(&argv, ctx)
      .await
      .map_err(|e| StepError::environment(describe_command_error(&e)))?;
  }

  let argv = substitute_args(probe, vars)?;
  let output = run_command(&argv, ctx)
    .await
    .map_err(|e| StepError::environment(describe_command_error(&e)))?;

  let version = output
    .stdout
    .lines()
    .chain(output.stderr.lines())
    .map(str::trim)
    .find(|l| !l.is_empty())
    .unwrap_or("available");
  Ok(StepOutcome::detail(version))
}

/// Both stages of one run.
struct PipelineRun<'a> {
  builder: BuilderStage<'a>,
  target: TargetStage<'a>,
}

impl PipelineRun<'_> {
  fn sealed_output(&self) -> Result<BuildOutput, StepError> {
    self
      .builder
      .output()
      .cloned()
      .ok_or_else(|| StepError::copy("build output has not been sealed"))
  }
}

impl StepRunner for PipelineRun<'_> {
  async fn run_step(&mut self, step: StepId) -> Result<StepOutcome, StepError> {
    match step {
      StepId::BuilderToolchain => self.builder.toolchain().await,
      StepId::BuilderSources => self.builder.stage_sources().await,
      StepId::BuilderDriver => self.builder.run_driver().await,
      StepId::BuilderBytecode => self.builder.compile_bytecode().await,
      StepId::BuilderSeal => self.builder.seal().await,
      StepId::TargetRootfs => self.target.prepare_rootfs().await,
      StepId::TargetInterpreter => self.target.interpreter().await,
      StepId::TargetVenv => self.target.create_venv().await,
      StepId::TargetDependencies => self.target.install_dependencies().await,
      StepId::TargetCopy => {
        let output = self.sealed_output()?;
        self.target.copy_output(&output).await
      }
      StepId::TargetEntrypoint => {
        let output = self.sealed_output()?;
        self.target.declare_entrypoint(&output).await
      }
      StepId::TargetPublish => self.target.publish().await,
    }
  }
}

/// Create a fresh work directory, under `parent` if given.
fn create_work_dir(parent: Option<&Path>) -> Result<tempfile::TempDir, PipelineError> {
  let prepare = |source: std::io::Error| PipelineError::Prepare {
    what: "work directory",
    source,
  };

  let builder = {
    let mut b = tempfile::Builder::new();
    b.prefix("restpack-work-");
    b
  };
  let work = match parent {
    Some(parent) => {
      std::fs::create_dir_all(parent).map_err(prepare)?;
      builder.tempdir_in(parent)
    }
    None => builder.tempdir(),
  }
  .map_err(prepare)?;

  std::fs::write(work.path().join(WORK_MARKER), "").map_err(prepare)?;
  Ok(work)
}

/// Run the full pipeline for `config`.
///
/// The config is validated and the images directory locked before any step
/// runs. Step failures are reported in the returned [`PipelineReport`]; the
/// image is only published when every step succeeded.
pub async fn run_pipeline(config: &PipelineConfig, options: &PipelineOptions) -> Result<PipelineReport, PipelineError> {
  config.validate(options.allow_unpinned)?;

  let images_dir = &config.output.images_dir;
  let _lock = ImagesLock::acquire(images_dir, LockMode::Exclusive, &format!("build {}", config.name))?;

  let work = create_work_dir(config.builder.work_dir.as_deref())?;
  let root = dunce::canonicalize(work.path()).map_err(|source| PipelineError::Prepare {
    what: "work directory",
    source,
  })?;
  info!(work_dir = ?root, images_dir = ?images_dir, image = %config.name, "prepared pipeline");

  let layout = WorkLayout::new(root);
  let mut run = PipelineRun {
    builder: BuilderStage::new(config, layout.clone()),
    target: TargetStage::new(config, &layout),
  };

  let mut report = execute_graph(&TaskGraph::standard(), &mut run).await?;
  report.build_output_hash = run.builder.output().map(|o| o.hash.0.clone());
  report.image = run.target.published().map(Path::to_path_buf);

  // Drops any unpublished staging directory.
  drop(run);

  if options.keep_work {
    let kept = work.keep();
    info!(work_dir = ?kept, "keeping work directory");
    report.work_dir = Some(kept);
  }

  Ok(report)
}

/// A step as it would run, without running it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlannedStep {
  pub step: StepId,
  pub stage: Stage,
  pub description: &'static str,
  pub depends_on: Vec<StepId>,
  /// Command lines, with paths only known at run time shown as `<work>` and
  /// `<rootfs>`.
  pub commands: Vec<String>,
}

/// The ordered task list for `config`.
pub fn plan(config: &PipelineConfig, options: &PipelineOptions) -> Result<Vec<PlannedStep>, PipelineError> {
  config.validate(options.allow_unpinned)?;

  let work = PathBuf::from("<work>");
  let dest = WorkLayout::new(&work).destination(&config.builder.destination);
  let driver_name = config.sources.driver.file_name().unwrap_or_default();

  let builder_vars = Vars::new()
    .with("interpreter", config.builder.interpreter.clone())
    .with(
      "driver",
      work.join(SOURCE_STAGING_DIR).join(driver_name).to_string_lossy(),
    )
    .with("dest", dest.to_string_lossy())
    .with("dir", dest.join(&config.builder.bytecode_dir).to_string_lossy())
    .with("work", work.to_string_lossy());

  let venv = format!("<{ROOTFS_DIR}>{}", config.target.venv);
  let target_vars = Vars::new()
    .with("interpreter", config.target.interpreter.clone())
    .with("python", format!("{venv}/bin/python"))
    .with("venv", venv.clone());

  let render = |argv: &[String], vars: &Vars| -> Result<String, PipelineError> {
    Ok(display_command(&substitute_args(argv, vars)?))
  };
  let setup = |install: &Option<Vec<String>>, probe: &[String], vars: &Vars| -> Result<Vec<String>, PipelineError> {
    let mut commands = Vec::new();
    if let Some(install) = install {
      commands.push(render(install, vars)?);
    }
    commands.push(render(probe, vars)?);
    Ok(commands)
  };

  let graph = TaskGraph::standard();
  let mut planned = Vec::new();
  for step in graph.order()? {
    let commands = match step {
      StepId::BuilderToolchain => setup(&config.builder.install, &config.builder.probe, &builder_vars)?,
      StepId::BuilderDriver => vec![render(&config.builder.driver_command, &builder_vars)?],
      StepId::BuilderBytecode => vec![render(&config.builder.bytecode_command, &builder_vars)?],
      StepId::TargetInterpreter => setup(&config.target.install, &config.target.probe, &target_vars)?,
      StepId::TargetVenv => vec![render(&config.target.venv_command, &target_vars)?],
      StepId::TargetDependencies => {
        let mut commands = Vec::new();
        if !config.target.dependencies.is_empty() {
          let mut argv = substitute_args(&config.target.pip_command, &target_vars)?;
          if let Some(index) = &config.target.index_url {
            argv.push("--index-url".to_string());
            argv.push(index.clone());
          }
          argv.extend(config.target.dependencies.iter().map(|d| d.spec()));
          commands.push(display_command(&argv));
        }
        commands.push(render(&config.target.freeze_command, &target_vars)?);
        commands
      }
      StepId::TargetEntrypoint => vec![display_command(&config.target.entrypoint())],
      _ => Vec::new(),
    };

    planned.push(PlannedStep {
      step,
      stage: step.stage(),
      description: step.description(),
      depends_on: graph.dependencies(step),
      commands,
    });
  }

  Ok(planned)
}
