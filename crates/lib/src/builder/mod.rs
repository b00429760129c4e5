//! Builder stage: source tree in, sealed BuildOutput out.
//!
//! Everything the builder touches lives in a private work directory:
//!
//! ```text
//! <work>/
//!   .restpack-work    marker identifying builder scratch space
//!   source/           staged copy of engine, tools and the driver
//!   build/            BuildOutput (`destination`, rooted here even when absolute)
//!   home/ tmp/        HOME and TMPDIR for builder commands
//! ```
//!
//! The work directory is never placed inside an image.

pub mod bytecode;
pub mod seal;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::config::PipelineConfig;
use crate::consts::SOURCE_STAGING_DIR;
use crate::exec::{ExecContext, run_command};
use crate::pipeline::{StepError, StepOutcome, describe_command_error, setup_interpreter};
use crate::placeholder::{Vars, substitute_args};
use crate::util::fs::{copy_tree, is_empty_dir, list_entries};
use crate::util::hash::ContentHash;

use bytecode::BytecodeInventory;

/// Paths inside a builder work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
  root: PathBuf,
}

impl WorkLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn source(&self) -> PathBuf {
    self.root.join(SOURCE_STAGING_DIR)
  }

  pub fn home(&self) -> PathBuf {
    self.root.join("home")
  }

  pub fn tmp(&self) -> PathBuf {
    self.root.join("tmp")
  }

  /// HOME for target-stage commands; kept apart from the builder's.
  pub fn target_home(&self) -> PathBuf {
    self.root.join("target-home")
  }

  pub fn target_tmp(&self) -> PathBuf {
    self.root.join("target-tmp")
  }

  /// Where the driver writes BuildOutput. The work directory is the builder's
  /// filesystem root, so `/build` and `build` name the same place.
  pub fn destination(&self, configured: &Path) -> PathBuf {
    let inside: PathBuf = configured
      .components()
      .filter(|c| matches!(c, Component::Normal(_)))
      .collect();
    self.root.join(inside)
  }
}

/// The sealed result of the builder stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
  pub path: PathBuf,
  pub hash: ContentHash,
}

/// State threaded through the builder steps.
pub struct BuilderStage<'a> {
  config: &'a PipelineConfig,
  layout: WorkLayout,
  dest: PathBuf,
  ctx: ExecContext,
  recorded_sources: Option<BTreeSet<PathBuf>>,
  output: Option<BuildOutput>,
}

impl<'a> BuilderStage<'a> {
  pub fn new(config: &'a PipelineConfig, layout: WorkLayout) -> Self {
    let dest = layout.destination(&config.builder.destination);

    let mut ctx = ExecContext::isolated(
      &layout.source(),
      &config.builder.toolchain_path,
      &layout.home(),
      &layout.tmp(),
    );
    if let Some(index) = &config.builder.index_url {
      ctx = ctx.with_var("PIP_INDEX_URL", index.clone());
    }

    Self {
      config,
      layout,
      dest,
      ctx,
      recorded_sources: None,
      output: None,
    }
  }

  pub fn context(&self) -> &ExecContext {
    &self.ctx
  }

  /// BuildOutput, once `builder.seal` has run.
  pub fn output(&self) -> Option<&BuildOutput> {
    self.output.as_ref()
  }

  fn bytecode_dir(&self) -> PathBuf {
    self.dest.join(&self.config.builder.bytecode_dir)
  }

  /// Placeholder values available to builder commands.
  pub fn vars(&self) -> Vars {
    let driver_name = self.config.sources.driver.file_name().unwrap_or_default();
    Vars::new()
      .with("interpreter", self.config.builder.interpreter.clone())
      .with("driver", self.layout.source().join(driver_name).to_string_lossy())
      .with("dest", self.dest.to_string_lossy())
      .with("dir", self.bytecode_dir().to_string_lossy())
      .with("work", self.layout.root().to_string_lossy())
  }

  /// `builder.toolchain`
  pub async fn toolchain(&self) -> Result<StepOutcome, StepError> {
    // Sources are not staged yet.
    let ctx = self.ctx.clone().with_cwd(self.layout.root());
    let builder = &self.config.builder;
    setup_interpreter(builder.install.as_deref(), &builder.probe, &self.vars(), &ctx).await
  }

  /// `builder.sources`
  pub async fn stage_sources(&self) -> Result<StepOutcome, StepError> {
    let staging = self.layout.source();
    std::fs::create_dir_all(&staging).map_err(|e| StepError::copy(format!("creating {}: {e}", staging.display())))?;

    let mut files = 0;
    for (part, path) in self.config.sources.parts() {
      if !path.exists() {
        return Err(StepError::copy(format!("sources.{part} not found: {}", path.display())));
      }
      let name = path
        .file_name()
        .ok_or_else(|| StepError::copy(format!("sources.{part} has no file name")))?;

      let stats = copy_tree(path, &staging.join(name), &[])
        .map_err(|e| StepError::copy(format!("staging sources.{part} from {}: {e}", path.display())))?;
      debug!(part, files = stats.files, dirs = stats.dirs, "staged source part");
      files += stats.files;
    }

    Ok(StepOutcome::artifact(staging).with_detail(format!("{files} files staged")))
  }

  /// `builder.driver`
  pub async fn run_driver(&mut self) -> Result<StepOutcome, StepError> {
    if !is_empty_dir(&self.dest).map_err(StepError::build)? {
      return Err(StepError::build(format!(
        "destination {} already has content",
        self.dest.display()
      )));
    }
    std::fs::create_dir_all(&self.dest).map_err(StepError::build)?;

    let argv = substitute_args(&self.config.builder.driver_command, &self.vars())?;
    run_command(&argv, &self.ctx)
      .await
      .map_err(|e| StepError::build(describe_command_error(&e)))?;

    let entries = list_entries(&self.dest).map_err(StepError::build)?;
    if entries.is_empty() {
      return Err(StepError::build(format!(
        "driver left destination {} empty",
        self.dest.display()
      )));
    }

    let bytecode_dir = self.bytecode_dir();
    if bytecode_dir.is_dir() {
      let inventory = BytecodeInventory::scan(&bytecode_dir).map_err(StepError::build)?;
      debug!(scripts = inventory.sources.len(), "recorded scripts produced by driver");
      self.recorded_sources = Some(inventory.sources);
    }

    Ok(StepOutcome::artifact(&self.dest).with_detail(format!("{} top-level entries", entries.len())))
  }

  /// `builder.bytecode`
  pub async fn compile_bytecode(&self) -> Result<StepOutcome, StepError> {
    let dir = self.bytecode_dir();
    if !dir.is_dir() {
      return Err(StepError::bytecode(format!(
        "bytecode directory {} does not exist",
        dir.display()
      )));
    }

    let expected = match &self.recorded_sources {
      Some(sources) => sources.clone(),
      None => BytecodeInventory::scan(&dir).map_err(StepError::bytecode)?.sources,
    };

    let argv = substitute_args(&self.config.builder.bytecode_command, &self.vars())?;
    run_command(&argv, &self.ctx)
      .await
      .map_err(|e| StepError::bytecode(describe_command_error(&e)))?;

    let after = BytecodeInventory::scan(&dir).map_err(StepError::bytecode)?;
    let compiled = after.verify_against(&expected).map_err(StepError::bytecode)?;

    Ok(StepOutcome::artifact(dir).with_detail(format!("{compiled} scripts compiled")))
  }

  /// `builder.seal`
  pub async fn seal(&mut self) -> Result<StepOutcome, StepError> {
    let hash = seal::seal(&self.dest).await.map_err(StepError::build)?;
    debug!(hash = %hash, "sealed build output");

    let outcome = StepOutcome::artifact(&self.dest).with_detail(hash.0.clone());
    self.output = Some(BuildOutput {
      path: self.dest.clone(),
      hash,
    });
    Ok(outcome)
  }
}
