//! Target stage: base runtime + isolated environment + BuildOutput copy +
//! one entry point, published atomically as an image directory.

pub mod publish;
pub mod venv;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::builder::seal::{output_hash, read_seal};
use crate::builder::{BuildOutput, WorkLayout};
use crate::config::PipelineConfig;
use crate::consts::{IMAGE_CONFIG_FILE, IMAGE_FORMAT_VERSION, ROOTFS_DIR, SEAL_MARKER};
use crate::exec::{ExecContext, run_command};
use crate::image::{ImageConfig, in_rootfs};
use crate::pipeline::{StepError, StepOutcome, describe_command_error, setup_interpreter};
use crate::placeholder::{Vars, substitute_args};
use crate::util::fs::{copy_tree, is_empty_dir, list_entries};

use venv::{LockedPackage, check_locked, parse_freeze};

/// State threaded through the target steps.
pub struct TargetStage<'a> {
  config: &'a PipelineConfig,
  base_ctx: ExecContext,
  staging: Option<TempDir>,
  venv_ctx: Option<ExecContext>,
  base_entries: Vec<String>,
  locked: Vec<LockedPackage>,
  published: Option<PathBuf>,
}

impl<'a> TargetStage<'a> {
  /// Target commands get their own HOME and TMPDIR inside the work directory,
  /// never inside the image.
  pub fn new(config: &'a PipelineConfig, layout: &WorkLayout) -> Self {
    let base_ctx = ExecContext::isolated(
      layout.root(),
      &config.target.runtime_path,
      &layout.target_home(),
      &layout.target_tmp(),
    );

    Self {
      config,
      base_ctx,
      staging: None,
      venv_ctx: None,
      base_entries: Vec::new(),
      locked: Vec::new(),
      published: None,
    }
  }

  /// Host path of the image filesystem being assembled.
  pub fn rootfs(&self) -> Result<PathBuf, StepError> {
    self
      .staging
      .as_ref()
      .map(|s| s.path().join(ROOTFS_DIR))
      .ok_or_else(|| StepError::copy("image filesystem has not been prepared"))
  }

  /// The scoped context dependency installs run in, once the venv exists.
  pub fn venv_context(&self) -> Option<&ExecContext> {
    self.venv_ctx.as_ref()
  }

  pub fn published(&self) -> Option<&Path> {
    self.published.as_deref()
  }

  fn final_dir(&self) -> PathBuf {
    self.config.output.images_dir.join(&self.config.name)
  }

  /// Placeholder values available to target commands.
  pub fn vars(&self) -> Result<Vars, StepError> {
    let venv = in_rootfs(&self.rootfs()?, &self.config.target.venv);
    Ok(
      Vars::new()
        .with("interpreter", self.config.target.interpreter.clone())
        .with("python", venv.join("bin").join("python").to_string_lossy())
        .with("venv", venv.to_string_lossy()),
    )
  }

  /// `target.rootfs`
  pub async fn prepare_rootfs(&mut self) -> Result<StepOutcome, StepError> {
    let staging = publish::create_staging(&self.config.output.images_dir, &self.config.name)
      .map_err(|e| StepError::copy(format!("creating staging directory: {e}")))?;
    let rootfs = staging.path().join(ROOTFS_DIR);
    std::fs::create_dir(&rootfs).map_err(StepError::copy)?;
    self.staging = Some(staging);

    if let Some(base) = &self.config.target.base {
      if !base.is_dir() {
        return Err(StepError::copy(format!("base filesystem {} not found", base.display())));
      }
      let stats = copy_tree(base, &rootfs, &[]).map_err(|e| StepError::copy(format!("copying base: {e}")))?;
      debug!(files = stats.files, "copied base filesystem");
    }

    self.base_entries = list_entries(&rootfs).map_err(StepError::copy)?;
    Ok(StepOutcome::artifact(rootfs).with_detail(format!("{} base entries", self.base_entries.len())))
  }

  /// `target.interpreter`
  pub async fn interpreter(&self) -> Result<StepOutcome, StepError> {
    let target = &self.config.target;
    setup_interpreter(target.install.as_deref(), &target.probe, &self.vars()?, &self.base_ctx).await
  }

  /// `target.venv`
  pub async fn create_venv(&mut self) -> Result<StepOutcome, StepError> {
    let venv = in_rootfs(&self.rootfs()?, &self.config.target.venv);
    let argv = substitute_args(&self.config.target.venv_command, &self.vars()?)?;
    run_command(&argv, &self.base_ctx)
      .await
      .map_err(|e| StepError::environment(describe_command_error(&e)))?;

    let bin = venv.join("bin");
    if !bin.join("python").exists() {
      return Err(StepError::environment(format!(
        "isolated environment has no interpreter at {}",
        bin.join("python").display()
      )));
    }

    let ctx = self
      .base_ctx
      .with_path_prepended(&bin)
      .with_var("VIRTUAL_ENV", venv.to_string_lossy());
    let detail = format!("PATH={}", ctx.var("PATH").unwrap_or_default());
    self.venv_ctx = Some(ctx);

    Ok(StepOutcome::artifact(venv).with_detail(detail))
  }

  /// `target.dependencies`
  pub async fn install_dependencies(&mut self) -> Result<StepOutcome, StepError> {
    let ctx = self
      .venv_ctx
      .clone()
      .ok_or_else(|| StepError::dependency("isolated environment has not been created"))?;
    let target = &self.config.target;
    let vars = self.vars()?;

    if !target.dependencies.is_empty() {
      let mut argv = substitute_args(&target.pip_command, &vars)?;
      if let Some(index) = &target.index_url {
        argv.push("--index-url".to_string());
        argv.push(index.clone());
      }
      argv.extend(target.dependencies.iter().map(|d| d.spec()));

      run_command(&argv, &ctx)
        .await
        .map_err(|e| StepError::dependency(describe_command_error(&e)))?;
    }

    let freeze = substitute_args(&target.freeze_command, &vars)?;
    let output = run_command(&freeze, &ctx)
      .await
      .map_err(|e| StepError::dependency(describe_command_error(&e)))?;
    let locked = parse_freeze(&output.stdout);

    let problems = check_locked(&target.dependencies, &self.config.builder.build_packages, &locked);
    if !problems.is_empty() {
      return Err(StepError::dependency(problems.join("; ")));
    }

    let detail = format!("{} packages locked", locked.len());
    self.locked = locked;
    Ok(StepOutcome::detail(detail))
  }

  /// `target.copy`
  ///
  /// Only sealed output is copied, and only when the marker on disk still
  /// records the hash the builder sealed.
  pub async fn copy_output(&self, output: &BuildOutput) -> Result<StepOutcome, StepError> {
    let marker = read_seal(&output.path)
      .map_err(StepError::copy)?
      .ok_or_else(|| StepError::copy(format!("{} is not sealed build output", output.path.display())))?;
    if marker.output_hash != output.hash.0 {
      return Err(StepError::copy(format!(
        "seal marker records {} but the builder sealed {}",
        marker.output_hash, output.hash
      )));
    }

    let app_root = in_rootfs(&self.rootfs()?, &self.config.target.app_root);
    if !is_empty_dir(&app_root).map_err(StepError::copy)? {
      return Err(StepError::copy(format!(
        "{} already exists in the image",
        self.config.target.app_root
      )));
    }

    let stats = copy_tree(&output.path, &app_root, &[SEAL_MARKER])
      .map_err(|e| StepError::copy(format!("copying {}: {e}", output.path.display())))?;

    let copied = output_hash(&app_root).map_err(StepError::copy)?;
    if copied != output.hash {
      return Err(StepError::copy(format!(
        "copied tree hash {copied} does not match sealed output {}",
        output.hash
      )));
    }

    Ok(StepOutcome::artifact(app_root).with_detail(format!("{} files", stats.files)))
  }

  /// `target.entrypoint`
  pub async fn declare_entrypoint(&self, output: &BuildOutput) -> Result<StepOutcome, StepError> {
    let target = &self.config.target;
    let entry = target.entry_path();
    if !in_rootfs(&self.rootfs()?, &entry).is_file() {
      return Err(StepError::EntrypointMissing { path: entry });
    }

    let image = self.image_config(output);
    let staging = self
      .staging
      .as_ref()
      .ok_or_else(|| StepError::copy("image filesystem has not been prepared"))?;
    let path = staging.path().join(IMAGE_CONFIG_FILE);
    image.write(&path).map_err(StepError::copy)?;

    Ok(StepOutcome::artifact(path).with_detail(image.entrypoint.join(" ")))
  }

  /// `target.publish`
  pub async fn publish(&mut self) -> Result<StepOutcome, StepError> {
    let staging = self
      .staging
      .take()
      .ok_or_else(|| StepError::copy("nothing staged to publish"))?;

    let staged_rootfs = staging.path().join(ROOTFS_DIR);
    let bin = in_rootfs(&staged_rootfs, &self.config.target.venv).join("bin");
    if bin.is_dir() {
      venv::relocate_scripts(&bin, &staged_rootfs, &self.final_dir().join(ROOTFS_DIR))
        .map_err(|e| StepError::copy(format!("relocating environment scripts: {e}")))?;
    }

    let published = publish::publish(staging, &self.final_dir())
      .map_err(|e| StepError::copy(format!("publishing image: {e}")))?;

    self.published = Some(published.clone());
    Ok(StepOutcome::artifact(published))
  }

  /// Metadata for the image being assembled.
  pub fn image_config(&self, output: &BuildOutput) -> ImageConfig {
    let target = &self.config.target;
    let venv = target.venv.trim_end_matches('/');

    let mut path = vec![format!("{venv}/bin")];
    path.extend(target.runtime_path.iter().map(|p| p.to_string_lossy().to_string()));

    let mut env: BTreeMap<String, String> = target.env.clone();
    env.insert("PATH".to_string(), path.join(":"));
    env.insert("VIRTUAL_ENV".to_string(), venv.to_string());

    ImageConfig {
      format_version: IMAGE_FORMAT_VERSION,
      name: self.config.name.clone(),
      entrypoint: target.entrypoint(),
      env,
      working_dir: target.working_dir.clone().unwrap_or_else(|| target.app_root.clone()),
      app_root: target.app_root.clone(),
      venv: target.venv.clone(),
      runtime: target.runtime.clone(),
      build_output_hash: output.hash.0.clone(),
      dependencies: target.dependencies.iter().map(|d| d.spec()).collect(),
      locked: self.locked.iter().map(ToString::to_string).collect(),
      base_entries: self.base_entries.clone(),
      build_packages: self.config.builder.build_packages.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::ContentHash;
  use crate::util::testutil::{FakeProject, fake_build_output, fake_config};
  use tempfile::TempDir;

  struct Fixture {
    _project: FakeProject,
    work: TempDir,
    config: PipelineConfig,
  }

  fn fixture() -> Fixture {
    let project = FakeProject::new();
    let config = fake_config(&project);
    Fixture {
      _project: project,
      work: TempDir::new().unwrap(),
      config,
    }
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn target_steps_assemble_and_publish() {
    let f = fixture();
    let layout = WorkLayout::new(f.work.path());
    let output = fake_build_output(f.work.path()).await;
    let mut stage = TargetStage::new(&f.config, &layout);

    stage.prepare_rootfs().await.unwrap();
    stage.interpreter().await.unwrap();
    stage.create_venv().await.unwrap();
    stage.install_dependencies().await.unwrap();
    stage.copy_output(&output).await.unwrap();
    stage.declare_entrypoint(&output).await.unwrap();
    stage.publish().await.unwrap();

    let image = f.config.output.images_dir.join("restler");
    assert_eq!(stage.published(), Some(image.as_path()));
    assert!(image.join("rootfs/app/App.dll").is_file());
    assert!(!image.join("rootfs/app").join(SEAL_MARKER).exists());

    let script = std::fs::read_to_string(image.join("rootfs/venv/bin/tool-script")).unwrap();
    assert_eq!(script.lines().next(), Some(format!("#!{}", image.join("rootfs/venv/bin/python").display()).as_str()));

    let config = ImageConfig::read(&image.join(IMAGE_CONFIG_FILE)).unwrap();
    assert_eq!(config.entrypoint, vec!["sh", "/app/App.dll"]);
    assert_eq!(config.locked, vec!["requests==2.31.0"]);
    assert!(config.env["PATH"].starts_with("/venv/bin:"));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn venv_context_prepends_without_touching_base() {
    let f = fixture();
    let layout = WorkLayout::new(f.work.path());
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();
    stage.create_venv().await.unwrap();

    let rootfs = stage.rootfs().unwrap();
    let scoped = stage.venv_context().unwrap();
    let first = scoped.search_path()[0].clone();
    assert_eq!(first, rootfs.join("venv/bin"));
    assert_eq!(stage.base_ctx.search_path(), f.config.target.runtime_path);
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn dependencies_use_only_target_index() {
    let mut f = fixture();
    f.config.builder.index_url = Some("https://build.example/simple".to_string());
    f.config.target.index_url = Some("https://runtime.example/simple".to_string());
    let layout = WorkLayout::new(f.work.path());
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();
    stage.create_venv().await.unwrap();
    stage.install_dependencies().await.unwrap();

    let venv = stage.rootfs().unwrap().join("venv");
    let args = std::fs::read_to_string(venv.join("pip-args.txt")).unwrap();
    assert!(args.contains("--index-url https://runtime.example/simple"));
    assert!(!args.contains("build.example"));
    let env_index = std::fs::read_to_string(venv.join("pip-env.txt")).unwrap();
    assert_eq!(env_index.trim(), "unset");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn build_only_package_in_environment_fails() {
    let mut f = fixture();
    f.config.builder.build_packages = vec!["requests".to_string()];
    let layout = WorkLayout::new(f.work.path());
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();
    stage.create_venv().await.unwrap();

    let err = stage.install_dependencies().await.unwrap_err();
    assert_eq!(err.kind(), "DependencyInstallFailure");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn installer_failure_is_dependency_failure() {
    let mut f = fixture();
    f.config.target.pip_command = vec!["sh".into(), "-c".into(), "echo 'no matching distribution' >&2; exit 1".into()];
    let layout = WorkLayout::new(f.work.path());
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();
    stage.create_venv().await.unwrap();

    let err = stage.install_dependencies().await.unwrap_err();
    assert_eq!(err.kind(), "DependencyInstallFailure");
    assert!(err.to_string().contains("no matching distribution"));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn tampered_output_fails_copy_verification() {
    let f = fixture();
    let layout = WorkLayout::new(f.work.path());
    let mut output = fake_build_output(f.work.path()).await;
    output.hash = ContentHash("0".repeat(64));
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();

    let err = stage.copy_output(&output).await.unwrap_err();
    assert_eq!(err.kind(), "CopyFailure");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn unsealed_output_is_not_copied() {
    let f = fixture();
    let layout = WorkLayout::new(f.work.path());
    let output = fake_build_output(f.work.path()).await;
    std::fs::remove_file(output.path.join(SEAL_MARKER)).unwrap();
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();

    let err = stage.copy_output(&output).await.unwrap_err();
    assert_eq!(err.kind(), "CopyFailure");
    assert!(err.to_string().contains("not sealed"));
    assert!(is_empty_dir(&in_rootfs(&stage.rootfs().unwrap(), "/app")).unwrap());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn resealed_output_is_not_copied() {
    let f = fixture();
    let layout = WorkLayout::new(f.work.path());
    let output = fake_build_output(f.work.path()).await;
    std::fs::write(output.path.join("App.dll"), "patched after seal").unwrap();
    crate::builder::seal::seal(&output.path).await.unwrap();
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();

    let err = stage.copy_output(&output).await.unwrap_err();
    assert!(err.to_string().contains("seal marker records"));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn missing_entry_assembly_is_reported() {
    let mut f = fixture();
    f.config.target.entry_assembly = "Missing.dll".to_string();
    let layout = WorkLayout::new(f.work.path());
    let output = fake_build_output(f.work.path()).await;
    let mut stage = TargetStage::new(&f.config, &layout);
    stage.prepare_rootfs().await.unwrap();
    stage.copy_output(&output).await.unwrap();

    let err = stage.declare_entrypoint(&output).await.unwrap_err();
    assert!(matches!(err, StepError::EntrypointMissing { ref path } if path == "/app/Missing.dll"));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn base_filesystem_is_copied_and_recorded() {
    let mut f = fixture();
    let base = f.work.path().join("base");
    std::fs::create_dir_all(base.join("usr/share")).unwrap();
    std::fs::write(base.join("usr/share/runtime.txt"), "base").unwrap();
    f.config.target.base = Some(base);
    let layout = WorkLayout::new(f.work.path());
    let mut stage = TargetStage::new(&f.config, &layout);

    stage.prepare_rootfs().await.unwrap();

    let rootfs = stage.rootfs().unwrap();
    assert!(rootfs.join("usr/share/runtime.txt").is_file());
    assert_eq!(stage.base_entries, vec!["usr"]);
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn dropping_unpublished_stage_leaves_no_staging() {
    let f = fixture();
    let layout = WorkLayout::new(f.work.path());
    {
      let mut stage = TargetStage::new(&f.config, &layout);
      stage.prepare_rootfs().await.unwrap();
    }

    assert!(list_entries(&f.config.output.images_dir).unwrap().is_empty());
  }
}
