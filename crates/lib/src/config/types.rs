//! Pipeline configuration types.
//!
//! Defaults mirror the recipe this tool replaces: a python3 build driver
//! writing into `build/`, bytecode compiled under `engine/`, an isolated
//! environment at `/venv`, the output copied to `/RESTler` and the entry
//! point `dotnet /RESTler/restler/Restler.dll`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::exec::default_search_path;

fn args(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

/// Top-level `restpack.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
  /// Image name; the image is published at `<images_dir>/<name>`.
  #[serde(default = "default_name")]
  pub name: String,

  pub sources: SourceTreeConfig,

  #[serde(default)]
  pub builder: BuilderConfig,

  #[serde(default)]
  pub target: TargetConfig,

  #[serde(default)]
  pub output: OutputConfig,
}

fn default_name() -> String {
  "restler".to_string()
}

/// The three named parts of the source tree.
///
/// Each part is staged into the work directory under its own file name, so
/// relative references inside the driver keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceTreeConfig {
  /// Primary engine sources.
  pub engine: PathBuf,
  /// Auxiliary tool sources.
  pub tools: PathBuf,
  /// Build-driver script.
  pub driver: PathBuf,
}

impl SourceTreeConfig {
  pub fn parts(&self) -> [(&'static str, &PathBuf); 3] {
    [("engine", &self.engine), ("tools", &self.tools), ("driver", &self.driver)]
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
  /// Scripting-language interpreter used by the driver and bytecode steps.
  pub interpreter: String,

  /// Optional command installing the interpreter and its package manager.
  pub install: Option<Vec<String>>,

  /// Command verifying the interpreter is usable.
  pub probe: Vec<String>,

  /// PATH for every builder step.
  pub toolchain_path: Vec<PathBuf>,

  /// Package index for build-time installs. Never visible to the target stage.
  pub index_url: Option<String>,

  /// Directory in which a fresh work directory is created (system temp if unset).
  pub work_dir: Option<PathBuf>,

  /// BuildOutput destination inside the work directory; a leading `/` is
  /// taken relative to the work directory too.
  pub destination: PathBuf,

  pub driver_command: Vec<String>,

  /// Subdirectory of the destination holding scripts to byte-compile.
  pub bytecode_dir: PathBuf,

  pub bytecode_command: Vec<String>,

  /// Packages that exist only for building and must never reach the image.
  pub build_packages: Vec<String>,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      interpreter: "python3".to_string(),
      install: None,
      probe: args(&["$${interpreter}", "--version"]),
      toolchain_path: default_search_path(),
      index_url: None,
      work_dir: None,
      destination: PathBuf::from("build"),
      driver_command: args(&["$${interpreter}", "$${driver}", "--dest_dir", "$${dest}"]),
      bytecode_dir: PathBuf::from("engine"),
      bytecode_command: args(&[
        "$${interpreter}",
        "-m",
        "compileall",
        "-b",
        "-q",
        "--invalidation-mode",
        "checked-hash",
        "$${dir}",
      ]),
      build_packages: Vec::new(),
    }
  }
}

/// A runtime package, pinned unless explicitly opted out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

impl Dependency {
  pub fn pinned(name: &str, version: &str) -> Self {
    Self {
      name: name.to_string(),
      version: Some(version.to_string()),
    }
  }

  /// Requirement specifier handed to the installer (`name==version` or `name`).
  pub fn spec(&self) -> String {
    match &self.version {
      Some(version) => format!("{}=={}", self.name, version),
      None => self.name.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
  /// Unpacked base runtime filesystem copied into the image first.
  pub base: Option<PathBuf>,

  pub interpreter: String,
  pub install: Option<Vec<String>>,
  pub probe: Vec<String>,

  /// PATH for target steps and the image, after the isolated environment.
  pub runtime_path: Vec<PathBuf>,

  /// Image path of the isolated environment.
  pub venv: String,

  pub venv_command: Vec<String>,

  /// Installer invocation; `--index-url` and the requirement specs are appended.
  pub pip_command: Vec<String>,

  /// Prints the installed set as `name==version` lines.
  pub freeze_command: Vec<String>,

  /// The only package index consulted for runtime dependencies.
  pub index_url: Option<String>,

  /// Accept dependencies without a version ("always latest").
  pub allow_unpinned: bool,

  pub dependencies: Vec<Dependency>,

  /// Image path BuildOutput is copied to.
  pub app_root: String,

  /// Toolchain runtime launching the compiled application.
  pub runtime: String,

  /// Assembly launched by the entry point, relative to `app_root`.
  pub entry_assembly: String,

  /// Working directory of the entry point (image path).
  pub working_dir: Option<String>,

  /// Extra variables baked into the image environment.
  pub env: BTreeMap<String, String>,
}

impl Default for TargetConfig {
  fn default() -> Self {
    Self {
      base: None,
      interpreter: "python3".to_string(),
      install: None,
      probe: args(&["$${interpreter}", "--version"]),
      runtime_path: default_search_path(),
      venv: "/venv".to_string(),
      venv_command: args(&["$${interpreter}", "-m", "venv", "$${venv}"]),
      pip_command: args(&[
        "$${python}",
        "-m",
        "pip",
        "install",
        "--no-cache-dir",
        "--no-input",
        "--disable-pip-version-check",
      ]),
      freeze_command: args(&["$${python}", "-m", "pip", "freeze", "--all"]),
      index_url: None,
      allow_unpinned: false,
      dependencies: vec![
        Dependency::pinned("requests", "2.31.0"),
        Dependency::pinned("applicationinsights", "0.11.10"),
      ],
      app_root: "/RESTler".to_string(),
      runtime: "dotnet".to_string(),
      entry_assembly: "restler/Restler.dll".to_string(),
      working_dir: None,
      env: BTreeMap::new(),
    }
  }
}

impl TargetConfig {
  /// Image path of the entry assembly.
  pub fn entry_path(&self) -> String {
    format!(
      "{}/{}",
      self.app_root.trim_end_matches('/'),
      self.entry_assembly.trim_start_matches("./")
    )
  }

  /// The declared entry point: runtime followed by the assembly path.
  pub fn entrypoint(&self) -> Vec<String> {
    vec![self.runtime.clone(), self.entry_path()]
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
  /// Directory images are published into.
  pub images_dir: PathBuf,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self {
      images_dir: PathBuf::from("images"),
    }
  }
}
