//! Test utilities for restpack-lib.
//!
//! Pipeline tests never need python or dotnet: a `FakeProject` provides a
//! source tree whose driver is a shell script, and `fake_config` wires `sh`
//! in as the interpreter, venv creator, installer and runtime.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::builder::BuildOutput;
use crate::builder::seal::seal;
use crate::config::{Dependency, PipelineConfig};

/// Driver honouring the `--dest_dir` contract.
pub const BUILD_SCRIPT: &str = r#"#!/bin/sh
set -e
while [ $# -gt 0 ]; do
  case "$1" in
    --dest_dir) dest="$2"; shift 2 ;;
    *) shift ;;
  esac
done
[ -n "$dest" ] || { echo "missing --dest_dir" >&2; exit 2; }
mkdir -p "$dest/engine"
cp engine/App.dll "$dest/App.dll"
cp tools/*.py "$dest/engine/"
"#;

/// Entry assembly: a shell script run by the `sh` runtime.
pub const APP_SCRIPT: &str = "echo \"restler:$*\"\nexit ${APP_EXIT:-0}\n";

/// Creates `bin/python` inside the environment given as `$1`, plus a console
/// script whose shebang names the environment's absolute location.
pub const VENV_SCRIPT: &str = r#"#!/bin/sh
set -e
mkdir -p "$1/bin"
ln -s /bin/sh "$1/bin/python"
printf '#!%s/bin/python\n' "$1" > "$1/bin/tool-script"
"#;

/// Records its arguments and the visible index variable, then "installs"
/// every `name==version` argument.
pub const PIP_SCRIPT: &str = r#"#!/bin/sh
set -e
printf '%s ' "$@" > "$VIRTUAL_ENV/pip-args.txt"
echo "${PIP_INDEX_URL:-unset}" > "$VIRTUAL_ENV/pip-env.txt"
command -v python > "$VIRTUAL_ENV/pip-python.txt"
for arg in "$@"; do
  case "$arg" in
    *==*) echo "$arg" >> "$VIRTUAL_ENV/installed.txt" ;;
  esac
done
"#;

pub const FREEZE_SCRIPT: &str = r#"#!/bin/sh
cat "$VIRTUAL_ENV/installed.txt" 2>/dev/null || true
"#;

/// Byte-compiles by copying each `x.py` in `$1` to `x.pyc`.
pub const BYTECODE_SCRIPT: &str = r#"for f in "$1"/*.py; do cp "$f" "${f}c"; done"#;

/// A throwaway project directory with sources and fake tooling.
pub struct FakeProject {
  temp: TempDir,
}

impl FakeProject {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let project = Self { temp };
    project.write("engine/App.dll", APP_SCRIPT);
    project.write("tools/tool.py", "print('tool')\n");
    project.write("build.sh", BUILD_SCRIPT);
    project.write("fake-bin/venv.sh", VENV_SCRIPT);
    project.write("fake-bin/pip.sh", PIP_SCRIPT);
    project.write("fake-bin/freeze.sh", FREEZE_SCRIPT);
    project
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.root().join(relative)
  }

  pub fn write(&self, relative: &str, content: &str) {
    let path = self.path(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
  }
}

fn argv(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

/// Pipeline config for `project`, publishing into `<project>/images`.
pub fn fake_config(project: &FakeProject) -> PipelineConfig {
  let fake_bin = |name: &str| project.path("fake-bin").join(name).to_string_lossy().to_string();

  let mut config = PipelineConfig::from_toml(
    r#"
[sources]
engine = "engine"
tools = "tools"
driver = "build.sh"
"#,
    Path::new("restpack.toml"),
  )
  .unwrap();
  config.resolve_paths(project.root());

  config.builder.interpreter = "sh".to_string();
  config.builder.probe = argv(&["$${interpreter}", "-c", "echo fake-python 3.12"]);
  config.builder.bytecode_command = argv(&["sh", "-c", BYTECODE_SCRIPT, "compile", "$${dir}"]);

  config.target.interpreter = "sh".to_string();
  config.target.probe = argv(&["$${interpreter}", "-c", "exit 0"]);
  config.target.venv = "/venv".to_string();
  config.target.venv_command = vec!["$${interpreter}".to_string(), fake_bin("venv.sh"), "$${venv}".to_string()];
  config.target.pip_command = vec!["$${python}".to_string(), fake_bin("pip.sh")];
  config.target.freeze_command = vec!["$${python}".to_string(), fake_bin("freeze.sh")];
  config.target.dependencies = vec![Dependency::pinned("requests", "2.31.0")];
  config.target.app_root = "/app".to_string();
  config.target.runtime = "sh".to_string();
  config.target.entry_assembly = "App.dll".to_string();

  config
}

/// A sealed BuildOutput at `<dir>/build`, shaped like the fake driver's.
pub async fn fake_build_output(dir: &Path) -> BuildOutput {
  let path = dir.join("build");
  std::fs::create_dir_all(path.join("engine")).unwrap();
  std::fs::write(path.join("App.dll"), APP_SCRIPT).unwrap();
  std::fs::write(path.join("engine/tool.py"), "print('tool')\n").unwrap();
  std::fs::write(path.join("engine/tool.pyc"), "print('tool')\n").unwrap();

  let hash = seal(&path).await.unwrap();
  BuildOutput { path, hash }
}
