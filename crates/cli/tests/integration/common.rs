//! Shared test helpers for CLI integration tests.
//!
//! Every test project builds with `sh` standing in for the interpreter, the
//! venv creator, the installer and the runtime, so no python or dotnet is
//! needed.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

const BUILD_SCRIPT: &str = r#"#!/bin/sh
set -e
while [ $# -gt 0 ]; do
  case "$1" in
    --dest_dir) dest="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$dest/engine"
cp engine/App.dll "$dest/App.dll"
cp tools/*.py "$dest/engine/"
"#;

pub const FAILING_BUILD_SCRIPT: &str = "#!/bin/sh\necho 'compiler exploded' >&2\nexit 3\n";

const APP_SCRIPT: &str = "echo \"restler:$*\"\nexit ${APP_EXIT:-0}\n";

const VENV_SCRIPT: &str = r#"#!/bin/sh
set -e
mkdir -p "$1/bin"
ln -s /bin/sh "$1/bin/python"
"#;

const PIP_SCRIPT: &str = r#"#!/bin/sh
set -e
for arg in "$@"; do
  case "$arg" in
    *==*) echo "$arg" >> "$VIRTUAL_ENV/installed.txt" ;;
    -*|*/*) ;;
    *) echo "$arg==1.0" >> "$VIRTUAL_ENV/installed.txt" ;;
  esac
done
"#;

const FREEZE_SCRIPT: &str = r#"#!/bin/sh
cat "$VIRTUAL_ENV/installed.txt" 2>/dev/null || true
"#;

const CONFIG: &str = r#"
[sources]
engine = "engine"
tools = "tools"
driver = "build.sh"

[builder]
interpreter = "sh"
probe = ["$${interpreter}", "-c", "echo fake-python 3.12"]
bytecode_command = ["sh", "-c", 'for f in "$1"/*.py; do cp "$f" "${f}c"; done', "compile", "$${dir}"]
work_dir = "work"

[target]
interpreter = "sh"
probe = ["$${interpreter}", "-c", "exit 0"]
venv_command = ["$${interpreter}", "@BIN@/venv.sh", "$${venv}"]
pip_command = ["$${python}", "@BIN@/pip.sh"]
freeze_command = ["$${python}", "@BIN@/freeze.sh"]
app_root = "/app"
runtime = "sh"
entry_assembly = "App.dll"
@DEPENDENCIES@

[target.env]
APP_EXIT = "@APP_EXIT@"
"#;

const PINNED: &str = r#"dependencies = [{ name = "requests", version = "2.31.0" }]"#;
const UNPINNED: &str = r#"dependencies = [{ name = "requests" }]"#;

/// Isolated project directory with sources, fake tooling and a config file.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  /// A project whose build succeeds and whose entry point exits with 0.
  pub fn project() -> Self {
    Self::with_options(PINNED, 0)
  }

  /// A project declaring an unpinned dependency.
  pub fn unpinned() -> Self {
    Self::with_options(UNPINNED, 0)
  }

  /// A project whose entry point exits with `code`.
  pub fn exiting(code: u8) -> Self {
    Self::with_options(PINNED, code)
  }

  fn with_options(dependencies: &str, app_exit: u8) -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("restpack.toml");
    let env = Self { temp, config_path };

    env.write_file("engine/App.dll", APP_SCRIPT);
    env.write_file("tools/tool.py", "print('tool')\n");
    env.write_file("build.sh", BUILD_SCRIPT);
    env.write_file("fake-bin/venv.sh", VENV_SCRIPT);
    env.write_file("fake-bin/pip.sh", PIP_SCRIPT);
    env.write_file("fake-bin/freeze.sh", FREEZE_SCRIPT);

    let bin = env.path().join("fake-bin");
    let config = CONFIG
      .replace("@BIN@", &bin.to_string_lossy())
      .replace("@DEPENDENCIES@", dependencies)
      .replace("@APP_EXIT@", &app_exit.to_string());
    std::fs::write(&env.config_path, config).unwrap();
    env
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn images_dir(&self) -> PathBuf {
    self.path().join("images")
  }

  /// Published image directory for the default image name.
  pub fn image_dir(&self) -> PathBuf {
    self.images_dir().join("restler")
  }

  /// Get a Command for the restpack binary running inside the project.
  ///
  /// `RESTPACK_IMAGES_DIR` is removed so images always land in the project.
  pub fn restpack_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("restpack");
    cmd.current_dir(self.path());
    cmd.env_remove("RESTPACK_IMAGES_DIR");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Run `restpack build` and assert it succeeded.
  pub fn build(&self) {
    self.restpack_cmd().arg("build").assert().success();
  }
}
