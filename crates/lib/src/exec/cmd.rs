//! Running a single command inside an [`ExecContext`].

use std::io;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::context::ExecContext;

/// Number of stderr lines kept when reporting a failed command.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("empty command")]
  Empty,

  #[error("program not found: {program} (PATH={search_path})")]
  NotFound { program: String, search_path: String },

  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("command failed with exit code {code:?}: {cmd}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

impl CommandError {
  /// The last lines of the failed command's stderr, if any were captured.
  pub fn stderr_tail(&self) -> Option<String> {
    let CommandError::Failed { stderr, .. } = self else {
      return None;
    };
    if stderr.trim().is_empty() {
      return None;
    }
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    Some(lines[start..].join("\n"))
  }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
  /// Trimmed stdout.
  pub stdout: String,
  pub stderr: String,
}

/// Execute `argv` with exactly the environment described by `ctx`.
///
/// The child's environment is cleared before the context's variables are
/// applied. HOME and TMPDIR directories named by the context are created if
/// missing. stdin is closed.
pub async fn run_command(argv: &[String], ctx: &ExecContext) -> Result<CommandOutput, CommandError> {
  let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
  let cmd_line = display_command(argv);

  info!(cmd = %cmd_line, "executing command");

  let resolved = ctx.resolve_program(program).ok_or_else(|| CommandError::NotFound {
    program: program.clone(),
    search_path: ctx.var("PATH").unwrap_or_default().to_string(),
  })?;

  for var in ["HOME", "TMPDIR"] {
    if let Some(dir) = ctx.var(var) {
      tokio::fs::create_dir_all(dir).await?;
    }
  }

  let mut command = Command::new(&resolved);
  command
    .args(args)
    .current_dir(ctx.cwd())
    .env_clear()
    .envs(ctx.env())
    .stdin(Stdio::null());

  debug!(program = ?resolved, working_dir = ?ctx.cwd(), "spawning process");

  let output = command.output().await.map_err(|source| CommandError::Spawn {
    program: program.clone(),
    source,
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).to_string();

  if !output.status.success() {
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    return Err(CommandError::Failed {
      cmd: cmd_line,
      code: output.status.code(),
      stderr,
    });
  }

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(CommandOutput { stdout, stderr })
}

/// Render an argument vector for logs and error messages.
pub fn display_command(argv: &[String]) -> String {
  argv
    .iter()
    .map(|arg| {
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("'{}'", arg)
      } else {
        arg.clone()
      }
    })
    .collect::<Vec<_>>()
    .join(" ")
}
