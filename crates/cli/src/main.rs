mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use restpack_lib::consts::DEFAULT_CONFIG_FILE;
use restpack_lib::coverage::DEFAULT_PERCENTAGE;

use crate::output::{OutputFormat, print_error};

/// restpack - build a sealed API fuzzing toolchain into a runnable image
#[derive(Parser)]
#[command(name = "restpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Log line format on stderr
  #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
  log_format: LogFormat,

  /// Result format on stdout
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
  Text,
  Json,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the builder and target stages and publish an image
  Build {
    /// Path to the pipeline configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Keep the builder work directory after the run
    #[arg(long)]
    keep_work: bool,

    /// Accept dependencies without a pinned version
    #[arg(long)]
    allow_unpinned: bool,
  },

  /// Show the ordered steps and commands a build would run
  Plan {
    /// Path to the pipeline configuration
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Accept dependencies without a pinned version
    #[arg(long)]
    allow_unpinned: bool,
  },

  /// Run the entry point of a published image
  Run {
    /// Image directory (contains image.json and rootfs/)
    image: PathBuf,

    /// Arguments passed to the entry point
    #[arg(last = true)]
    args: Vec<String>,
  },

  /// Check a published image for leaked build state and missing pieces
  Audit {
    /// Image directory (contains image.json and rootfs/)
    image: PathBuf,

    /// Additional top-level rootfs entries to accept
    #[arg(long)]
    allow: Vec<String>,

    /// Packages that must not be installed in the image
    #[arg(long)]
    forbid: Vec<String>,
  },

  /// Generate endpoint coverage reports for an OpenAPI document
  Coverage {
    /// OpenAPI YAML document
    #[arg(long, default_value = "api_spec.yaml")]
    spec: PathBuf,

    /// Directory the JSON and HTML reports are written to
    #[arg(long, default_value = "coverage_reports")]
    out: PathBuf,

    /// Share of endpoints reported as covered
    #[arg(long, default_value_t = DEFAULT_PERCENTAGE, value_parser = clap::value_parser!(u8).range(0..=100))]
    percentage: u8,
  },
}

fn init_tracing(verbose: u8, format: LogFormat) {
  let default_level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time();

  match format {
    LogFormat::Text => builder.init(),
    LogFormat::Json => builder.json().init(),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose, cli.log_format);

  let result = match cli.command {
    Commands::Build {
      config,
      keep_work,
      allow_unpinned,
    } => cmd::cmd_build(&config, keep_work, allow_unpinned, cli.output),
    Commands::Plan { config, allow_unpinned } => cmd::cmd_plan(&config, allow_unpinned, cli.output),
    Commands::Run { image, args } => cmd::cmd_run(&image, &args),
    Commands::Audit { image, allow, forbid } => cmd::cmd_audit(&image, allow, forbid, cli.output),
    Commands::Coverage { spec, out, percentage } => cmd::cmd_coverage(&spec, &out, percentage, cli.output),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
