mod audit;
mod build;
mod coverage;
mod plan;
mod run;

pub use audit::cmd_audit;
pub use build::cmd_build;
pub use coverage::cmd_coverage;
pub use plan::cmd_plan;
pub use run::cmd_run;
