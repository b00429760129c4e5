//! restpack-lib: a two-stage build-and-package pipeline.
//!
//! The pipeline turns a source tree into a self-contained, runnable image:
//! - `builder`: runs the build driver and byte-compiles scripts into a sealed BuildOutput
//! - `target`: assembles an image from BuildOutput, an isolated environment and one entry point
//! - `pipeline`: the typed task graph and sequential executor tying both stages together
//! - `image`: loading, running and auditing published images
//! - `coverage`: endpoint coverage reports for an OpenAPI document

pub mod builder;
pub mod config;
pub mod consts;
pub mod coverage;
pub mod exec;
pub mod image;
pub mod lock;
pub mod pipeline;
pub mod placeholder;
pub mod target;
pub mod util;
