//! sandkit - cached development sandbox images
//!
//! Resolves declarative image specs into idempotent provisioning steps,
//! executes them in a build container against persistent keyed caches, and
//! commits the result as a runnable image.

pub mod audit;
pub mod binder;
pub mod build;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestration;
pub mod plan;
pub mod spec;
pub mod ui;

pub use error::{ErrorKind, SandkitError, SandkitResult};
