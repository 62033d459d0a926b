//! CLI command implementations

pub mod build;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod history;
pub mod plan;

pub use build::execute as build;
pub use cache::execute as cache;
pub use catalog::execute as catalog;
pub use config::execute as config;
pub use history::execute as history;
pub use plan::execute as plan;
