//! Image spec resolution into ordered provisioning steps

pub mod resolve;
pub mod step;

pub use resolve::resolve;
pub use step::{fingerprint, shell_quote, ArchiveFormat, Step, StepAction, StepExports};
