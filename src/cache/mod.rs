//! Persistent cache store for provisioning steps
//!
//! Caches are host directories keyed by tool name and version (per-tool) or
//! by a well-known name (shared, e.g. the Maven repository). They are bind
//! mounted into build containers and survive across builds.
//!
//! # Cache States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Miss | No stamp, nothing installed yet |
//! | Building | Step started but never finished, redone on the next run |
//! | Complete | Finalized, the step is a cache no-op |

pub mod mount;
pub mod stamp;
pub mod store;

pub use mount::{format_bytes, CacheMount, CacheScope};
pub use stamp::{check_stamp, sha256_bytes, sha256_file, CacheState, Stamp, STAMP_DIR};
pub use store::{CacheEntry, CacheHandle, CacheStore};
