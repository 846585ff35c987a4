//! Process-wide arbitration service for scarce media resources.
//!
//! Client processes register the codec instances and graphics memory they
//! hold; when a new client cannot acquire a resource it asks the arbiter to
//! reclaim from existing holders. The arbiter decides from its global view of
//! holdings and process priorities whether reclamation is permitted and which
//! clients must be asked to release.

// Configuration layer - CLI and daemon arguments
pub mod config;

// Logging layer - tracing subscriber setup
pub mod logging;

// Oracle layer - process priority lookups
pub mod process_info;

// Core business logic layer; the registry is ResourceArbiter's internal
// detail and only its stats snapshot is exported
mod registry;
pub mod service;

pub use process_info::{ProcProcessInfo, ProcessInfo};
pub use registry::RegistryStats;
pub use service::ResourceArbiter;
