//! Capability-gated plugin extension runtime for the Nexus assistant host.
//!
//! Provides manifest validation, the lifecycle registry, per-plugin
//! capability gates, hook dispatch with per-subscriber failure isolation,
//! and the refreshable install catalog.

pub mod capability;
pub mod catalog;
mod clock;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod registry;
pub mod storage;

pub use capability::*;
pub use catalog::*;
pub use error::*;
pub use hooks::*;
pub use manifest::*;
pub use registry::*;
pub use storage::*;
