//! Build orchestration.
//!
//! The [`Orchestrator`] drives one `(app, version, platform)` from "unbuilt"
//! to a terminal [`BuildOutcome`]:
//!
//! ```text
//! Unbuilt ──> Verifying ──> Building ──> Built
//!    │            │             └──────> Failed
//!    │            └────────────────────> Failed (checksum mismatch)
//!    └─────────────────────────────────> AlreadyBuilt
//! ```
//!
//! A build only runs while holding the platform's [`BuildLock`](crate::lock::BuildLock),
//! and success is only reported after the manifest has been persisted.
//!
//! # Submodules
//!
//! - [`orchestrator`] - State machine and read-side queries (status, executables)
//! - `types` - Outcomes and errors

pub mod orchestrator;
mod types;

pub use orchestrator::{Orchestrator, checksum_excludes};
pub use types::*;
