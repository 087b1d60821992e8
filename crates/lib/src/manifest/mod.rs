//! Build-outcome manifests.
//!
//! One manifest (`compile.json`) per application version records, for every
//! platform, whether the app was compiled and from which source checksum.
//!
//! # Submodules
//!
//! - [`store`] - Durable loading, atomic saving and listing of manifests

pub mod store;
mod types;

pub use store::{ListFilter, ListedApp, ManifestError, ManifestStore};
pub use types::*;
