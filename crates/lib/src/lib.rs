//! mlabc-lib: build orchestration for mobile application source trees
//!
//! This crate decides whether a native executable must be (re)built, keeps
//! concurrent builds of the same target apart, and records outcomes:
//! - `checksum`: order-independent content fingerprints of source trees
//! - `manifest`: durable per-version record of build outcomes (`compile.json`)
//! - `lock`: per-platform lock tokens with stale-lock recovery
//! - `build`: the build state machine
//! - `notify`: completion callbacks
//! - `service` / `server`: fire-and-forget operations and their HTTP surface

pub mod app;
pub mod build;
pub mod checksum;
pub mod config;
pub mod consts;
pub mod lock;
pub mod manifest;
pub mod notify;
pub mod paths;
pub mod server;
pub mod service;
pub mod toolchain;
pub mod util;
