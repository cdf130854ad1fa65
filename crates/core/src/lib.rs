//! Core types for the Strata vector-similarity subsystem
//!
//! This crate defines the types shared by the device layer (`strata-gpu`)
//! and the index layer (`strata-accel`):
//! - AccelError / AccelResult: the single error type of the subsystem
//! - BackendKind, DeviceInfo: device identity
//! - SearchResult, ScoredSlot: ranked search output
//! - AcceleratorConfig: accelerator configuration (TOML-backed)
//! - IndexStats, AcceleratorStats: observability snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod stats;
pub mod types;

pub use config::{AcceleratorConfig, CONFIG_FILE_NAME};
pub use error::{AccelError, AccelResult};
pub use stats::{AcceleratorStats, IndexStats};
pub use types::{BackendKind, DeviceInfo, ScoredSlot, SearchResult};
