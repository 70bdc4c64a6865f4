//! Scene reconciliation and light activation for Home Assistant
//!
//! This crate drives Home Assistant lights into stored scenes and keeps a
//! local backup of every scene it writes. Before a scene is used, the
//! controller's copy, the local backup and the live device list are
//! reconciled into one working configuration.
//!
//! # Features
//!
//! - Foreign-write detection through a content hash recorded at each write
//! - Set-merge of diverged scene copies with per-entity annotations
//! - Exclusive and additive scenes with a post-activation verification sweep
//! - Split colour/brightness sequencing for bulbs that need it
//! - Bounded retries with linear backoff and per-command timeouts
//! - Snapshot log for restoring earlier scene states

// Core modules
pub mod client;
pub mod config;
pub mod devices;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod scenes;
pub mod storage;
pub mod tools;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use client::{HassApi, HassTransport};
pub use config::ServerConfig;
pub use error::{HassError, Result};
pub use scenes::SceneEngine;
pub use tools::{ToolContext, ToolResponse};
