//! tally-core - Core library for Tally
//!
//! This crate contains the local record stores, the snapshot codec, and the
//! sync engine that keeps a workspace's records in step with a single remote
//! snapshot store. Front ends (the `tally` CLI) drive it through
//! [`conductor::SyncCoordinator`].

pub mod auth;
pub mod autosave;
pub mod conductor;
pub mod config;
pub mod db;
pub mod error;
pub mod records;
pub mod remote;
pub mod restore;
pub mod snapshot;
pub mod state;
pub mod util;

pub use error::{Error, Result};
