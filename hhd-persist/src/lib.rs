//! # hhd-persist
//!
//! Diff-gated atomic persistence for the state file, profiles, templates,
//! and the control-surface access token.
//!
//! Every save goes through [`writer::atomic_write`], which reports whether
//! the disk actually changed.

pub mod error;
pub mod perms;
pub mod profiles;
pub mod state;
pub mod token;
pub mod writer;

pub use error::PersistError;
pub use profiles::{ProfileStore, SharedProfiles, Upsert};
pub use writer::{atomic_write, HashStore, WriteResult};
