//! # snapvault
//!
//! Local, content-addressed snapshots of a working directory.
//!
//! This crate re-exports [`snapvault_core`]; see that crate for the storage
//! engine itself.

pub use snapvault_core::*;
