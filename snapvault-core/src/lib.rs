//! # snapvault-core
//!
//! Core library for snapvault - point-in-time snapshots of a working directory.
//!
//! File contents are hashed, deduplicated and compressed into a
//! content-addressed object store; each snapshot is a manifest mapping paths
//! to object hashes. Snapshots can be listed, resolved by reference, diffed
//! against each other or the live tree, restored, and pruned by age and tag.

pub mod config;
pub mod diff;
pub mod duration;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod manager;
pub mod manifest;
pub mod models;
pub mod object_store;
pub mod repository;
pub mod restore;
pub mod retention;
pub mod walker;
pub mod writer;

pub use config::Config;
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use manager::SnapshotManager;
pub use models::{
    Change, ChangeStatus, CleanOptions, CleanReport, CreateOptions, ListFilter, Progress,
    Snapshot, SnapshotMeta, Tree, TreeEntry,
};
pub use object_store::ObjectStore;
pub use walker::UntrackedFiles;
