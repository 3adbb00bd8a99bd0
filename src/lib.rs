//! TapeVault: catalogs a robotic tape library and a single LTFS drive into
//! an embedded SQLite store, and exposes it as a read-only on-demand
//! filesystem plus a thin auxiliary web view.

pub mod catalog;
pub mod config;
pub mod error;
#[cfg(feature = "fuse-fs")]
pub mod fs;
pub mod tape;
pub mod tools;
pub mod web;
