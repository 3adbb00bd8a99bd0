//! Tape-mediation subsystem: changer, drive orchestration, indexing,
//! reconciliation and on-demand fetching.

pub mod changer;
pub mod fetcher;
pub mod indexer;
pub mod orchestrator;
pub mod reconciler;
