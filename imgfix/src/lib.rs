//! imgfix library interface
//!
//! Scans an image dataset for corrupt files, maps each one to the source
//! archive partition it came from, and restores it from that archive.
//! Progress is checkpointed after every partition so runs are resumable.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod services;
pub mod workflow;

pub use crate::error::{RepairError, RepairResult};
pub use crate::workflow::{RepairPipeline, RepairSummary, RunReport};
