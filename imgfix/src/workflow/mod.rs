//! Repair workflow
//!
//! [`RepairPipeline`] runs the two phases in order: the scan builds (or the
//! checkpoint supplies) the corruption index, then the repair pass drains it
//! partition by partition. [`RepairSummary`] is the user-facing result.

pub mod pipeline;
pub mod summary;

pub use pipeline::{IndexSource, RepairPipeline, RunReport};
pub use summary::{PartitionSummary, RepairSummary};
