//! Data model shared by the repair pipeline and the tools that feed it
//!
//! - [`manifest`]: evaluation manifest produced by the generation/scoring workflows
//! - [`corruption_index`]: checkpointed partition → corrupt file mapping

pub mod corruption_index;
pub mod manifest;

pub use corruption_index::{CorruptImageEntry, CorruptionIndex, PartitionId, PartitionRepairState};
pub use manifest::{load_manifest, ImageReference, ManifestRecord};
