//! Corruption index: partition id → corrupt files originating from that partition
//!
//! The index is derived from the dataset and the metadata table, but it is
//! checkpointed so the expensive scan runs once per dataset snapshot. Its serde
//! shape is the checkpoint document:
//!
//! ```json
//! {
//!   "5": {
//!     "images": [{ "full_path": "data/imagereward/a/img2.png", "filename": "img2.png" }],
//!     "fixed": false
//!   }
//! }
//! ```
//!
//! Partition ids are integers everywhere in memory; the string keys only exist
//! in serialized form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier of one source-dataset shard (one downloadable archive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Six-digit zero-padded form used in archive names and URLs
    pub fn padded(self) -> String {
        format!("{:06}", self.0)
    }

    /// Archive file name, e.g. `part-000005.zip`
    pub fn archive_file_name(self) -> String {
        format!("part-{}.zip", self.padded())
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PartitionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(PartitionId)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A dataset file that failed verification and whose origin partition is known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptImageEntry {
    /// Destination path inside the dataset
    pub full_path: PathBuf,
    /// Bare file name; also the archive member name
    pub filename: String,
}

impl CorruptImageEntry {
    /// Build an entry from the dataset path, taking the archive member name
    /// from its last component
    pub fn from_path(full_path: impl Into<PathBuf>) -> Option<Self> {
        let full_path = full_path.into();
        let filename = full_path.file_name()?.to_str()?.to_string();
        Some(Self {
            full_path,
            filename,
        })
    }
}

/// Repair progress for one partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRepairState {
    /// Corrupt files, in scan order
    pub images: Vec<CorruptImageEntry>,
    /// Set once every entry has been written back and re-verified; never cleared
    pub fixed: bool,
}

/// Checkpointed scan result, keyed by partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorruptionIndex {
    partitions: BTreeMap<PartitionId, PartitionRepairState>,
}

impl CorruptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a corrupt file to its partition, creating the partition state on
    /// first use
    ///
    /// Returns `false` if the same destination path is already recorded for
    /// this partition.
    pub fn record(&mut self, partition_id: PartitionId, entry: CorruptImageEntry) -> bool {
        let state = self.partitions.entry(partition_id).or_default();
        if state.images.iter().any(|e| e.full_path == entry.full_path) {
            return false;
        }
        state.images.push(entry);
        true
    }

    /// Insert a whole partition state (used when rebuilding from a checkpoint)
    pub fn insert_state(&mut self, partition_id: PartitionId, state: PartitionRepairState) {
        self.partitions.insert(partition_id, state);
    }

    pub fn get(&self, partition_id: PartitionId) -> Option<&PartitionRepairState> {
        self.partitions.get(&partition_id)
    }

    /// Flip a partition to fixed
    ///
    /// Returns `true` only on the false → true transition.
    pub fn mark_fixed(&mut self, partition_id: PartitionId) -> bool {
        match self.partitions.get_mut(&partition_id) {
            Some(state) if !state.fixed => {
                state.fixed = true;
                true
            }
            _ => false,
        }
    }

    /// Partitions still waiting for repair, in ascending id order
    pub fn pending_partitions(&self) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|(_, state)| !state.fixed)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartitionId, &PartitionRepairState)> {
        self.partitions.iter().map(|(id, state)| (*id, state))
    }

    /// Number of partitions with at least one corrupt file
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn total_images(&self) -> usize {
        self.partitions.values().map(|s| s.images.len()).sum()
    }

    /// Images in partitions not yet marked fixed
    pub fn unfixed_images(&self) -> usize {
        self.partitions
            .values()
            .filter(|s| !s.fixed)
            .map(|s| s.images.len())
            .sum()
    }

    pub fn fixed_partitions(&self) -> usize {
        self.partitions.values().filter(|s| s.fixed).count()
    }

}
