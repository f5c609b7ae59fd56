//! User-facing repair summary

use imgfix_common::models::{CorruptionIndex, PartitionId};
use std::fmt;

/// Final state of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub partition_id: PartitionId,
    pub fixed: bool,
    pub images: usize,
}

impl fmt::Display for PartitionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fixed {
            write!(f, "Part-{}: fixed", self.partition_id)
        } else {
            write!(f, "Part-{}: {} images not fixed", self.partition_id, self.images)
        }
    }
}

/// One line per partition plus totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub partitions: Vec<PartitionSummary>,
}

impl RepairSummary {
    pub fn from_index(index: &CorruptionIndex) -> Self {
        Self {
            partitions: index
                .iter()
                .map(|(partition_id, state)| PartitionSummary {
                    partition_id,
                    fixed: state.fixed,
                    images: state.images.len(),
                })
                .collect(),
        }
    }

    pub fn fixed_partitions(&self) -> usize {
        self.partitions.iter().filter(|p| p.fixed).count()
    }

    /// Images still waiting for repair
    pub fn broken_images(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| !p.fixed)
            .map(|p| p.images)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.partitions.iter().all(|p| p.fixed)
    }
}

impl fmt::Display for RepairSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.partitions.is_empty() {
            return writeln!(f, "No corrupt images found.");
        }
        for partition in &self.partitions {
            writeln!(f, "{}", partition)?;
        }
        writeln!(
            f,
            "{} of {} partitions fixed, {} images still broken",
            self.fixed_partitions(),
            self.partitions.len(),
            self.broken_images()
        )
    }
}
