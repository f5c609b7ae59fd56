//! Metadata resolver
//!
//! Loads the source-dataset metadata table and answers "which partition does
//! this file come from?" by bare file name, because archive membership is
//! file-name addressed.
//!
//! Supported tables:
//! - Parquet (`.parquet`): columns `image_name` (string) and `part_id` or
//!   `partition_id` (any integer width)
//! - JSON (`.json`): array of `{"image_name": ..., "part_id": ...}` objects
//!
//! Duplicate image names keep the first row's partition. The number of
//! ignored duplicates (and how many disagreed on the partition) is logged.

use imgfix_common::models::PartitionId;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const IMAGE_NAME_COLUMN: &str = "image_name";
const PARTITION_COLUMNS: [&str; 2] = ["part_id", "partition_id"];

/// Metadata table loading errors (fatal for the scan phase)
#[derive(Debug, Error)]
pub enum MetadataLoadError {
    /// Table file does not exist
    #[error("Metadata table not found: {0}")]
    NotFound(PathBuf),

    /// File exists but could not be read or decoded
    #[error("Failed to read metadata table {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// A required column is absent
    #[error("Metadata table {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    /// A partition value is not a non-negative integer
    #[error("Invalid partition value in {path} at row {row}: {reason}")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    /// Unknown file extension
    #[error("Unsupported metadata format: {0} (expected .parquet or .json)")]
    UnsupportedFormat(PathBuf),
}

/// Counters collected while building the lookup table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Rows read from the table
    pub rows: usize,
    /// Rows whose image name was already present
    pub duplicates: usize,
    /// Duplicates that named a different partition than the first row
    pub conflicting: usize,
    /// Rows with a null image name or partition
    pub skipped_nulls: usize,
}

/// In-memory `image_name → partition_id` lookup
#[derive(Debug, Clone, Default)]
pub struct MetadataResolver {
    by_name: HashMap<String, PartitionId>,
    stats: ResolverStats,
}

impl MetadataResolver {
    /// Load a metadata table, choosing the reader by file extension
    pub fn load(path: &Path) -> Result<Self, MetadataLoadError> {
        if !path.exists() {
            return Err(MetadataLoadError::NotFound(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let resolver = match extension.as_str() {
            "parquet" | "pq" => Self::load_parquet(path)?,
            "json" => Self::load_json(path)?,
            _ => return Err(MetadataLoadError::UnsupportedFormat(path.to_path_buf())),
        };

        let stats = &resolver.stats;
        if stats.duplicates > 0 {
            warn!(
                table = %path.display(),
                duplicates = stats.duplicates,
                conflicting = stats.conflicting,
                "Duplicate image names in metadata table; first occurrence wins"
            );
        }
        if stats.skipped_nulls > 0 {
            warn!(
                table = %path.display(),
                skipped = stats.skipped_nulls,
                "Metadata rows with null image name or partition ignored"
            );
        }
        info!(
            table = %path.display(),
            rows = stats.rows,
            images = resolver.len(),
            "Metadata table loaded"
        );

        Ok(resolver)
    }

    /// Build a resolver from in-memory records (first occurrence wins)
    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, PartitionId)>,
        S: Into<String>,
    {
        let mut resolver = Self::default();
        for (name, partition_id) in records {
            resolver.insert(name.into(), partition_id);
        }
        resolver
    }

    /// Partition owning `filename`, if the table knows it
    pub fn resolve(&self, filename: &str) -> Option<PartitionId> {
        self.by_name.get(filename).copied()
    }

    /// Distinct image names
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    fn insert(&mut self, name: String, partition_id: PartitionId) {
        self.stats.rows += 1;
        match self.by_name.get(&name) {
            Some(existing) => {
                self.stats.duplicates += 1;
                if *existing != partition_id {
                    self.stats.conflicting += 1;
                }
            }
            None => {
                self.by_name.insert(name, partition_id);
            }
        }
    }

    fn load_parquet(path: &Path) -> Result<Self, MetadataLoadError> {
        let read_error = |reason: String| MetadataLoadError::Read {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| read_error(e.to_string()))?;
        let reader = SerializedFileReader::new(file).map_err(|e| read_error(e.to_string()))?;

        let column_names: Vec<String> = reader
            .metadata()
            .file_metadata()
            .schema_descr()
            .root_schema()
            .get_fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        if !column_names.iter().any(|c| c == IMAGE_NAME_COLUMN) {
            return Err(MetadataLoadError::MissingColumn {
                path: path.to_path_buf(),
                column: IMAGE_NAME_COLUMN.to_string(),
            });
        }
        let partition_column = PARTITION_COLUMNS
            .iter()
            .find(|c| column_names.iter().any(|n| n == *c))
            .ok_or_else(|| MetadataLoadError::MissingColumn {
                path: path.to_path_buf(),
                column: PARTITION_COLUMNS.join(" or "),
            })?;

        let mut resolver = Self::default();
        let rows = reader
            .get_row_iter(None)
            .map_err(|e| read_error(e.to_string()))?;

        for (row_index, row) in rows.enumerate() {
            let row = row.map_err(|e| read_error(e.to_string()))?;

            let mut name = None;
            let mut partition = None;
            for (column, field) in row.get_column_iter() {
                if column == IMAGE_NAME_COLUMN {
                    name = field_as_string(field);
                } else if column == partition_column {
                    partition = field_as_partition(field).map_err(|reason| {
                        MetadataLoadError::InvalidValue {
                            path: path.to_path_buf(),
                            row: row_index,
                            reason,
                        }
                    })?;
                }
            }

            match (name, partition) {
                (Some(name), Some(partition)) => resolver.insert(name, partition),
                _ => resolver.stats.skipped_nulls += 1,
            }
        }

        Ok(resolver)
    }

    fn load_json(path: &Path) -> Result<Self, MetadataLoadError> {
        #[derive(Deserialize)]
        struct JsonRow {
            image_name: Option<String>,
            #[serde(alias = "partition_id")]
            part_id: Option<serde_json::Value>,
        }

        let read_error = |reason: String| MetadataLoadError::Read {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| read_error(e.to_string()))?;
        let rows: Vec<JsonRow> =
            serde_json::from_str(&content).map_err(|e| read_error(e.to_string()))?;

        if !rows.is_empty() && rows.iter().all(|r| r.part_id.is_none()) {
            return Err(MetadataLoadError::MissingColumn {
                path: path.to_path_buf(),
                column: PARTITION_COLUMNS.join(" or "),
            });
        }

        let mut resolver = Self::default();
        for (row_index, row) in rows.into_iter().enumerate() {
            let partition = match row.part_id {
                Some(value) => json_as_partition(&value).map_err(|reason| {
                    MetadataLoadError::InvalidValue {
                        path: path.to_path_buf(),
                        row: row_index,
                        reason,
                    }
                })?,
                None => None,
            };

            match (row.image_name, partition) {
                (Some(name), Some(partition)) => resolver.insert(name, partition),
                _ => resolver.stats.skipped_nulls += 1,
            }
        }

        Ok(resolver)
    }
}

fn field_as_string(field: &Field) -> Option<String> {
    match field {
        Field::Str(s) => Some(s.clone()),
        Field::Bytes(b) => b.as_utf8().ok().map(str::to_string),
        _ => None,
    }
}

fn field_as_partition(field: &Field) -> Result<Option<PartitionId>, String> {
    let value: i128 = match field {
        Field::Null => return Ok(None),
        Field::Byte(v) => *v as i128,
        Field::Short(v) => *v as i128,
        Field::Int(v) => *v as i128,
        Field::Long(v) => *v as i128,
        Field::UByte(v) => *v as i128,
        Field::UShort(v) => *v as i128,
        Field::UInt(v) => *v as i128,
        Field::ULong(v) => *v as i128,
        Field::Str(s) => return parse_partition_str(s).map(Some),
        other => return Err(format!("expected integer, found {}", other)),
    };
    partition_from_int(value).map(Some)
}

fn json_as_partition(value: &serde_json::Value) -> Result<Option<PartitionId>, String> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(v), _) => partition_from_int(v as i128).map(Some),
            (None, Some(v)) => partition_from_int(v as i128).map(Some),
            _ => Err(format!("expected integer, found {}", n)),
        },
        serde_json::Value::String(s) => parse_partition_str(s).map(Some),
        other => Err(format!("expected integer, found {}", other)),
    }
}

fn parse_partition_str(s: &str) -> Result<PartitionId, String> {
    s.trim()
        .parse::<PartitionId>()
        .map_err(|e| format!("'{}' is not a partition number: {}", s, e))
}

fn partition_from_int(value: i128) -> Result<PartitionId, String> {
    u32::try_from(value)
        .map(PartitionId::new)
        .map_err(|_| format!("{} is out of range for a partition id", value))
}
