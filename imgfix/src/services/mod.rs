//! Service modules for the repair pipeline
//!
//! Leaves first: metadata lookup and image verification feed the scanner;
//! the fetcher feeds the repair executor.

pub mod image_verifier;
pub mod integrity_scanner;
pub mod metadata_resolver;
pub mod partition_fetcher;
pub mod repair_executor;

pub use image_verifier::{verify_image, CorruptionKind, VerifyError};
pub use integrity_scanner::{IntegrityScanner, ScanError, ScanReport};
pub use metadata_resolver::{MetadataLoadError, MetadataResolver, ResolverStats};
pub use partition_fetcher::{
    archive_url, fetcher_from_config, Aria2Fetcher, FetchError, HttpFetcher, PartitionFetcher,
    RetryPolicy,
};
pub use repair_executor::{
    extract_entries, ExtractError, PartitionOutcome, RepairExecutor, RepairOutcome,
};
