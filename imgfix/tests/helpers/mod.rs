//! Test Helper Utilities
//!
//! Shared utilities for testing imgfix

#![allow(dead_code)]

pub mod fetchers;
pub mod fixtures;
pub mod log_capture;

pub use fetchers::{FailingFetcher, ZipFetcher};
pub use fixtures::{
    corrupt_png_bytes, png_bytes, test_config, write_manifest, write_metadata_json,
    write_metadata_parquet, write_zip,
};
pub use log_capture::{init_test_logging, LogCapture};
