//! # imgfix Common Library
//!
//! Shared code for the dataset repair tooling:
//! - Configuration file format, compiled defaults and the resolved `RepairConfig`
//! - Evaluation manifest loading
//! - Corruption index data model (the checkpointed repair state)
//! - Common error type

pub mod config;
pub mod error;
pub mod models;

pub use error::{Error, Result};
