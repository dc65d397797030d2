//! dmt Runtime
//!
//! This crate executes migration documents against an extension registry.
//!
//! # Features
//!
//! - One job per document operation, with merged settings
//! - Sequential execution that stops at the first failure or cancellation
//! - A per-operation report
//!
//! # Usage
//!
//! ```rust,ignore
//! use dmt_runtime::Runtime;
//!
//! let runtime = Runtime::from_config(&config);
//! let report = runtime.execute(&document, &cancel).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod jobs;

pub use engine::{MigrationReport, OperationReport, Runtime};
pub use error::{Error, Result};
pub use jobs::{JobMetadata, MigrationJob};
