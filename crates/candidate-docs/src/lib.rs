//! Candidate document revalidation: classification retries, duplicate resolution, candidate
//! status aggregation and the audit timeline, plus the configuration and telemetry the worker
//! service boots with.

pub mod config;
pub mod error;
pub mod revalidation;
pub mod telemetry;

pub use error::AppError;
