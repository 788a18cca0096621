//! C6 (per-file) and C7 (batch) pipelines.

pub mod batch;
pub mod per_file;
