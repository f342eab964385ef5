//! Loaders for the plain-text inputs of the engine.
//!
//! Feature tables and molecule catalogs are read from long-format CSV files,
//! connectivity networks from whitespace-separated text. All loaders report
//! failures through [`LoadError`], which always carries the offending path.

use crate::core::models::feature::FeatureTableError;
use crate::core::models::molecule::CatalogError;
use thiserror::Error;

pub mod catalog;
pub mod features;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Invalid record in '{path}' at line {line}: {reason}")]
    InvalidRecord {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("Unknown molecule '{name}' referenced in '{path}'")]
    UnknownMolecule { path: String, name: String },
    #[error("Unknown feature '{name}' referenced in '{path}'")]
    UnknownFeature { path: String, name: String },
    #[error("Invalid feature table in '{path}': {source}")]
    Table {
        path: String,
        source: FeatureTableError,
    },
    #[error("Invalid molecule catalog in '{path}': {source}")]
    Catalog { path: String, source: CatalogError },
}

fn display_path(path: &std::path::Path) -> String {
    path.to_string_lossy().to_string()
}

// Line 1 is the header.
fn csv_line(record_index: usize) -> usize {
    record_index + 2
}
