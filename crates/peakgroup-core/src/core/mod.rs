//! # Core Module
//!
//! The immutable inputs of a clustering run and the numeric helpers shared by
//! every layer above.
//!
//! ## Architecture
//!
//! - **Data Models** ([`models`]) - Replicated feature tables, chromatographic
//!   signals, the molecule catalog and its connectivity network
//! - **File I/O** ([`io`]) - CSV and text loaders for the models
//! - **Utilities** ([`utils`]) - Log-space Normal densities and mass precision
//!
//! Nothing in this layer changes after construction. The sampling engine only
//! ever borrows these structures.

pub mod io;
pub mod models;
pub mod utils;
