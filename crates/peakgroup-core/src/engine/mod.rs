//! # Engine Module
//!
//! The stateful layer of the library: it owns the sampler state, the precomputed
//! likelihood caches and the Gibbs sampler that moves features between clusters.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Sampler, correlation, retention-time and molecule parameters
//! - **State** ([`state`]) - Plain partitions and partitions annotated with molecules and positions
//! - **Scoring** ([`scoring`]) - Per-feature likelihood contributions and their posterior combination
//! - **Sampling** ([`sampler`], [`molecule`]) - The generic Gibbs loop and the formula-aware clusterer
//! - **Handlers** ([`handlers`]) - Observers of every retained sample
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress reporting
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! Likelihood tables that do not depend on the clustering are computed once, in
//! parallel when the `parallel` feature is enabled, before the first sweep.

pub(crate) mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod molecule;
pub mod progress;
pub mod sampler;
pub mod scoring;
pub mod state;
pub(crate) mod utils;
