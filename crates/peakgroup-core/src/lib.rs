//! # peakgroup
//!
//! Bayesian nonparametric grouping of mass-spectrometry features. Features that
//! derive from the same analyte (isotopes, adducts, fragments) are clustered by
//! a collapsed Gibbs sampler over a Dirichlet-process mixture, optionally while
//! identifying the molecule behind every cluster.
//!
//! ## Architectural Philosophy
//!
//! The library keeps a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Immutable data models (`FeatureTable`,
//!   `MoleculeCatalog`, `ConnectivityNetwork`), their loaders and the numeric
//!   helpers they share.
//!
//! - **[`engine`]: The Logic Core.** The sampler state, the precomputed
//!   likelihood caches, the scorers, the Gibbs sampler and its molecule moves,
//!   and the sample handlers that observe a run.
//!
//! - **[`workflows`]: The Public API.** `cluster::run` and `identify::run` tie
//!   `engine` and `core` together and return the best sample as plain maps.
//!
//! ## Determinism
//!
//! A run draws every random number from one ChaCha8 stream seeded by
//! `SamplerConfig::seed`, so the same inputs and configuration always yield the
//! same samples. The optional `parallel` feature only affects the precomputation
//! of likelihood tables, never the order of sampling.

pub mod core;
pub mod engine;
pub mod workflows;
