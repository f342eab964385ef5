//! # Workflows Module
//!
//! End-to-end runs of the engine. Each workflow validates its inputs,
//! precomputes the likelihood tables, drives the Gibbs sampler through burn-in
//! and sampling, and turns the best sample into plain cluster and feature maps.
//!
//! ## Architecture
//!
//! - **Clustering Workflow** ([`cluster`]) - Groups features using shape
//!   correlation and retention time only
//! - **Identification Workflow** ([`identify`]) - Additionally explains every
//!   cluster by a catalog molecule and every feature by a position in that
//!   molecule's theoretical spectrum
//!
//! Both workflows report their "Precomputation", "Burn-in" and "Sampling"
//! phases through the supplied [`ProgressReporter`](crate::engine::progress::ProgressReporter)
//! and forward every retained sample to caller-supplied handlers.

pub mod cluster;
pub mod identify;
