//! # Core Models Module
//!
//! Data structures describing what was measured and what could explain it.
//!
//! ## Key Components
//!
//! - [`feature`] - The feature table: per-replicate mass, intensity, retention
//!   time and signal of every detected feature
//! - [`signal`] - Chromatographic traces and their shape correlation measures
//! - [`molecule`] - Theoretical spectra of candidate molecules, pruned to a
//!   bounded position space, and the network relating them
//!
//! ## Usage
//!
//! ```ignore
//! use peakgroup::core::models::feature::{FeatureTableBuilder, Observation, Polarity};
//!
//! let mut builder = FeatureTableBuilder::new(2);
//! builder.add_feature(
//!     "F1",
//!     Polarity::Positive,
//!     vec![Some(Observation::new(181.0707).with_intensity(1.0e5)), None],
//! )?;
//! let table = builder.build()?;
//! ```

pub mod feature;
pub mod molecule;
pub mod signal;
