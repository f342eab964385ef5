//! Numeric helpers shared by the models and the sampling engine.

pub mod stats;
