//! Numeric helpers for the sampling engine: log-space normalisation and
//! categorical draws.

pub mod sampling;
