use super::config::ConfigError;
use super::utils::sampling::SamplingError;
use crate::core::models::feature::FeatureTableError;
use crate::core::models::molecule::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid feature data: {0}")]
    Data(#[from] FeatureTableError),

    #[error("Invalid molecule catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Numerical failure during '{phase}': {source}")]
    Numerical {
        phase: &'static str,
        source: SamplingError,
    },

    #[error("No finite score was recorded across {samples} samples")]
    NoFiniteSample { samples: usize },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn numerical(phase: &'static str) -> impl FnOnce(SamplingError) -> Self {
        move |source| EngineError::Numerical { phase, source }
    }
}
