use super::molecule::{InitialClustering, MoleculeStep};
use super::scoring::noise::NoiseModel;
use crate::core::models::molecule::SpectrumLimits;
use crate::core::models::signal::CorrelationMeasure;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("must be a positive finite number, got {value}")))
    }
}

fn require_open_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("must lie strictly between 0 and 1, got {value}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub num_samples: usize,
    pub burn_in: usize,
    pub initial_cluster_count: usize,
    /// Concentration parameter weighting the "new cluster" column.
    pub alpha: f64,
    pub seed: u64,
    pub track_co_clustering: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_samples: 20,
            burn_in: 30,
            initial_cluster_count: 10,
            alpha: 1.0,
            seed: 42,
            track_co_clustering: false,
        }
    }
}

impl SamplerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("sampler.alpha", self.alpha)?;
        if self.initial_cluster_count == 0 {
            return Err(invalid("sampler.initial_cluster_count", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationConfig {
    pub rt_window: f64,
    /// Probability that two features of different clusters are outside the window.
    pub p0: f64,
    /// Probability that two features of the same cluster are outside the window.
    pub p1: f64,
    pub in_model: NoiseModel,
    pub out_model: NoiseModel,
    pub measure: CorrelationMeasure,
    pub count_out_of_window_replicates: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            rt_window: 30.0,
            p0: 0.97,
            p1: 0.001,
            in_model: NoiseModel::BetaIn { alpha1: 10.0 },
            out_model: NoiseModel::BetaOut { alpha0: 2.0 },
            measure: CorrelationMeasure::Pearson,
            count_out_of_window_replicates: false,
        }
    }
}

impl CorrelationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("correlation.rt_window", self.rt_window)?;
        require_open_unit("correlation.p0", self.p0)?;
        require_open_unit("correlation.p1", self.p1)?;
        self.in_model.validate("correlation.in_model")?;
        self.out_model.validate("correlation.out_model")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionTimeConfig {
    pub sd: f64,
    pub prior_kappa: f64,
}

impl Default for RetentionTimeConfig {
    fn default() -> Self {
        Self {
            sd: 2.5,
            prior_kappa: 1e-10,
        }
    }
}

impl RetentionTimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("retention_time.sd", self.sd)?;
        require_positive("retention_time.prior_kappa", self.prior_kappa)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoleculeConfig {
    pub adducts: Vec<String>,
    pub max_positions_per_adduct: usize,
    pub min_distribution_value: f64,
    pub mass_precision_ppm: f64,
    /// Prior mean of cluster intensities; the data mean when unset.
    pub intensity_prior_mean: Option<f64>,
    pub intensity_prior_kappa: f64,
    pub intensity_kappa: f64,
    pub step: MoleculeStep,
    pub use_retention_time_prediction: bool,
    pub retention_time_prediction_sd: f64,
    pub initial_clustering: InitialClustering,
    pub identification_peaks: usize,
    pub min_supporting_features: usize,
}

impl Default for MoleculeConfig {
    fn default() -> Self {
        Self {
            adducts: vec!["M+H".to_string(), "M-H".to_string()],
            max_positions_per_adduct: 3,
            min_distribution_value: 1e-5,
            mass_precision_ppm: 3.0,
            intensity_prior_mean: None,
            intensity_prior_kappa: 1e-16,
            intensity_kappa: 1e-10,
            step: MoleculeStep::MetropolisHastings,
            use_retention_time_prediction: false,
            retention_time_prediction_sd: 30.0,
            initial_clustering: InitialClustering::SinglePeak,
            identification_peaks: 3,
            min_supporting_features: 2,
        }
    }
}

impl MoleculeConfig {
    pub fn spectrum_limits(&self) -> SpectrumLimits {
        SpectrumLimits {
            adducts: self.adducts.clone(),
            max_positions_per_adduct: self.max_positions_per_adduct,
            min_distribution_value: self.min_distribution_value,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.adducts.is_empty() {
            return Err(invalid("molecule.adducts", "at least one adduct is required"));
        }
        if self.max_positions_per_adduct == 0 {
            return Err(invalid("molecule.max_positions_per_adduct", "must be at least 1"));
        }
        if !(self.min_distribution_value >= 0.0 && self.min_distribution_value.is_finite()) {
            return Err(invalid(
                "molecule.min_distribution_value",
                "must be a non-negative finite number",
            ));
        }
        require_positive("molecule.mass_precision_ppm", self.mass_precision_ppm)?;
        require_positive("molecule.intensity_prior_kappa", self.intensity_prior_kappa)?;
        require_positive("molecule.intensity_kappa", self.intensity_kappa)?;
        if self.intensity_prior_mean.is_some_and(|mean| !mean.is_finite()) {
            return Err(invalid("molecule.intensity_prior_mean", "must be finite"));
        }
        require_positive(
            "molecule.retention_time_prediction_sd",
            self.retention_time_prediction_sd,
        )?;
        if self.identification_peaks == 0 {
            return Err(invalid("molecule.identification_peaks", "must be at least 1"));
        }
        if self.min_supporting_features == 0 {
            return Err(invalid("molecule.min_supporting_features", "must be at least 1"));
        }
        if let InitialClustering::Fixed { clusters: 0 } = self.initial_clustering {
            return Err(invalid("molecule.fixed_cluster_count", "must be at least 1"));
        }
        Ok(())
    }
}

/// Settings of a partition-only clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringConfig {
    pub sampler: SamplerConfig,
    /// `None` disables the correlation scorer.
    pub correlation: Option<CorrelationConfig>,
    /// `None` disables the retention-time scorer.
    pub retention_time: Option<RetentionTimeConfig>,
}

#[derive(Default)]
pub struct ClusteringConfigBuilder {
    sampler: Option<SamplerConfig>,
    correlation: Option<CorrelationConfig>,
    retention_time: Option<RetentionTimeConfig>,
}

impl ClusteringConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = Some(sampler);
        self
    }
    pub fn correlation(mut self, correlation: CorrelationConfig) -> Self {
        self.correlation = Some(correlation);
        self
    }
    pub fn retention_time(mut self, retention_time: RetentionTimeConfig) -> Self {
        self.retention_time = Some(retention_time);
        self
    }

    pub fn build(self) -> Result<ClusteringConfig, ConfigError> {
        let sampler = self
            .sampler
            .ok_or(ConfigError::MissingParameter("sampler"))?;
        sampler.validate()?;
        if let Some(c) = &self.correlation {
            c.validate()?;
        }
        if let Some(rt) = &self.retention_time {
            rt.validate()?;
        }
        if self.correlation.is_none() && self.retention_time.is_none() {
            return Err(invalid(
                "scorers",
                "at least one of correlation or retention time scoring must be enabled",
            ));
        }
        Ok(ClusteringConfig {
            sampler,
            correlation: self.correlation,
            retention_time: self.retention_time,
        })
    }
}

/// Settings of a formula-aware identification run.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationConfig {
    pub sampler: SamplerConfig,
    pub correlation: Option<CorrelationConfig>,
    pub retention_time: Option<RetentionTimeConfig>,
    pub molecule: MoleculeConfig,
}

#[derive(Default)]
pub struct IdentificationConfigBuilder {
    sampler: Option<SamplerConfig>,
    correlation: Option<CorrelationConfig>,
    retention_time: Option<RetentionTimeConfig>,
    molecule: Option<MoleculeConfig>,
}

impl IdentificationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = Some(sampler);
        self
    }
    pub fn correlation(mut self, correlation: CorrelationConfig) -> Self {
        self.correlation = Some(correlation);
        self
    }
    pub fn retention_time(mut self, retention_time: RetentionTimeConfig) -> Self {
        self.retention_time = Some(retention_time);
        self
    }
    pub fn molecule(mut self, molecule: MoleculeConfig) -> Self {
        self.molecule = Some(molecule);
        self
    }

    pub fn build(self) -> Result<IdentificationConfig, ConfigError> {
        let sampler = self
            .sampler
            .ok_or(ConfigError::MissingParameter("sampler"))?;
        let molecule = self
            .molecule
            .ok_or(ConfigError::MissingParameter("molecule"))?;
        sampler.validate()?;
        molecule.validate()?;
        if let Some(c) = &self.correlation {
            c.validate()?;
        }
        if let Some(rt) = &self.retention_time {
            rt.validate()?;
        }
        let needs_rt = molecule.use_retention_time_prediction
            || molecule.step == MoleculeStep::RetentionTime;
        if needs_rt && self.retention_time.is_none() {
            return Err(invalid(
                "molecule.step",
                "retention time based molecule updates need retention time scoring enabled",
            ));
        }
        Ok(IdentificationConfig {
            sampler,
            correlation: self.correlation,
            retention_time: self.retention_time,
            molecule,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clustering_builder_requires_sampler() {
        let result = ClusteringConfigBuilder::new()
            .correlation(CorrelationConfig::default())
            .build();
        assert_eq!(result, Err(ConfigError::MissingParameter("sampler")));
    }

    #[test]
    fn clustering_builder_requires_a_scorer() {
        let result = ClusteringConfigBuilder::new()
            .sampler(SamplerConfig::default())
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter { name: "scorers", .. })
        ));
    }

    #[test]
    fn clustering_builder_accepts_defaults() {
        let config = ClusteringConfigBuilder::new()
            .sampler(SamplerConfig::default())
            .correlation(CorrelationConfig::default())
            .retention_time(RetentionTimeConfig::default())
            .build()
            .unwrap();
        assert_eq!(config.sampler.num_samples, 20);
        assert_eq!(config.sampler.burn_in, 30);
        assert_eq!(config.correlation.unwrap().p0, 0.97);
    }

    #[test]
    fn probabilities_must_lie_inside_unit_interval() {
        for p in [0.0, 1.0, -0.2, f64::NAN] {
            let correlation = CorrelationConfig {
                p1: p,
                ..CorrelationConfig::default()
            };
            let result = ClusteringConfigBuilder::new()
                .sampler(SamplerConfig::default())
                .correlation(correlation)
                .build();
            assert!(
                matches!(
                    result,
                    Err(ConfigError::InvalidParameter {
                        name: "correlation.p1",
                        ..
                    })
                ),
                "p1 = {p} should be rejected"
            );
        }
    }

    #[test]
    fn zero_precision_is_rejected() {
        let result = ClusteringConfigBuilder::new()
            .sampler(SamplerConfig::default())
            .retention_time(RetentionTimeConfig {
                sd: 0.0,
                ..RetentionTimeConfig::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "retention_time.sd",
                ..
            })
        ));
    }

    #[test]
    fn identification_builder_requires_molecule_settings() {
        let result = IdentificationConfigBuilder::new()
            .sampler(SamplerConfig::default())
            .build();
        assert_eq!(result, Err(ConfigError::MissingParameter("molecule")));
    }

    #[test]
    fn identification_builder_rejects_empty_adducts() {
        let result = IdentificationConfigBuilder::new()
            .sampler(SamplerConfig::default())
            .molecule(MoleculeConfig {
                adducts: vec![],
                ..MoleculeConfig::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "molecule.adducts",
                ..
            })
        ));
    }

    #[test]
    fn retention_time_molecule_step_needs_retention_time_scoring() {
        let result = IdentificationConfigBuilder::new()
            .sampler(SamplerConfig::default())
            .molecule(MoleculeConfig {
                step: MoleculeStep::RetentionTime,
                ..MoleculeConfig::default()
            })
            .build();
        assert!(result.is_err());
    }
}
