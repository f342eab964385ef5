pub mod defaults;

use crate::cli::{ClusterArgs, CommonArgs, IdentifyArgs};
use crate::error::{CliError, Result};
use defaults::DefaultsConfig;
use peakgroup::core::models::signal::CorrelationMeasure;
use peakgroup::engine::config as core_config;
use peakgroup::engine::molecule::{InitialClustering, MoleculeStep};
use peakgroup::engine::scoring::noise::NoiseModel;
use serde::Deserialize;
use serde::de::{DeserializeOwned, IntoDeserializer};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSamplerConfig {
    num_samples: Option<usize>,
    burn_in: Option<usize>,
    initial_cluster_count: Option<usize>,
    alpha: Option<f64>,
    seed: Option<u64>,
}

/// Noise model selection; Beta shapes come from `alpha0` / `alpha1`.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "type")]
enum PartialNoiseModel {
    Beta,
    Exponential { lambda: f64 },
    Normal { mean: f64, variance: f64 },
}

impl PartialNoiseModel {
    fn into_model(self, beta_shape: impl FnOnce() -> NoiseModel) -> NoiseModel {
        match self {
            PartialNoiseModel::Beta => beta_shape(),
            PartialNoiseModel::Exponential { lambda } => NoiseModel::Exponential { lambda },
            PartialNoiseModel::Normal { mean, variance } => NoiseModel::Normal { mean, variance },
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialCorrelationConfig {
    enabled: Option<bool>,
    rt_window: Option<f64>,
    p0: Option<f64>,
    p1: Option<f64>,
    alpha0: Option<f64>,
    alpha1: Option<f64>,
    in_model: Option<PartialNoiseModel>,
    out_model: Option<PartialNoiseModel>,
    measure: Option<CorrelationMeasure>,
    count_out_of_window_replicates: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialRetentionTimeConfig {
    enabled: Option<bool>,
    sd: Option<f64>,
    prior_kappa: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
enum PartialInitialClustering {
    SinglePeak,
    Pregrouped,
    Fixed,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialMoleculeConfig {
    adducts: Option<Vec<String>>,
    max_positions_per_adduct: Option<usize>,
    min_distribution_value: Option<f64>,
    mass_precision_ppm: Option<f64>,
    intensity_prior_mean: Option<f64>,
    intensity_prior_kappa: Option<f64>,
    intensity_kappa: Option<f64>,
    step: Option<MoleculeStep>,
    use_retention_time_prediction: Option<bool>,
    retention_time_prediction_sd: Option<f64>,
    initial_clustering: Option<PartialInitialClustering>,
    fixed_cluster_count: Option<usize>,
    identification_peaks: Option<usize>,
    min_supporting_features: Option<usize>,
}

/// Configuration as read from a TOML file, before command-line overrides.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialConfig {
    sampler: Option<PartialSamplerConfig>,
    correlation: Option<PartialCorrelationConfig>,
    retention_time: Option<PartialRetentionTimeConfig>,
    molecule: Option<PartialMoleculeConfig>,
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// The file named by `--config`, or an empty configuration.
    pub fn load(args: &CommonArgs) -> Result<Self> {
        match &args.config {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn merge_for_clustering(
        mut self,
        args: &ClusterArgs,
    ) -> Result<core_config::ClusteringConfig> {
        self.apply_set_values(&args.common.set_values)?;
        if self.molecule.is_some() {
            warn!("The [molecule] section only applies to 'identify' and is ignored.");
        }
        let defaults = DefaultsConfig::default();
        let sampler = self.merge_sampler(&args.common, args.co_clustering.is_some(), &defaults);

        let mut builder = core_config::ClusteringConfigBuilder::new().sampler(sampler);
        if let Some(correlation) = self.merge_correlation(&defaults) {
            builder = builder.correlation(correlation);
        }
        if let Some(retention_time) = self.merge_retention_time(&defaults) {
            builder = builder.retention_time(retention_time);
        }
        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    pub fn merge_for_identification(
        mut self,
        args: &IdentifyArgs,
    ) -> Result<core_config::IdentificationConfig> {
        self.apply_set_values(&args.common.set_values)?;
        let defaults = DefaultsConfig::default();
        let sampler = self.merge_sampler(&args.common, false, &defaults);

        let mut builder = core_config::IdentificationConfigBuilder::new()
            .sampler(sampler)
            .molecule(self.merge_molecule(&defaults));
        if let Some(correlation) = self.merge_correlation(&defaults) {
            builder = builder.correlation(correlation);
        }
        if let Some(retention_time) = self.merge_retention_time(&defaults) {
            builder = builder.retention_time(retention_time);
        }
        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn merge_sampler(
        &self,
        args: &CommonArgs,
        track_co_clustering: bool,
        defaults: &DefaultsConfig,
    ) -> core_config::SamplerConfig {
        let file = self.sampler.as_ref();
        core_config::SamplerConfig {
            num_samples: args
                .num_samples
                .or(file.and_then(|s| s.num_samples))
                .unwrap_or(defaults.num_samples),
            burn_in: args
                .burn_in
                .or(file.and_then(|s| s.burn_in))
                .unwrap_or(defaults.burn_in),
            initial_cluster_count: file
                .and_then(|s| s.initial_cluster_count)
                .unwrap_or(defaults.initial_cluster_count),
            alpha: file.and_then(|s| s.alpha).unwrap_or(defaults.alpha),
            seed: args
                .seed
                .or(file.and_then(|s| s.seed))
                .unwrap_or(defaults.seed),
            track_co_clustering,
        }
    }

    fn merge_correlation(
        &self,
        defaults: &DefaultsConfig,
    ) -> Option<core_config::CorrelationConfig> {
        let file = self.correlation.as_ref();
        let enabled = file
            .and_then(|c| c.enabled)
            .unwrap_or(defaults.correlation_enabled);
        if !enabled {
            return None;
        }
        let alpha0 = file.and_then(|c| c.alpha0).unwrap_or(defaults.alpha0);
        let alpha1 = file.and_then(|c| c.alpha1).unwrap_or(defaults.alpha1);
        let in_model = file
            .and_then(|c| c.in_model)
            .unwrap_or(PartialNoiseModel::Beta)
            .into_model(|| NoiseModel::BetaIn { alpha1 });
        let out_model = file
            .and_then(|c| c.out_model)
            .unwrap_or(PartialNoiseModel::Beta)
            .into_model(|| NoiseModel::BetaOut { alpha0 });

        Some(core_config::CorrelationConfig {
            rt_window: file.and_then(|c| c.rt_window).unwrap_or(defaults.rt_window),
            p0: file.and_then(|c| c.p0).unwrap_or(defaults.p0),
            p1: file.and_then(|c| c.p1).unwrap_or(defaults.p1),
            in_model,
            out_model,
            measure: file.and_then(|c| c.measure).unwrap_or_default(),
            count_out_of_window_replicates: file
                .and_then(|c| c.count_out_of_window_replicates)
                .unwrap_or(false),
        })
    }

    fn merge_retention_time(
        &self,
        defaults: &DefaultsConfig,
    ) -> Option<core_config::RetentionTimeConfig> {
        let file = self.retention_time.as_ref();
        let enabled = file
            .and_then(|rt| rt.enabled)
            .unwrap_or(defaults.retention_time_enabled);
        enabled.then(|| core_config::RetentionTimeConfig {
            sd: file.and_then(|rt| rt.sd).unwrap_or(defaults.retention_time_sd),
            prior_kappa: file
                .and_then(|rt| rt.prior_kappa)
                .unwrap_or(defaults.retention_time_prior_kappa),
        })
    }

    fn merge_molecule(&self, defaults: &DefaultsConfig) -> core_config::MoleculeConfig {
        let file = self.molecule.as_ref();
        let fixed_clusters = file
            .and_then(|m| m.fixed_cluster_count)
            .unwrap_or(defaults.fixed_cluster_count);
        let initial_clustering = match file.and_then(|m| m.initial_clustering) {
            None | Some(PartialInitialClustering::SinglePeak) => InitialClustering::SinglePeak,
            Some(PartialInitialClustering::Pregrouped) => InitialClustering::Pregrouped,
            Some(PartialInitialClustering::Fixed) => InitialClustering::Fixed {
                clusters: fixed_clusters,
            },
        };

        core_config::MoleculeConfig {
            adducts: file
                .and_then(|m| m.adducts.clone())
                .unwrap_or_else(|| defaults.adducts.clone()),
            max_positions_per_adduct: file
                .and_then(|m| m.max_positions_per_adduct)
                .unwrap_or(defaults.max_positions_per_adduct),
            min_distribution_value: file
                .and_then(|m| m.min_distribution_value)
                .unwrap_or(defaults.min_distribution_value),
            mass_precision_ppm: file
                .and_then(|m| m.mass_precision_ppm)
                .unwrap_or(defaults.mass_precision_ppm),
            intensity_prior_mean: file.and_then(|m| m.intensity_prior_mean),
            intensity_prior_kappa: file
                .and_then(|m| m.intensity_prior_kappa)
                .unwrap_or(defaults.intensity_prior_kappa),
            intensity_kappa: file
                .and_then(|m| m.intensity_kappa)
                .unwrap_or(defaults.intensity_kappa),
            step: file
                .and_then(|m| m.step)
                .unwrap_or(MoleculeStep::MetropolisHastings),
            use_retention_time_prediction: file
                .and_then(|m| m.use_retention_time_prediction)
                .unwrap_or(false),
            retention_time_prediction_sd: file
                .and_then(|m| m.retention_time_prediction_sd)
                .unwrap_or(defaults.retention_time_prediction_sd),
            initial_clustering,
            identification_peaks: file
                .and_then(|m| m.identification_peaks)
                .unwrap_or(defaults.identification_peaks),
            min_supporting_features: file
                .and_then(|m| m.min_supporting_features)
                .unwrap_or(defaults.min_supporting_features),
        }
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };
            let (key, value) = (key.trim(), value.trim());
            let (section, field) = key.split_once('.').unwrap_or((key, ""));

            match section {
                "sampler" => {
                    let s = self.sampler.get_or_insert_with(Default::default);
                    match field {
                        "num-samples" => s.num_samples = Some(parse(key, value)?),
                        "burn-in" => s.burn_in = Some(parse(key, value)?),
                        "initial-cluster-count" => s.initial_cluster_count = Some(parse(key, value)?),
                        "alpha" => s.alpha = Some(parse(key, value)?),
                        "seed" => s.seed = Some(parse(key, value)?),
                        _ => return Err(unsupported_key(key)),
                    }
                }
                "correlation" => {
                    let c = self.correlation.get_or_insert_with(Default::default);
                    match field {
                        "enabled" => c.enabled = Some(parse(key, value)?),
                        "rt-window" => c.rt_window = Some(parse(key, value)?),
                        "p0" => c.p0 = Some(parse(key, value)?),
                        "p1" => c.p1 = Some(parse(key, value)?),
                        "alpha0" => c.alpha0 = Some(parse(key, value)?),
                        "alpha1" => c.alpha1 = Some(parse(key, value)?),
                        "in-model" => c.in_model = Some(parse_beta_model(key, value)?),
                        "out-model" => c.out_model = Some(parse_beta_model(key, value)?),
                        "measure" => c.measure = Some(parse_name(key, value)?),
                        "count-out-of-window-replicates" => {
                            c.count_out_of_window_replicates = Some(parse(key, value)?)
                        }
                        _ => return Err(unsupported_key(key)),
                    }
                }
                "retention-time" => {
                    let rt = self.retention_time.get_or_insert_with(Default::default);
                    match field {
                        "enabled" => rt.enabled = Some(parse(key, value)?),
                        "sd" => rt.sd = Some(parse(key, value)?),
                        "prior-kappa" => rt.prior_kappa = Some(parse(key, value)?),
                        _ => return Err(unsupported_key(key)),
                    }
                }
                "molecule" => {
                    let m = self.molecule.get_or_insert_with(Default::default);
                    match field {
                        "adducts" => {
                            m.adducts = Some(
                                value
                                    .split(',')
                                    .map(|a| a.trim().to_string())
                                    .filter(|a| !a.is_empty())
                                    .collect(),
                            )
                        }
                        "max-positions-per-adduct" => m.max_positions_per_adduct = Some(parse(key, value)?),
                        "min-distribution-value" => m.min_distribution_value = Some(parse(key, value)?),
                        "mass-precision-ppm" => m.mass_precision_ppm = Some(parse(key, value)?),
                        "intensity-prior-mean" => m.intensity_prior_mean = Some(parse(key, value)?),
                        "intensity-prior-kappa" => m.intensity_prior_kappa = Some(parse(key, value)?),
                        "intensity-kappa" => m.intensity_kappa = Some(parse(key, value)?),
                        "step" => m.step = Some(parse_name(key, value)?),
                        "use-retention-time-prediction" => {
                            m.use_retention_time_prediction = Some(parse(key, value)?)
                        }
                        "retention-time-prediction-sd" => {
                            m.retention_time_prediction_sd = Some(parse(key, value)?)
                        }
                        "initial-clustering" => m.initial_clustering = Some(parse_name(key, value)?),
                        "fixed-cluster-count" => m.fixed_cluster_count = Some(parse(key, value)?),
                        "identification-peaks" => m.identification_peaks = Some(parse(key, value)?),
                        "min-supporting-features" => m.min_supporting_features = Some(parse(key, value)?),
                        _ => return Err(unsupported_key(key)),
                    }
                }
                _ => return Err(unsupported_key(key)),
            }
        }
        Ok(())
    }
}

fn unsupported_key(key: &str) -> CliError {
    CliError::Config(format!("Unsupported configuration key for --set: '{}'", key))
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

/// Parses a kebab-case variant name such as `gibbs-positions`.
fn parse_name<T: DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    T::deserialize(value.into_deserializer()).map_err(|e: serde::de::value::Error| {
        CliError::Config(format!("Invalid value for {}: {} ({})", key, value, e))
    })
}

/// Only the parameter-free Beta model can be selected with `--set`.
fn parse_beta_model(key: &str, value: &str) -> Result<PartialNoiseModel> {
    match value {
        "beta" => Ok(PartialNoiseModel::Beta),
        "exponential" | "normal" => Err(CliError::Config(format!(
            "'{}' = '{}' needs parameters; set it in the config file instead",
            key, value
        ))),
        _ => Err(CliError::Config(format!("Invalid value for {}: {}", key, value))),
    }
}
