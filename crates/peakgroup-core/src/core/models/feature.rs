use super::signal::Signal;
use crate::core::utils::stats::mean_present;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Positive,
    Negative,
}

#[derive(Debug, Error)]
#[error("Invalid polarity string: '{0}'")]
pub struct ParsePolarityError(pub String);

impl FromStr for Polarity {
    type Err = ParsePolarityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "+" | "pos" | "positive" | "1" => Ok(Polarity::Positive),
            "-" | "neg" | "negative" | "-1" => Ok(Polarity::Negative),
            other => Err(ParsePolarityError(other.to_string())),
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => write!(f, "positive"),
            Polarity::Negative => write!(f, "negative"),
        }
    }
}

/// One feature as seen in one replicate run.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub mz: f64,
    pub intensity: Option<f64>,
    pub retention_time: Option<f64>,
    pub signal: Option<Signal>,
}

impl Observation {
    pub fn new(mz: f64) -> Self {
        Self {
            mz,
            intensity: None,
            retention_time: None,
            signal: None,
        }
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = Some(intensity);
        self
    }

    pub fn with_retention_time(mut self, rt: f64) -> Self {
        self.retention_time = Some(rt);
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FeatureTableError {
    #[error("Feature table contains no features")]
    Empty,
    #[error("Feature table needs at least one replicate")]
    NoReplicates,
    #[error("Feature '{feature}' has {found} replicate slots, expected {expected}")]
    ReplicateCountMismatch {
        feature: String,
        expected: usize,
        found: usize,
    },
    #[error("Feature '{feature}' is absent from every replicate")]
    NeverObserved { feature: String },
    #[error("Feature '{feature}' has an invalid {field} value {value} in replicate {replicate}")]
    InvalidValue {
        feature: String,
        replicate: usize,
        field: &'static str,
        value: f64,
    },
    #[error("Duplicate feature id '{0}'")]
    DuplicateFeature(String),
}

#[derive(Debug, Clone, Default)]
struct ReplicateColumns {
    mz: Vec<Option<f64>>,
    log_mass: Vec<Option<f64>>,
    intensity: Vec<Option<f64>>,
    retention_time: Vec<Option<f64>>,
    signal: Vec<Option<Signal>>,
}

/// Replicated feature measurements, one aligned column set per replicate.
///
/// Features are addressed by a dense index `0..num_features()`. Every accessor
/// returns `None` for values that were not observed; absent values are never
/// encoded as zero.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    ids: Vec<String>,
    polarities: Vec<Polarity>,
    replicates: Vec<ReplicateColumns>,
}

impl FeatureTable {
    pub fn num_features(&self) -> usize {
        self.ids.len()
    }

    pub fn num_replicates(&self) -> usize {
        self.replicates.len()
    }

    pub fn id(&self, feature: usize) -> &str {
        &self.ids[feature]
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn polarity(&self, feature: usize) -> Polarity {
        self.polarities[feature]
    }

    pub fn is_present(&self, replicate: usize, feature: usize) -> bool {
        self.replicates[replicate].mz[feature].is_some()
    }

    pub fn mz(&self, replicate: usize, feature: usize) -> Option<f64> {
        self.replicates[replicate].mz[feature]
    }

    /// Natural logarithm of the observed m/z.
    pub fn log_mass(&self, replicate: usize, feature: usize) -> Option<f64> {
        self.replicates[replicate].log_mass[feature]
    }

    pub fn intensity(&self, replicate: usize, feature: usize) -> Option<f64> {
        self.replicates[replicate].intensity[feature]
    }

    pub fn retention_time(&self, replicate: usize, feature: usize) -> Option<f64> {
        self.replicates[replicate].retention_time[feature]
    }

    pub fn signal(&self, replicate: usize, feature: usize) -> Option<&Signal> {
        self.replicates[replicate].signal[feature].as_ref()
    }

    /// Mean of every present intensity across all replicates.
    pub fn mean_intensity(&self) -> Option<f64> {
        mean_present(
            self.replicates
                .iter()
                .flat_map(|r| r.intensity.iter().flatten().copied()),
        )
    }

    /// Mean of every present retention time across all replicates.
    pub fn mean_retention_time(&self) -> Option<f64> {
        mean_present(
            self.replicates
                .iter()
                .flat_map(|r| r.retention_time.iter().flatten().copied()),
        )
    }

    pub fn average_mz(&self, feature: usize) -> f64 {
        mean_present(self.replicates.iter().filter_map(|r| r.mz[feature])).unwrap_or(f64::NAN)
    }

    pub fn average_intensity(&self, feature: usize) -> Option<f64> {
        mean_present(self.replicates.iter().filter_map(|r| r.intensity[feature]))
    }

    pub fn average_retention_time(&self, feature: usize) -> Option<f64> {
        mean_present(
            self.replicates
                .iter()
                .filter_map(|r| r.retention_time[feature]),
        )
    }
}

/// Incrementally assembles a [`FeatureTable`], validating each feature as it is added.
#[derive(Debug)]
pub struct FeatureTableBuilder {
    num_replicates: usize,
    table: FeatureTable,
}

impl FeatureTableBuilder {
    pub fn new(num_replicates: usize) -> Self {
        Self {
            num_replicates,
            table: FeatureTable {
                ids: Vec::new(),
                polarities: Vec::new(),
                replicates: vec![ReplicateColumns::default(); num_replicates],
            },
        }
    }

    pub fn num_replicates(&self) -> usize {
        self.num_replicates
    }

    /// Adds a feature and returns its dense index.
    pub fn add_feature(
        &mut self,
        id: impl Into<String>,
        polarity: Polarity,
        observations: Vec<Option<Observation>>,
    ) -> Result<usize, FeatureTableError> {
        let id = id.into();
        if self.num_replicates == 0 {
            return Err(FeatureTableError::NoReplicates);
        }
        if observations.len() != self.num_replicates {
            return Err(FeatureTableError::ReplicateCountMismatch {
                feature: id,
                expected: self.num_replicates,
                found: observations.len(),
            });
        }
        if observations.iter().all(Option::is_none) {
            return Err(FeatureTableError::NeverObserved { feature: id });
        }
        if self.table.ids.contains(&id) {
            return Err(FeatureTableError::DuplicateFeature(id));
        }

        for (replicate, obs) in observations.iter().enumerate() {
            let Some(obs) = obs else { continue };
            let invalid = |field: &'static str, value: f64| FeatureTableError::InvalidValue {
                feature: id.clone(),
                replicate,
                field,
                value,
            };
            if !obs.mz.is_finite() || obs.mz <= 0.0 {
                return Err(invalid("mz", obs.mz));
            }
            if let Some(i) = obs.intensity.filter(|i| !i.is_finite() || *i <= 0.0) {
                return Err(invalid("intensity", i));
            }
            if let Some(rt) = obs.retention_time.filter(|rt| !rt.is_finite()) {
                return Err(invalid("retention time", rt));
            }
        }

        for (columns, obs) in self.table.replicates.iter_mut().zip(observations) {
            match obs {
                Some(obs) => {
                    columns.mz.push(Some(obs.mz));
                    columns.log_mass.push(Some(obs.mz.ln()));
                    columns.intensity.push(obs.intensity);
                    columns.retention_time.push(obs.retention_time);
                    columns.signal.push(obs.signal);
                }
                None => {
                    columns.mz.push(None);
                    columns.log_mass.push(None);
                    columns.intensity.push(None);
                    columns.retention_time.push(None);
                    columns.signal.push(None);
                }
            }
        }
        self.table.ids.push(id);
        self.table.polarities.push(polarity);
        Ok(self.table.ids.len() - 1)
    }

    pub fn build(self) -> Result<FeatureTable, FeatureTableError> {
        if self.num_replicates == 0 {
            return Err(FeatureTableError::NoReplicates);
        }
        if self.table.ids.is_empty() {
            return Err(FeatureTableError::Empty);
        }
        Ok(self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(mz: f64, intensity: f64, rt: f64) -> Option<Observation> {
        Some(
            Observation::new(mz)
                .with_intensity(intensity)
                .with_retention_time(rt),
        )
    }

    fn setup() -> FeatureTable {
        let mut builder = FeatureTableBuilder::new(2);
        builder
            .add_feature("a", Polarity::Positive, vec![obs(100.0, 10.0, 5.0), None])
            .unwrap();
        builder
            .add_feature(
                "b",
                Polarity::Negative,
                vec![obs(200.0, 30.0, 7.0), obs(202.0, 50.0, 9.0)],
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn accessors_report_absent_values_as_none() {
        let table = setup();
        assert_eq!(table.num_features(), 2);
        assert_eq!(table.num_replicates(), 2);
        assert!(table.is_present(0, 0));
        assert!(!table.is_present(1, 0));
        assert_eq!(table.intensity(1, 0), None);
        assert_eq!(table.retention_time(1, 0), None);
        assert_eq!(table.log_mass(1, 0), None);
        assert_eq!(table.log_mass(0, 0), Some(100f64.ln()));
        assert_eq!(table.polarity(1), Polarity::Negative);
        assert_eq!(table.id(1), "b");
    }

    #[test]
    fn table_means_skip_absent_entries() {
        let table = setup();
        assert_eq!(table.mean_intensity(), Some(30.0));
        assert_eq!(table.mean_retention_time(), Some(7.0));
        assert_eq!(table.average_mz(1), 201.0);
        assert_eq!(table.average_intensity(0), Some(10.0));
    }

    #[test]
    fn build_fails_on_empty_table() {
        let builder = FeatureTableBuilder::new(3);
        assert_eq!(builder.build().unwrap_err(), FeatureTableError::Empty);
    }

    #[test]
    fn add_feature_rejects_wrong_replicate_count() {
        let mut builder = FeatureTableBuilder::new(2);
        let err = builder
            .add_feature("x", Polarity::Positive, vec![obs(100.0, 1.0, 1.0)])
            .unwrap_err();
        assert!(matches!(
            err,
            FeatureTableError::ReplicateCountMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn add_feature_rejects_unobserved_and_invalid_features() {
        let mut builder = FeatureTableBuilder::new(1);
        assert!(matches!(
            builder.add_feature("x", Polarity::Positive, vec![None]),
            Err(FeatureTableError::NeverObserved { .. })
        ));
        assert!(matches!(
            builder.add_feature("y", Polarity::Positive, vec![obs(-1.0, 1.0, 1.0)]),
            Err(FeatureTableError::InvalidValue { field: "mz", .. })
        ));
        assert!(matches!(
            builder.add_feature("z", Polarity::Positive, vec![obs(1.0, 0.0, 1.0)]),
            Err(FeatureTableError::InvalidValue {
                field: "intensity",
                ..
            })
        ));
    }

    #[test]
    fn add_feature_rejects_duplicate_ids() {
        let mut builder = FeatureTableBuilder::new(1);
        builder
            .add_feature("x", Polarity::Positive, vec![obs(1.0, 1.0, 1.0)])
            .unwrap();
        assert_eq!(
            builder
                .add_feature("x", Polarity::Positive, vec![obs(1.0, 1.0, 1.0)])
                .unwrap_err(),
            FeatureTableError::DuplicateFeature("x".to_string())
        );
    }

    #[test]
    fn polarity_parses_common_spellings() {
        assert_eq!("+".parse::<Polarity>().unwrap(), Polarity::Positive);
        assert_eq!("Negative".parse::<Polarity>().unwrap(), Polarity::Negative);
        assert!("sideways".parse::<Polarity>().is_err());
    }
}
