use super::{LoadError, csv_line, display_path};
use crate::core::models::feature::{
    FeatureTable, FeatureTableBuilder, Observation, ParsePolarityError, Polarity,
};
use crate::core::models::signal::Signal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct FeatureRecord {
    feature: String,
    replicate: usize,
    mz: f64,
    intensity: Option<f64>,
    rt: Option<f64>,
    polarity: String,
}

#[derive(Debug, Deserialize)]
struct SignalRecord {
    feature: String,
    replicate: usize,
    rt: f64,
    intensity: f64,
}

struct PendingFeature {
    id: String,
    polarity: Polarity,
    observations: Vec<Option<Observation>>,
}

/// Reads a long-format feature table, optionally attaching chromatographic signals.
///
/// The table CSV has the header `feature,replicate,mz,intensity,rt,polarity`
/// with one row per observed `(feature, replicate)`; replicates are numbered
/// from zero and unobserved replicates simply have no row. The signal CSV has
/// the header `feature,replicate,rt,intensity` with one row per signal point.
#[instrument(skip_all, name = "load_feature_table")]
pub fn load_feature_table(
    path: &Path,
    signals_path: Option<&Path>,
) -> Result<FeatureTable, LoadError> {
    let path_str = display_path(path);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;

    let mut pending: Vec<PendingFeature> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut num_replicates = 0usize;

    for (i, result) in reader.deserialize::<FeatureRecord>().enumerate() {
        let record = result.map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;
        let invalid = |reason: String| LoadError::InvalidRecord {
            path: path_str.clone(),
            line: csv_line(i),
            reason,
        };
        let polarity: Polarity = record
            .polarity
            .parse()
            .map_err(|e: ParsePolarityError| invalid(e.to_string()))?;

        let slot = match index.get(&record.feature) {
            Some(&slot) => {
                if pending[slot].polarity != polarity {
                    return Err(invalid(format!(
                        "feature '{}' changes polarity between replicates",
                        record.feature
                    )));
                }
                slot
            }
            None => {
                index.insert(record.feature.clone(), pending.len());
                pending.push(PendingFeature {
                    id: record.feature.clone(),
                    polarity,
                    observations: Vec::new(),
                });
                pending.len() - 1
            }
        };

        let observations = &mut pending[slot].observations;
        if observations.len() <= record.replicate {
            observations.resize(record.replicate + 1, None);
        }
        if observations[record.replicate].is_some() {
            return Err(invalid(format!(
                "feature '{}' appears twice in replicate {}",
                record.feature, record.replicate
            )));
        }
        observations[record.replicate] = Some(Observation {
            mz: record.mz,
            intensity: record.intensity,
            retention_time: record.rt,
            signal: None,
        });
        num_replicates = num_replicates.max(record.replicate + 1);
    }

    if let Some(signals_path) = signals_path {
        attach_signals(signals_path, &mut pending, &index)?;
    }

    let mut builder = FeatureTableBuilder::new(num_replicates);
    for mut feature in pending {
        feature.observations.resize(num_replicates, None);
        builder
            .add_feature(feature.id, feature.polarity, feature.observations)
            .map_err(|e| LoadError::Table {
                path: path_str.clone(),
                source: e,
            })?;
    }
    let table = builder.build().map_err(|e| LoadError::Table {
        path: path_str.clone(),
        source: e,
    })?;

    debug!(
        features = table.num_features(),
        replicates = table.num_replicates(),
        "Loaded feature table"
    );
    Ok(table)
}

fn attach_signals(
    path: &Path,
    pending: &mut [PendingFeature],
    index: &HashMap<String, usize>,
) -> Result<(), LoadError> {
    let path_str = display_path(path);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;

    let mut points: HashMap<(usize, usize), (Vec<f64>, Vec<f64>)> = HashMap::new();
    for result in reader.deserialize::<SignalRecord>() {
        let record = result.map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;
        let slot = *index
            .get(&record.feature)
            .ok_or_else(|| LoadError::UnknownFeature {
                path: path_str.clone(),
                name: record.feature.clone(),
            })?;
        let entry = points.entry((slot, record.replicate)).or_default();
        entry.0.push(record.rt);
        entry.1.push(record.intensity);
    }

    for ((slot, replicate), (times, intensities)) in points {
        let feature = &mut pending[slot];
        let observation = feature
            .observations
            .get_mut(replicate)
            .and_then(Option::as_mut)
            .ok_or_else(|| LoadError::InvalidRecord {
                path: path_str.clone(),
                line: 0,
                reason: format!(
                    "signal given for feature '{}' in replicate {} where it was not observed",
                    feature.id, replicate
                ),
            })?;
        let signal = Signal::new(times, intensities).ok_or_else(|| LoadError::InvalidRecord {
            path: path_str.clone(),
            line: 0,
            reason: format!(
                "signal of feature '{}' in replicate {} contains non-finite values",
                feature.id, replicate
            ),
        })?;
        observation.signal = Some(signal);
    }
    Ok(())
}
