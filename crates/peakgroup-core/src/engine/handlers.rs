use super::state::{ClusterState, Clustering, MoleculeClustering};
use crate::core::models::feature::FeatureTable;
use crate::core::models::molecule::MoleculeCatalog;
use nalgebra::DMatrix;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

/// Observer of every retained sample. Handlers only ever see a shared borrow
/// of the state, so they cannot disturb the chain.
pub trait SampleHandler<S> {
    fn handle_sample(&mut self, state: &S);
}

/// Accumulates how often each pair of features shares a cluster.
#[derive(Debug, Clone)]
pub struct CoClusteringHandler {
    counts: DMatrix<f64>,
    last: DMatrix<f64>,
    samples: usize,
}

impl CoClusteringHandler {
    pub fn new(num_features: usize) -> Self {
        Self {
            counts: DMatrix::zeros(num_features, num_features),
            last: DMatrix::zeros(num_features, 0),
            samples: 0,
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Fraction of samples in which each pair shared a cluster.
    pub fn probabilities(&self) -> DMatrix<f64> {
        if self.samples == 0 {
            return self.counts.clone();
        }
        &self.counts / self.samples as f64
    }

    /// Feature-by-cluster indicator matrix of the most recent sample.
    pub fn last_assignment_matrix(&self) -> &DMatrix<f64> {
        &self.last
    }
}

impl<S: ClusterState> SampleHandler<S> for CoClusteringHandler {
    fn handle_sample(&mut self, state: &S) {
        let partition = state.partition();
        let z = DMatrix::from_fn(partition.num_features(), partition.num_clusters(), |f, k| {
            if partition.cluster_of(f) == k { 1.0 } else { 0.0 }
        });
        self.counts += &z * z.transpose();
        self.last = z;
        self.samples += 1;
    }
}

/// Counts, per molecule, the samples in which enough features line up with
/// the molecule's most intense theoretical peaks.
///
/// Within a sample, features are visited in order and a feature supports its
/// molecule when it sits on the next expected ranked position of one of the
/// adducts.
#[derive(Debug, Clone)]
pub struct IdentificationSupportHandler {
    table: Arc<FeatureTable>,
    catalog: Arc<MoleculeCatalog>,
    needed_support: usize,
    support: Vec<usize>,
    samples: usize,
}

impl IdentificationSupportHandler {
    pub fn new(
        table: Arc<FeatureTable>,
        catalog: Arc<MoleculeCatalog>,
        needed_support: usize,
    ) -> Self {
        let support = vec![0; catalog.len()];
        Self {
            table,
            catalog,
            needed_support,
            support,
            samples: 0,
        }
    }

    pub fn support(&self, molecule: usize) -> usize {
        self.support[molecule]
    }

    pub fn supports(&self) -> &[usize] {
        &self.support
    }

    pub fn samples(&self) -> usize {
        self.samples
    }
}

impl SampleHandler<MoleculeClustering> for IdentificationSupportHandler {
    fn handle_sample(&mut self, state: &MoleculeClustering) {
        let num_adducts = self.catalog.adducts().len();
        let mut counts: HashMap<usize, usize> = HashMap::new();
        let mut next_rank: HashMap<usize, Vec<usize>> = HashMap::new();

        for feature in 0..self.table.num_features() {
            let molecule = state.feature_molecule(feature);
            let position = state.position_of(feature);
            let polarity = self.table.polarity(feature);
            let spectrum = self.catalog.molecule(molecule);
            let ranks = next_rank
                .entry(molecule)
                .or_insert_with(|| vec![0; num_adducts]);
            for (adduct, rank) in ranks.iter_mut().enumerate() {
                let ranked = spectrum.ranked_positions(polarity, adduct);
                if ranked.get(*rank) == Some(&position) {
                    *counts.entry(molecule).or_default() += 1;
                    *rank += 1;
                    break;
                }
            }
        }

        for (molecule, count) in counts {
            if count >= self.needed_support {
                self.support[molecule] += 1;
            }
        }
        self.samples += 1;
    }
}

#[derive(Debug, Serialize)]
struct TraceRow {
    sample: usize,
    feature: usize,
    cluster: usize,
    cluster_size: usize,
}

/// Streams every retained sample as CSV rows `sample,feature,cluster,cluster_size`.
///
/// Write failures do not interrupt sampling; the first one is kept and
/// returned by [`TraceHandler::finish`].
pub struct TraceHandler<W: Write> {
    writer: csv::Writer<W>,
    samples: usize,
    error: Option<csv::Error>,
}

impl<W: Write> TraceHandler<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            samples: 0,
            error: None,
        }
    }

    /// Flushes the trace and hands back the underlying writer.
    pub fn finish(mut self) -> Result<W, csv::Error> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        self.writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }

    fn write_sample(&mut self, partition: &Clustering) -> Result<(), csv::Error> {
        for feature in 0..partition.num_features() {
            let cluster = partition.cluster_of(feature);
            self.writer.serialize(TraceRow {
                sample: self.samples,
                feature,
                cluster,
                cluster_size: partition.cluster_size(cluster),
            })?;
        }
        Ok(())
    }
}

impl<S: ClusterState, W: Write> SampleHandler<S> for TraceHandler<W> {
    fn handle_sample(&mut self, state: &S) {
        if self.error.is_none() {
            let result = self.write_sample(state.partition());
            if let Err(error) = result {
                warn!(sample = self.samples, "Failed to write sample trace: {}", error);
                self.error = Some(error);
            }
        }
        self.samples += 1;
    }
}
