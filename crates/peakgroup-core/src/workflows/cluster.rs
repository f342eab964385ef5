use crate::core::models::feature::FeatureTable;
use crate::engine::config::ClusteringConfig;
use crate::engine::error::EngineError;
use crate::engine::handlers::{CoClusteringHandler, SampleHandler};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sampler::{GibbsSampler, PartitionClusterer, SampleRecord};
use crate::engine::scoring::{CorrelationScorer, PosteriorScorer, RetentionTimeScorer};
use crate::engine::state::Clustering;
use nalgebra::DMatrix;
use std::sync::Arc;
use tracing::{info, instrument};

/// Best partition found by a clustering run.
#[derive(Debug, Clone)]
pub struct ClusteringResult {
    /// Cluster of every feature.
    pub assignments: Vec<usize>,
    /// Features of every cluster, in ascending order.
    pub clusters: Vec<Vec<usize>>,
    /// Most intense feature of every cluster.
    pub representatives: Vec<usize>,
    pub score: f64,
    pub sample_scores: Vec<f64>,
    /// Pairwise co-clustering frequencies over all retained samples.
    pub co_clustering: Option<DMatrix<f64>>,
}

impl ClusteringResult {
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }
}

#[instrument(skip_all, name = "clustering_workflow")]
pub fn run(
    table: Arc<FeatureTable>,
    config: &ClusteringConfig,
    handlers: &mut [&mut dyn SampleHandler<Clustering>],
    reporter: &ProgressReporter,
) -> Result<ClusteringResult, EngineError> {
    info!(
        features = table.num_features(),
        replicates = table.num_replicates(),
        "Starting clustering workflow."
    );

    // === Phase 1: Precompute the clustering-independent likelihoods ===
    reporter.report(Progress::PhaseStart {
        name: "Precomputation",
    });
    let mut scorer = PosteriorScorer::new(config.sampler.alpha);
    if let Some(correlation) = &config.correlation {
        scorer.push(Box::new(CorrelationScorer::new(&table, correlation, reporter)));
    }
    if let Some(retention_time) = &config.retention_time {
        scorer.push(Box::new(RetentionTimeScorer::new(table.clone(), retention_time)));
    }
    if scorer.is_empty() {
        return Err(EngineError::Initialization(
            "no likelihood scorer is enabled".to_string(),
        ));
    }
    info!(scorers = ?scorer.scorer_names(), "Scorers ready.");
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Gibbs sampling ===
    let clusterer = PartitionClusterer::new(
        scorer,
        table.num_features(),
        config.sampler.initial_cluster_count,
    );
    let mut sampler = GibbsSampler::new(clusterer, config.sampler.clone());
    let mut co_clustering = config
        .sampler
        .track_co_clustering
        .then(|| CoClusteringHandler::new(table.num_features()));

    let outcome = {
        let mut all: Vec<&mut dyn SampleHandler<Clustering>> = handlers
            .iter_mut()
            .map(|h| &mut **h as &mut dyn SampleHandler<Clustering>)
            .collect();
        if let Some(handler) = co_clustering.as_mut() {
            all.push(handler);
        }
        sampler.run(&mut all, reporter)?
    };

    // === Phase 3: Organize results ===
    let best = outcome.best;
    let clusters = cluster_lists(&best);
    let representatives = clusters
        .iter()
        .map(|members| most_intense(&table, members))
        .collect();
    let result = ClusteringResult {
        assignments: best.snapshot(),
        clusters,
        representatives,
        score: outcome.best_score,
        sample_scores: sample_scores(&outcome.samples),
        co_clustering: co_clustering.map(|handler| handler.probabilities()),
    };

    info!(
        clusters = result.num_clusters(),
        score = result.score,
        "Clustering workflow complete."
    );
    Ok(result)
}

pub(crate) fn cluster_lists(partition: &Clustering) -> Vec<Vec<usize>> {
    (0..partition.num_clusters())
        .map(|k| {
            let mut members = partition.members(k).to_vec();
            members.sort_unstable();
            members
        })
        .collect()
}

pub(crate) fn sample_scores(samples: &[SampleRecord]) -> Vec<f64> {
    samples.iter().map(|s| s.score).collect()
}

/// The member with the highest mean intensity; the first member when none
/// has an intensity.
pub(crate) fn most_intense(table: &FeatureTable, members: &[usize]) -> usize {
    let mut best = members[0];
    let mut best_intensity = f64::NEG_INFINITY;
    for &f in members {
        if let Some(intensity) = table.average_intensity(f) {
            if intensity > best_intensity {
                best = f;
                best_intensity = intensity;
            }
        }
    }
    best
}
