use super::config::SamplerConfig;
use super::error::EngineError;
use super::handlers::SampleHandler;
use super::progress::{Progress, ProgressReporter};
use super::scoring::PosteriorScorer;
use super::state::{ClusterState, Clustering};
use super::utils::sampling::{normalise_log_distribution, sample_index};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

/// A model the Gibbs sampler can drive.
///
/// The sampler owns the loop and the random stream; the clusterer owns the
/// state representation and the likelihoods.
pub trait Clusterer {
    type State: ClusterState;

    fn initial_state(&self, rng: &mut ChaCha8Rng) -> Result<Self::State, EngineError>;

    /// Log-posterior of `feature` joining each of the `K` clusters or a new one.
    fn peak_log_posterior(&self, state: &Self::State, feature: usize) -> Vec<f64>;

    /// Moves `feature` into `cluster` (`K` opens a new cluster).
    fn assign(
        &self,
        state: &mut Self::State,
        feature: usize,
        cluster: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError>;

    fn after_sweep(
        &self,
        _state: &mut Self::State,
        _rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Score of a complete state, used to pick the best sample.
    fn score(&self, state: &Self::State) -> f64;
}

/// Summary of one retained sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub assignments: Vec<usize>,
    pub num_clusters: usize,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct SamplingOutcome<S> {
    pub best: S,
    pub best_score: f64,
    /// Index into `samples` of the best state, `None` when no sweep was run.
    pub best_index: Option<usize>,
    pub samples: Vec<SampleRecord>,
}

pub struct GibbsSampler<C: Clusterer> {
    clusterer: C,
    config: SamplerConfig,
    rng: ChaCha8Rng,
}

impl<C: Clusterer> GibbsSampler<C> {
    pub fn new(clusterer: C, config: SamplerConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            clusterer,
            config,
            rng,
        }
    }

    pub fn clusterer(&self) -> &C {
        &self.clusterer
    }

    pub fn initial_state(&mut self) -> Result<C::State, EngineError> {
        self.clusterer.initial_state(&mut self.rng)
    }

    /// One full Gibbs pass over every feature in random order, followed by the
    /// clusterer's post-sweep step. Returns the score of the resulting state.
    pub fn sweep(&mut self, state: &mut C::State) -> Result<f64, EngineError> {
        let n = state.partition().num_features();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);

        for feature in order {
            let posterior = self.clusterer.peak_log_posterior(state, feature);
            let partition = state.partition();
            let own = partition.cluster_of(feature);
            let excluded = (partition.cluster_size(own) == 1).then_some(own);
            let probabilities = normalise_log_distribution(&posterior, excluded)
                .map_err(EngineError::numerical("cluster assignment"))?;
            let selected = sample_index(&probabilities, &mut self.rng)
                .map_err(EngineError::numerical("cluster assignment"))?;
            trace!(feature, from = own, to = selected, "Sampled cluster");
            self.clusterer.assign(state, feature, selected, &mut self.rng)?;
            debug_assert!(state.partition().is_consistent());
        }

        self.clusterer.after_sweep(state, &mut self.rng)?;
        Ok(self.clusterer.score(state))
    }

    /// Burn-in followed by `num_samples` retained sweeps, each handed to every
    /// handler. The best state is the first one reaching the maximum score.
    pub fn run(
        &mut self,
        handlers: &mut [&mut dyn SampleHandler<C::State>],
        reporter: &ProgressReporter,
    ) -> Result<SamplingOutcome<C::State>, EngineError> {
        let mut state = self.initial_state()?;
        info!(
            features = state.partition().num_features(),
            clusters = state.partition().num_clusters(),
            "Initial clustering ready."
        );

        if self.config.num_samples == 0 {
            warn!("Number of samples is zero; returning the initial clustering without sampling.");
            let best_score = self.clusterer.score(&state);
            return Ok(SamplingOutcome {
                best: state,
                best_score,
                best_index: None,
                samples: Vec::new(),
            });
        }

        let burn_in = self.config.burn_in;
        reporter.phase("Burn-in", || -> Result<(), EngineError> {
            reporter.report(Progress::TaskStart {
                total_steps: burn_in as u64,
            });
            for i in 0..burn_in {
                let score = self.sweep(&mut state)?;
                let clusters = state.partition().num_clusters();
                debug!(sweep = i, clusters, score, "Burn-in sweep finished.");
                reporter.report(Progress::SweepFinished { clusters, score });
                reporter.report(Progress::TaskIncrement);
            }
            reporter.report(Progress::TaskFinish);
            Ok(())
        })?;

        let num_samples = self.config.num_samples;
        let mut samples = Vec::with_capacity(num_samples);
        let mut best: Option<(usize, f64, C::State)> = None;

        reporter.phase("Sampling", || -> Result<(), EngineError> {
            reporter.report(Progress::TaskStart {
                total_steps: num_samples as u64,
            });
            for i in 0..num_samples {
                let score = self.sweep(&mut state)?;
                for handler in handlers.iter_mut() {
                    handler.handle_sample(&state);
                }
                let partition = state.partition();
                let clusters = partition.num_clusters();
                debug!(sample = i, clusters, score, "Sample recorded.");
                samples.push(SampleRecord {
                    assignments: partition.snapshot(),
                    num_clusters: clusters,
                    score,
                });

                let improves = score.is_finite() && best.as_ref().is_none_or(|(_, s, _)| score > *s);
                if improves {
                    best = Some((i, score, state.clone()));
                }
                reporter.report(Progress::SweepFinished { clusters, score });
                reporter.report(Progress::TaskIncrement);
            }
            reporter.report(Progress::TaskFinish);
            Ok(())
        })?;

        let (best_index, best_score, best) = best.ok_or(EngineError::NoFiniteSample {
            samples: samples.len(),
        })?;
        info!(
            best_sample = best_index,
            score = best_score,
            clusters = best.partition().num_clusters(),
            "Sampling complete."
        );

        Ok(SamplingOutcome {
            best,
            best_score,
            best_index: Some(best_index),
            samples,
        })
    }
}

/// Partition-only clustering driven by correlation and retention-time scorers.
pub struct PartitionClusterer {
    scorer: PosteriorScorer<Clustering>,
    num_features: usize,
    initial_cluster_count: usize,
}

impl PartitionClusterer {
    pub fn new(
        scorer: PosteriorScorer<Clustering>,
        num_features: usize,
        initial_cluster_count: usize,
    ) -> Self {
        Self {
            scorer,
            num_features,
            initial_cluster_count,
        }
    }

    pub fn scorer(&self) -> &PosteriorScorer<Clustering> {
        &self.scorer
    }
}

impl Clusterer for PartitionClusterer {
    type State = Clustering;

    fn initial_state(&self, rng: &mut ChaCha8Rng) -> Result<Clustering, EngineError> {
        if self.num_features == 0 {
            return Err(EngineError::Initialization("no features to cluster".to_string()));
        }
        Ok(Clustering::random(self.num_features, self.initial_cluster_count, rng))
    }

    fn peak_log_posterior(&self, state: &Clustering, feature: usize) -> Vec<f64> {
        self.scorer.peak_log_posterior(state, feature)
    }

    fn assign(
        &self,
        state: &mut Clustering,
        feature: usize,
        cluster: usize,
        _rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError> {
        state.set_cluster(feature, cluster);
        Ok(())
    }

    fn score(&self, state: &Clustering) -> f64 {
        self.scorer.total_log_likelihood(state)
    }
}
