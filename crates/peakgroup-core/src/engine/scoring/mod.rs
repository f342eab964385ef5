//! Likelihood scorers consulted by the Gibbs sampler.
//!
//! A scorer answers one question: given the current state and a feature, how
//! likely is the feature under each existing cluster and under a brand-new
//! one? Answers are `K + 1` log-likelihood vectors that the
//! [`PosteriorScorer`] sums and turns into a log-posterior by adding the
//! Dirichlet-process prior.

use crate::engine::state::ClusterState;
use std::sync::Arc;

pub mod correlation;
pub mod mass_intensity;
pub mod noise;
pub mod retention;

pub use correlation::CorrelationScorer;
pub use mass_intensity::MassIntensityScorer;
pub use retention::RetentionTimeScorer;

pub trait PeakLikelihoodScorer<S: ClusterState> {
    fn name(&self) -> &'static str;

    /// Adds this scorer's log-likelihoods to `out`, which has length `K + 1`.
    fn accumulate(&self, state: &S, feature: usize, out: &mut [f64]);

    fn peak_likelihood(&self, state: &S, feature: usize) -> Vec<f64> {
        let mut out = vec![0.0; state.partition().num_clusters() + 1];
        self.accumulate(state, feature, &mut out);
        out
    }
}

impl<S: ClusterState, T: PeakLikelihoodScorer<S> + ?Sized> PeakLikelihoodScorer<S> for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn accumulate(&self, state: &S, feature: usize, out: &mut [f64]) {
        (**self).accumulate(state, feature, out)
    }
}

pub type BoxedScorer<S> = Box<dyn PeakLikelihoodScorer<S> + Send + Sync>;

/// Sums a set of scorers and applies the Chinese-restaurant prior.
pub struct PosteriorScorer<S: ClusterState> {
    scorers: Vec<BoxedScorer<S>>,
    alpha: f64,
}

impl<S: ClusterState> PosteriorScorer<S> {
    pub fn new(alpha: f64) -> Self {
        Self {
            scorers: Vec::new(),
            alpha,
        }
    }

    pub fn with_scorer(mut self, scorer: BoxedScorer<S>) -> Self {
        self.scorers.push(scorer);
        self
    }

    pub fn push(&mut self, scorer: BoxedScorer<S>) {
        self.scorers.push(scorer);
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    pub fn scorer_names(&self) -> Vec<&'static str> {
        self.scorers.iter().map(|s| s.name()).collect()
    }

    pub fn peak_likelihood(&self, state: &S, feature: usize) -> Vec<f64> {
        let mut out = vec![0.0; state.partition().num_clusters() + 1];
        for scorer in &self.scorers {
            scorer.accumulate(state, feature, &mut out);
        }
        out
    }

    /// Likelihood plus `ln n_k` for existing clusters and `ln alpha` for the
    /// new-cluster column.
    pub fn peak_log_posterior(&self, state: &S, feature: usize) -> Vec<f64> {
        let mut out = self.peak_likelihood(state, feature);
        let partition = state.partition();
        let k_new = partition.num_clusters();
        for (k, value) in out.iter_mut().enumerate().take(k_new) {
            *value += (partition.cluster_size(k) as f64).ln();
        }
        out[k_new] += self.alpha.ln();
        out
    }

    /// Sum over features of the likelihood of each feature's own cluster.
    pub fn total_log_likelihood(&self, state: &S) -> f64 {
        let partition = state.partition();
        (0..partition.num_features())
            .map(|f| self.peak_likelihood(state, f)[partition.cluster_of(f)])
            .sum()
    }
}
