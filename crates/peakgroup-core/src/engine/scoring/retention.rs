use super::PeakLikelihoodScorer;
use crate::core::models::feature::FeatureTable;
use crate::core::utils::stats::normal_density;
use crate::engine::config::RetentionTimeConfig;
use crate::engine::state::{ClusterState, Clustering};
use std::sync::Arc;

/// Normal-Normal conjugate model of retention times within a cluster.
///
/// Each replicate is scored independently: the cluster's posterior mean is
/// formed from the present retention times of the other members, and the
/// feature's own retention time is evaluated under the resulting predictive
/// density.
#[derive(Debug, Clone)]
pub struct RetentionTimeScorer {
    table: Arc<FeatureTable>,
    mu0: f64,
    kappa0: f64,
    kappa: f64,
}

impl RetentionTimeScorer {
    pub fn new(table: Arc<FeatureTable>, config: &RetentionTimeConfig) -> Self {
        let mu0 = table.mean_retention_time().unwrap_or(0.0);
        Self {
            table,
            mu0,
            kappa0: config.prior_kappa,
            kappa: 1.0 / (config.sd * config.sd),
        }
    }

    pub fn prior_mean(&self) -> f64 {
        self.mu0
    }

    /// Posterior precision and mean of every cluster plus the empty one,
    /// built from the replicate's present retention times excluding `skip`.
    fn posterior(&self, partition: &Clustering, rep: usize, skip: Option<usize>) -> (Vec<f64>, Vec<f64>) {
        let k_new = partition.num_clusters();
        let mut sums = vec![0.0; k_new + 1];
        let mut kappa_k = vec![self.kappa0; k_new + 1];
        for f in 0..partition.num_features() {
            if Some(f) == skip {
                continue;
            }
            if let Some(rt) = self.table.retention_time(rep, f) {
                let k = partition.cluster_of(f);
                sums[k] += rt;
                kappa_k[k] += self.kappa;
            }
        }
        let mu_k = sums
            .iter()
            .zip(&kappa_k)
            .map(|(sum, kk)| (self.kappa0 * self.mu0 + self.kappa * sum) / kk)
            .collect();
        (kappa_k, mu_k)
    }

    /// Posterior mean retention time of every cluster, pooling all replicates.
    pub fn cluster_means<S: ClusterState>(&self, state: &S) -> Vec<f64> {
        let partition = state.partition();
        let k = partition.num_clusters();
        let mut sums = vec![0.0; k];
        let mut kappa_k = vec![self.kappa0; k];
        for rep in 0..self.table.num_replicates() {
            for f in 0..partition.num_features() {
                if let Some(rt) = self.table.retention_time(rep, f) {
                    let c = partition.cluster_of(f);
                    sums[c] += rt;
                    kappa_k[c] += self.kappa;
                }
            }
        }
        sums.iter()
            .zip(&kappa_k)
            .map(|(sum, kk)| (self.kappa0 * self.mu0 + self.kappa * sum) / kk)
            .collect()
    }

    /// Posterior mean retention time of every cluster in one replicate.
    pub fn cluster_means_for_replicate<S: ClusterState>(&self, state: &S, rep: usize) -> Vec<f64> {
        let partition = state.partition();
        let (_, mut mu_k) = self.posterior(partition, rep, None);
        mu_k.truncate(partition.num_clusters());
        mu_k
    }
}

impl<S: ClusterState> PeakLikelihoodScorer<S> for RetentionTimeScorer {
    fn name(&self) -> &'static str {
        "retention-time"
    }

    fn accumulate(&self, state: &S, feature: usize, out: &mut [f64]) {
        let partition = state.partition();
        for rep in 0..self.table.num_replicates() {
            let Some(rt) = self.table.retention_time(rep, feature) else {
                continue;
            };
            let (kappa_k, mu_k) = self.posterior(partition, rep, Some(feature));
            for (k, value) in out.iter_mut().enumerate() {
                let kappa_w = 1.0 / (1.0 / self.kappa + 1.0 / kappa_k[k]);
                let like = normal_density(rt, mu_k[k], kappa_w, true);
                debug_assert!(like.is_finite(), "rt likelihood {like} for feature {feature}");
                *value += like;
            }
        }
    }
}
