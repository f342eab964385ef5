use super::PeakLikelihoodScorer;
use crate::core::models::feature::FeatureTable;
use crate::engine::config::CorrelationConfig;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::ClusterState;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Pairwise shape-correlation evidence, precomputed once per run.
///
/// For every pair the sparse matrix stores the summed `same - different`
/// log-odds over the replicates in which the pair is inside the retention-time
/// window. `base[f]` holds the "different cluster" log-likelihood of `f`
/// against every other feature, so scoring a cluster only has to add the
/// log-odds of its members.
#[derive(Debug, Clone)]
pub struct CorrelationScorer {
    neighbours: Vec<Vec<(usize, f64)>>,
    base: Vec<f64>,
    default: f64,
}

struct PairRow {
    neighbours: Vec<(usize, f64)>,
    diffs: Vec<(usize, f64)>,
}

impl CorrelationScorer {
    #[instrument(skip_all, name = "correlation_precomputation")]
    pub fn new(table: &FeatureTable, config: &CorrelationConfig, reporter: &ProgressReporter) -> Self {
        let n = table.num_features();
        let num_replicates = table.num_replicates();
        let ln_p0 = config.p0.ln();
        let ln_p1 = config.p1.ln();
        let out_of_window_odds = ln_p1 - ln_p0;
        let range = config.measure.range();
        let in_constant = config.in_model.constant_term(config.p1);
        let out_constant = config.out_model.constant_term(config.p0);

        reporter.report(Progress::TaskStart {
            total_steps: n as u64,
        });

        let compute_row = |i: usize| -> PairRow {
            let mut neighbours = Vec::new();
            let mut diffs = Vec::with_capacity(n.saturating_sub(i + 1));
            for j in (i + 1)..n {
                let mut odds = 0.0;
                let mut missed_odds = 0.0;
                let mut diff_total = 0.0;
                let mut in_window = false;
                for rep in 0..num_replicates {
                    let close = match (table.retention_time(rep, i), table.retention_time(rep, j)) {
                        (Some(a), Some(b)) => (a - b).abs() < config.rt_window,
                        _ => false,
                    };
                    if close {
                        let c = match (table.signal(rep, i), table.signal(rep, j)) {
                            (Some(a), Some(b)) => config.measure.correlation(a, b),
                            _ => 0.0,
                        };
                        let same = in_constant + config.in_model.correlation_term(c, range);
                        let diff = out_constant + config.out_model.correlation_term(c, range);
                        odds += same - diff;
                        diff_total += diff;
                        in_window = true;
                    } else {
                        missed_odds += out_of_window_odds;
                        diff_total += ln_p0;
                    }
                }
                if in_window {
                    if config.count_out_of_window_replicates {
                        odds += missed_odds;
                    }
                    neighbours.push((j, odds));
                }
                diffs.push((j, diff_total));
            }
            reporter.report(Progress::TaskIncrement);
            PairRow { neighbours, diffs }
        };

        #[cfg(not(feature = "parallel"))]
        let rows: Vec<PairRow> = (0..n).map(compute_row).collect();

        #[cfg(feature = "parallel")]
        let rows: Vec<PairRow> = (0..n).into_par_iter().map(compute_row).collect();

        reporter.report(Progress::TaskFinish);

        let mut neighbours: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut base = vec![0.0; n];
        for (i, row) in rows.into_iter().enumerate() {
            for (j, diff) in row.diffs {
                base[i] += diff;
                base[j] += diff;
            }
            for (j, odds) in row.neighbours {
                neighbours[i].push((j, odds));
                neighbours[j].push((i, odds));
            }
        }
        for row in neighbours.iter_mut() {
            row.sort_by_key(|&(j, _)| j);
        }

        let pairs: usize = neighbours.iter().map(Vec::len).sum::<usize>() / 2;
        debug!(features = n, pairs, "Precomputed correlation log-odds");

        Self {
            neighbours,
            base,
            default: num_replicates as f64 * out_of_window_odds,
        }
    }

    /// Stored `(other feature, log-odds)` pairs of a feature.
    pub fn neighbours(&self, feature: usize) -> &[(usize, f64)] {
        &self.neighbours[feature]
    }

    pub fn base(&self, feature: usize) -> f64 {
        self.base[feature]
    }

    /// Log-odds of a same-cluster pair that never shares the window.
    pub fn default_odds(&self) -> f64 {
        self.default
    }
}

impl<S: ClusterState> PeakLikelihoodScorer<S> for CorrelationScorer {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn accumulate(&self, state: &S, feature: usize, out: &mut [f64]) {
        let partition = state.partition();
        let k_new = partition.num_clusters();
        debug_assert_eq!(out.len(), k_new + 1);

        let base = self.base[feature];
        for v in out.iter_mut() {
            *v += base;
        }

        let mut remaining: Vec<i64> = partition.cluster_sizes().into_iter().map(|s| s as i64).collect();
        for &(other, odds) in &self.neighbours[feature] {
            let k = partition.cluster_of(other);
            out[k] += odds;
            remaining[k] -= 1;
        }
        remaining[partition.cluster_of(feature)] -= 1;

        for (k, &count) in remaining.iter().enumerate() {
            debug_assert!(count >= 0);
            out[k] += count as f64 * self.default;
        }
    }
}
