use super::PeakLikelihoodScorer;
use crate::core::models::feature::FeatureTable;
use crate::core::models::molecule::MoleculeCatalog;
use crate::core::utils::stats::{ONE_PPM, mass_precision, normal_density};
use crate::engine::cache::{CacheEntry, ScoringCache};
use crate::engine::config::MoleculeConfig;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::{ClusterState, MoleculeClustering};
use crate::engine::utils::sampling::{LogSumExp, SamplingError, sample_log_distribution};
use rand::Rng;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Log-likelihood of a feature placed on a theoretical peak its mass cannot
/// reach. Finite, but its `exp` underflows to exactly zero.
pub const IMPOSSIBLE_LOG_LIKELIHOOD: f64 = -1e100;

/// Theoretical peaks further than this many ppm from a feature are never cached.
const CANDIDATE_WINDOW_PPM: f64 = 100.0;
/// Ratio between the mode of the mass density and the uniform background, per molecule.
const PEAK_BASE_RATIO: f64 = 100.0;
const MIN_MASS_DENSITY: f64 = 1e-100;

/// Per-feature output of the precomputation, merged into the scorer's tables.
struct FeatureScores {
    replicate_rows: Vec<Vec<CacheEntry>>,
    background: Vec<Option<f64>>,
    background_sum: f64,
    usable_replicates: usize,
    flat_corrections: Vec<(usize, f64)>,
    new_cluster: f64,
}

/// Mass and intensity evidence tying features to theoretical spectra.
///
/// Mass log-densities of every feature against every theoretical peak within
/// the candidate window are cached once per replicate and summed over
/// replicates. Intensities follow a Normal-Normal model whose cluster mean is
/// scaled by each peak's relative abundance.
#[derive(Debug, Clone)]
pub struct MassIntensityScorer {
    table: Arc<FeatureTable>,
    catalog: Arc<MoleculeCatalog>,
    replicate_caches: Vec<ScoringCache>,
    mass_cache: ScoringCache,
    /// `[rep][feature]`, `None` where the feature has no usable observation.
    background: Vec<Vec<Option<f64>>>,
    background_sum: Vec<f64>,
    usable_replicates: Vec<usize>,
    /// Sparse additions to the flat likelihood of molecules with cached peaks,
    /// summed over the feature's usable replicates rather than kept per replicate.
    flat_corrections: Vec<Vec<(usize, f64)>>,
    new_cluster: Vec<f64>,
    base: f64,
    mu0: f64,
    kappa0: f64,
    kappa: f64,
}

impl MassIntensityScorer {
    #[instrument(skip_all, name = "mass_intensity_precomputation")]
    pub fn new(
        table: Arc<FeatureTable>,
        catalog: Arc<MoleculeCatalog>,
        config: &MoleculeConfig,
        reporter: &ProgressReporter,
    ) -> Self {
        let n = table.num_features();
        let num_molecules = catalog.len();
        let num_replicates = table.num_replicates();
        let precision = mass_precision(config.mass_precision_ppm);
        let uniform = (precision / (2.0 * PI)).sqrt() / (PEAK_BASE_RATIO * num_molecules as f64);
        let base = uniform.ln();
        let exp_base = base.exp();
        let window = CANDIDATE_WINDOW_PPM * ONE_PPM;
        let log_cutoff = MIN_MASS_DENSITY.ln();
        let mu0 = config
            .intensity_prior_mean
            .or_else(|| table.mean_intensity())
            .unwrap_or(0.0);
        let kappa0 = config.intensity_prior_kappa;
        let kappa = config.intensity_kappa;
        let prior_precision = 1.0 / (1.0 / kappa + 1.0 / kappa0);

        let components: Vec<f64> = catalog
            .molecules()
            .iter()
            .map(|m| (m.len() + 1) as f64)
            .collect();
        let empty_average_sum: f64 = components.iter().map(|c| exp_base / c).sum();

        reporter.report(Progress::TaskStart {
            total_steps: n as u64,
        });

        let score_feature = |f: usize| -> FeatureScores {
            let polarity = table.polarity(f);
            let mut replicate_rows = Vec::with_capacity(num_replicates);
            let mut background = vec![None; num_replicates];
            let mut background_sum = 0.0;
            let mut usable_replicates = 0;
            let mut corrections: Vec<(usize, f64)> = Vec::new();
            let mut new_cluster = 0.0;

            for (rep, slot) in background.iter_mut().enumerate() {
                let (Some(log_mass), Some(intensity)) = (table.log_mass(rep, f), table.intensity(rep, f)) else {
                    replicate_rows.push(Vec::new());
                    continue;
                };
                let prior = normal_density(intensity, mu0, prior_precision, true);
                *slot = Some(prior + base);
                background_sum += prior + base;
                usable_replicates += 1;

                let mut row: Vec<CacheEntry> = catalog
                    .positions_within(log_mass, polarity, window)
                    .filter_map(|(molecule, position)| {
                        let theoretical = catalog.molecule(molecule).log_mass(position)?;
                        let value = normal_density(log_mass, theoretical, precision, true);
                        (value >= log_cutoff).then_some(CacheEntry {
                            molecule,
                            position,
                            value,
                        })
                    })
                    .collect();
                row.sort_by_key(|e| (e.molecule, e.position));

                let mut explained_average_sum = 0.0;
                for entries in row.chunk_by(|a, b| a.molecule == b.molecule) {
                    let molecule = entries[0].molecule;
                    let subtotal: f64 = entries.iter().map(|e| e.value.exp()).sum();
                    explained_average_sum += subtotal / components[molecule];
                    let correction = (subtotal + exp_base).ln() - base;
                    match corrections.binary_search_by_key(&molecule, |&(m, _)| m) {
                        Ok(i) => corrections[i].1 += correction,
                        Err(i) => corrections.insert(i, (molecule, correction)),
                    }
                }
                let average = (empty_average_sum + explained_average_sum) / num_molecules as f64;
                new_cluster += prior + average.ln();
                replicate_rows.push(row);
            }
            reporter.report(Progress::TaskIncrement);

            FeatureScores {
                replicate_rows,
                background,
                background_sum,
                usable_replicates,
                flat_corrections: corrections,
                new_cluster,
            }
        };

        #[cfg(not(feature = "parallel"))]
        let scores: Vec<FeatureScores> = (0..n).map(score_feature).collect();

        #[cfg(feature = "parallel")]
        let scores: Vec<FeatureScores> = (0..n).into_par_iter().map(score_feature).collect();

        reporter.report(Progress::TaskFinish);

        let mut replicate_caches = vec![ScoringCache::new(n); num_replicates];
        let mut mass_cache = ScoringCache::new(n);
        let mut background = vec![vec![None; n]; num_replicates];
        let mut background_sum = Vec::with_capacity(n);
        let mut usable_replicates = Vec::with_capacity(n);
        let mut flat_corrections = Vec::with_capacity(n);
        let mut new_cluster = Vec::with_capacity(n);

        for (f, scores) in scores.into_iter().enumerate() {
            for (rep, row) in scores.replicate_rows.into_iter().enumerate() {
                for entry in &row {
                    mass_cache.add(f, entry.molecule, entry.position, entry.value);
                }
                replicate_caches[rep].set_row(f, row);
            }
            for (rep, value) in scores.background.into_iter().enumerate() {
                background[rep][f] = value;
            }
            background_sum.push(scores.background_sum);
            usable_replicates.push(scores.usable_replicates);
            flat_corrections.push(scores.flat_corrections);
            new_cluster.push(scores.new_cluster);
        }

        debug!(
            features = n,
            molecules = num_molecules,
            cached = mass_cache.len(),
            "Precomputed mass likelihoods"
        );

        Self {
            table,
            catalog,
            replicate_caches,
            mass_cache,
            background,
            background_sum,
            usable_replicates,
            flat_corrections,
            new_cluster,
            base,
            mu0,
            kappa0,
            kappa,
        }
    }

    pub fn table(&self) -> &FeatureTable {
        &self.table
    }

    pub fn catalog(&self) -> &MoleculeCatalog {
        &self.catalog
    }

    /// Log-likelihood of an unexplained peak per unit log-mass.
    pub fn base_likelihood(&self) -> f64 {
        self.base
    }

    pub fn intensity_prior_mean(&self) -> f64 {
        self.mu0
    }

    pub fn mass_cache(&self) -> &ScoringCache {
        &self.mass_cache
    }

    pub fn replicate_cache(&self, rep: usize) -> &ScoringCache {
        &self.replicate_caches[rep]
    }

    pub fn background_sum(&self, feature: usize) -> f64 {
        self.background_sum[feature]
    }

    pub fn new_cluster_likelihood(&self, feature: usize) -> f64 {
        self.new_cluster[feature]
    }

    fn components(&self, molecule: usize) -> f64 {
        (self.catalog.molecule(molecule).len() + 1) as f64
    }

    fn prior_intensity_likelihood(&self, intensity: f64) -> f64 {
        normal_density(intensity, self.mu0, 1.0 / (1.0 / self.kappa + 1.0 / self.kappa0), true)
    }

    /// Predictive log-density of the feature's intensity in `rep` when placed
    /// on `position` of `molecule`, given the peers already placed on the same
    /// adduct. `peers` yields `(feature, position)` and may contain `feature`.
    pub fn intensity_likelihood<I>(
        &self,
        molecule: usize,
        rep: usize,
        feature: usize,
        position: usize,
        peers: I,
    ) -> f64
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let Some(intensity) = self.table.intensity(rep, feature) else {
            return 0.0;
        };
        let spectrum = self.catalog.molecule(molecule);
        let (Some(adduct), Some(beta)) = (spectrum.adduct_of(position), spectrum.relative_intensity(position)) else {
            return self.prior_intensity_likelihood(intensity);
        };

        let mut beta_squares = 0.0;
        let mut weighted = 0.0;
        for (peer, peer_position) in peers {
            if peer == feature || spectrum.adduct_of(peer_position) != Some(adduct) {
                continue;
            }
            let (Some(peer_intensity), Some(peer_beta)) = (
                self.table.intensity(rep, peer),
                spectrum.relative_intensity(peer_position),
            ) else {
                continue;
            };
            beta_squares += peer_beta * peer_beta;
            weighted += peer_intensity * peer_beta;
        }
        let kappa_k = self.kappa0 + self.kappa * beta_squares;
        let mu_k = (self.kappa0 * self.mu0 + self.kappa * weighted) / kappa_k;
        let mu_w = beta * mu_k;
        let kappa_w = 1.0 / (1.0 / self.kappa + beta * beta / kappa_k);
        normal_density(intensity, mu_w, kappa_w, true)
    }

    /// Mass log-likelihood of the feature in one replicate on `position`.
    /// Replicates without a usable observation contribute nothing.
    pub fn mass_likelihood(&self, molecule: usize, rep: usize, feature: usize, position: usize) -> f64 {
        if self.background[rep][feature].is_none() {
            return 0.0;
        }
        if position == self.catalog.default_position() {
            return self.base;
        }
        self.replicate_caches[rep]
            .get(feature, molecule, position)
            .unwrap_or(IMPOSSIBLE_LOG_LIKELIHOOD)
    }

    /// Unnormalised log-weight with which [`Self::sample_position`] draws
    /// `position` of `molecule` for the feature. The sentinel weighs the
    /// feature's background, cached positions their summed mass likelihood.
    pub fn position_proposal_weight(&self, feature: usize, molecule: usize, position: usize) -> f64 {
        if position == self.catalog.default_position() {
            return self.background_sum[feature];
        }
        self.mass_cache
            .get(feature, molecule, position)
            .unwrap_or(IMPOSSIBLE_LOG_LIKELIHOOD)
    }

    /// Flat (cluster-independent) log-likelihood of the feature under `molecule`.
    pub fn flat_log_likelihood(&self, feature: usize, molecule: usize) -> f64 {
        let unexplained = self.usable_replicates[feature] as f64 * (self.base - self.components(molecule).ln());
        let correction = self.flat_corrections[feature]
            .binary_search_by_key(&molecule, |&(m, _)| m)
            .map_or(0.0, |i| self.flat_corrections[feature][i].1);
        unexplained + correction
    }

    /// Adds the feature's flat log-likelihood of every molecule to `out`.
    pub fn add_flat_log_likelihoods(&self, feature: usize, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.catalog.len());
        let usable = self.usable_replicates[feature] as f64;
        for (molecule, value) in out.iter_mut().enumerate() {
            *value += usable * (self.base - self.components(molecule).ln());
        }
        for &(molecule, correction) in &self.flat_corrections[feature] {
            out[molecule] += correction;
        }
    }

    /// Draws a position of `molecule` for the feature from its summed mass
    /// likelihoods, the sentinel weighted by the feature's background.
    /// Returns the position and its unnormalised log-weight.
    pub fn sample_position(
        &self,
        feature: usize,
        molecule: usize,
        rng: &mut impl Rng,
    ) -> Result<(usize, f64), SamplingError> {
        let sentinel = self.catalog.default_position();
        let candidates: Vec<usize> = self
            .mass_cache
            .positions(feature, molecule)
            .iter()
            .map(|e| e.position)
            .chain(std::iter::once(sentinel))
            .collect();
        let log_values: Vec<f64> = candidates
            .iter()
            .map(|&position| self.position_proposal_weight(feature, molecule, position))
            .collect();
        let (index, value) = sample_log_distribution(&log_values, rng)?;
        Ok((candidates[index], value))
    }

    /// Draws a molecule for a feature opening a new cluster.
    pub fn pick_molecule(&self, feature: usize, rng: &mut impl Rng) -> Result<usize, SamplingError> {
        let mut log_values = vec![0.0; self.catalog.len()];
        self.add_flat_log_likelihoods(feature, &mut log_values);
        sample_log_distribution(&log_values, rng).map(|(molecule, _)| molecule)
    }
}

impl PeakLikelihoodScorer<MoleculeClustering> for MassIntensityScorer {
    fn name(&self) -> &'static str {
        "mass-intensity"
    }

    fn accumulate(&self, state: &MoleculeClustering, feature: usize, out: &mut [f64]) {
        let partition = state.partition();
        let k_new = partition.num_clusters();

        for (rep, background) in self.background.iter().enumerate() {
            let Some(background) = background[feature] else {
                continue;
            };
            let mut sums = vec![LogSumExp::new(); k_new];
            for sum in sums.iter_mut() {
                sum.add(background);
            }
            for entry in self.replicate_caches[rep].non_zeros(feature) {
                for &k in state.clusters_for_molecule(entry.molecule) {
                    let peers = partition
                        .members(k)
                        .iter()
                        .map(|&p| (p, state.position_of(p)));
                    let intensity =
                        self.intensity_likelihood(entry.molecule, rep, feature, entry.position, peers);
                    sums[k].add(entry.value + intensity);
                }
            }
            for (k, sum) in sums.iter().enumerate() {
                let value = sum.value() - self.components(state.molecule_of(k)).ln();
                debug_assert!(value.is_finite(), "mass likelihood {value} for cluster {k}");
                out[k] += value;
            }
        }
        out[k_new] += self.new_cluster[feature];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::feature::{FeatureTableBuilder, Observation, Polarity};
    use crate::core::models::molecule::CatalogRow;
    use crate::engine::state::Clustering;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const TOLERANCE: f64 = 1e-9;

    fn row(molecule: &str, mz: f64, intensity: f64) -> CatalogRow {
        CatalogRow {
            molecule: molecule.to_string(),
            formula: molecule.to_string(),
            adduct: "M+H".to_string(),
            mz,
            relative_intensity: intensity,
            polarity: Polarity::Positive,
            retention_time: None,
        }
    }

    fn setup() -> (Arc<FeatureTable>, Arc<MoleculeCatalog>, MoleculeConfig) {
        let config = MoleculeConfig::default();
        let catalog = MoleculeCatalog::from_rows(
            vec![
                row("glucose", 181.0707, 1.0),
                row("glucose", 182.0741, 0.07),
                row("alanine", 90.0550, 1.0),
            ],
            &config.spectrum_limits(),
        )
        .unwrap();

        let mut builder = FeatureTableBuilder::new(2);
        let obs = |mz: f64, intensity: f64| Some(Observation::new(mz).with_intensity(intensity));
        builder
            .add_feature("g0", Polarity::Positive, vec![obs(181.0708, 1e6), obs(181.0706, 1.1e6)])
            .unwrap();
        builder
            .add_feature("g1", Polarity::Positive, vec![obs(182.0740, 7e4), None])
            .unwrap();
        builder
            .add_feature("lost", Polarity::Positive, vec![obs(300.0, 5e5), obs(300.0, 5e5)])
            .unwrap();
        (
            Arc::new(builder.build().unwrap()),
            Arc::new(catalog),
            config,
        )
    }

    fn scorer() -> MassIntensityScorer {
        let (table, catalog, config) = setup();
        MassIntensityScorer::new(table, catalog, &config, &ProgressReporter::new())
    }

    #[test]
    fn mass_cache_sums_replicate_caches() {
        let scorer = scorer();
        let glucose = scorer.catalog().index_of("glucose").unwrap();
        let total = scorer.mass_cache().get(0, glucose, 0).unwrap();
        let parts = scorer.replicate_cache(0).get(0, glucose, 0).unwrap()
            + scorer.replicate_cache(1).get(0, glucose, 0).unwrap();
        assert!((total - parts).abs() < TOLERANCE);
        assert!(scorer.mass_cache().get(0, glucose, 1).is_none());
        assert_eq!(scorer.mass_cache().row_len(2), 0);
    }

    #[test]
    fn mass_likelihood_distinguishes_sentinel_and_pruned_positions() {
        let scorer = scorer();
        let glucose = scorer.catalog().index_of("glucose").unwrap();
        let sentinel = scorer.catalog().default_position();

        assert_eq!(scorer.mass_likelihood(glucose, 0, 0, sentinel), scorer.base_likelihood());
        assert_eq!(scorer.mass_likelihood(glucose, 0, 0, 1), IMPOSSIBLE_LOG_LIKELIHOOD);
        assert_eq!(IMPOSSIBLE_LOG_LIKELIHOOD.exp(), 0.0);
        assert!(scorer.mass_likelihood(glucose, 0, 0, 0) > scorer.base_likelihood());
    }

    #[test]
    fn flat_likelihood_prefers_the_matching_molecule() {
        let scorer = scorer();
        let glucose = scorer.catalog().index_of("glucose").unwrap();
        let alanine = scorer.catalog().index_of("alanine").unwrap();
        assert!(scorer.flat_log_likelihood(0, glucose) > scorer.flat_log_likelihood(0, alanine));

        // An unexplained feature scores every molecule by its size only.
        let expected = 2.0 * (scorer.base_likelihood() - 2.0_f64.ln());
        assert!((scorer.flat_log_likelihood(2, alanine) - expected).abs() < TOLERANCE);

        let mut dense = vec![0.0; scorer.catalog().len()];
        scorer.add_flat_log_likelihoods(0, &mut dense);
        assert!((dense[glucose] - scorer.flat_log_likelihood(0, glucose)).abs() < TOLERANCE);
    }

    #[test]
    fn flat_corrections_add_up_over_usable_replicates() {
        let scorer = scorer();
        let glucose = scorer.catalog().index_of("glucose").unwrap();
        let base = scorer.base_likelihood();
        let log_add = |a: f64, b: f64| a.max(b) + (-(a - b).abs()).exp().ln_1p();

        // Features 0 and 2 both have two usable replicates; only feature 0 has
        // cached glucose peaks, so the difference is its correction alone.
        let expected: f64 = (0..2)
            .map(|rep| {
                let value = scorer.replicate_cache(rep).get(0, glucose, 0).unwrap();
                log_add(value, base) - base
            })
            .sum();
        let correction = scorer.flat_log_likelihood(0, glucose) - scorer.flat_log_likelihood(2, glucose);
        assert!((correction - expected).abs() < 1e-6);
    }

    #[test]
    fn unexplained_feature_always_samples_the_sentinel() {
        let scorer = scorer();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let sentinel = scorer.catalog().default_position();
        for molecule in 0..scorer.catalog().len() {
            for _ in 0..20 {
                let (position, value) = scorer.sample_position(2, molecule, &mut rng).unwrap();
                assert_eq!(position, sentinel);
                assert!((value - scorer.background_sum(2)).abs() < TOLERANCE);
            }
        }
    }

    #[test]
    fn proposal_weights_match_the_values_drawn_by_sample_position() {
        let scorer = scorer();
        let glucose = scorer.catalog().index_of("glucose").unwrap();
        let sentinel = scorer.catalog().default_position();

        assert_eq!(scorer.position_proposal_weight(0, glucose, sentinel), scorer.background_sum(0));
        assert_ne!(scorer.position_proposal_weight(0, glucose, sentinel), scorer.base_likelihood());
        assert_eq!(
            scorer.position_proposal_weight(0, glucose, 0),
            scorer.mass_cache().get(0, glucose, 0).unwrap()
        );
        assert_eq!(scorer.position_proposal_weight(0, glucose, 1), IMPOSSIBLE_LOG_LIKELIHOOD);

        let mut rng = ChaCha8Rng::seed_from_u64(13);
        for _ in 0..50 {
            let (position, value) = scorer.sample_position(0, glucose, &mut rng).unwrap();
            assert_eq!(value, scorer.position_proposal_weight(0, glucose, position));
        }
    }

    #[test]
    fn intensity_likelihood_ignores_peers_of_other_adducts_and_self() {
        let scorer = scorer();
        let glucose = scorer.catalog().index_of("glucose").unwrap();
        let sentinel = scorer.catalog().default_position();
        let alone = scorer.intensity_likelihood(glucose, 0, 1, 1, std::iter::empty());
        let with_self = scorer.intensity_likelihood(glucose, 0, 1, 1, [(1, 1)]);
        let with_sentinel_peer = scorer.intensity_likelihood(glucose, 0, 1, 1, [(0, sentinel)]);
        assert!((alone - with_self).abs() < TOLERANCE);
        assert!((alone - with_sentinel_peer).abs() < TOLERANCE);

        let with_peer = scorer.intensity_likelihood(glucose, 0, 1, 1, [(0, 0)]);
        assert!(with_peer > alone);
    }

    #[test]
    fn peak_likelihood_favours_the_explaining_cluster() {
        let scorer = scorer();
        let glucose = scorer.catalog().index_of("glucose").unwrap();
        let alanine = scorer.catalog().index_of("alanine").unwrap();
        let sentinel = scorer.catalog().default_position();
        let state = MoleculeClustering::new(
            Clustering::from_assignments(&[0, 1, 2]),
            vec![glucose, alanine, alanine],
            vec![0, sentinel, sentinel],
            scorer.catalog().len(),
        );

        let like = scorer.peak_likelihood(&state, 1);
        assert_eq!(like.len(), 4);
        assert!(like[0] > like[1]);
        assert!((like[3] - scorer.new_cluster_likelihood(1)).abs() < TOLERANCE);
        // Clusters of the same molecule without cached peaks score identically.
        assert!((like[1] - like[2]).abs() < TOLERANCE);
    }
}
