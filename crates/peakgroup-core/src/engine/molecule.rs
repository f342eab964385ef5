use super::config::MoleculeConfig;
use super::error::EngineError;
use super::sampler::Clusterer;
use super::scoring::{CorrelationScorer, MassIntensityScorer, PosteriorScorer, RetentionTimeScorer};
use super::state::{ClusterState, Clustering, MoleculeClustering};
use super::utils::sampling::sample_log_distribution;
use crate::core::models::molecule::ConnectivityNetwork;
use crate::core::utils::stats::normal_density;
use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Pseudo-count of the connectivity-network prior.
const NETWORK_DELTA: f64 = 1.0;

/// How the sampler's starting state is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialClustering {
    /// Every feature alone, explained by the molecule with the closest peak.
    SinglePeak,
    /// Features whose closest peak belongs to the same molecule start together.
    Pregrouped,
    /// Random labels and molecules, every feature on the sentinel position.
    Fixed { clusters: usize },
}

/// Post-sweep move that revisits each cluster's molecule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoleculeStep {
    MetropolisHastings,
    GibbsPositions,
    RetentionTime,
    None,
}

/// `exp(min(0, q_c - q_p + post_p - post_c))`: probability of accepting a
/// proposed molecule given the proposal densities and log-posteriors.
pub fn metropolis_acceptance(
    current_proposal: f64,
    proposed_proposal: f64,
    proposed_posterior: f64,
    current_posterior: f64,
) -> f64 {
    let log_ratio = current_proposal - proposed_proposal + proposed_posterior - current_posterior;
    log_ratio.min(0.0).exp()
}

/// Formula-aware clusterer: every cluster carries a molecule, every feature a
/// position in that molecule's theoretical spectrum.
pub struct MoleculeClusterer {
    posterior: PosteriorScorer<MoleculeClustering>,
    mass: Arc<MassIntensityScorer>,
    retention: Option<Arc<RetentionTimeScorer>>,
    network: Option<Arc<ConnectivityNetwork>>,
    config: MoleculeConfig,
    rt_prediction_precision: f64,
}

impl MoleculeClusterer {
    pub fn new(mass: Arc<MassIntensityScorer>, config: MoleculeConfig, alpha: f64) -> Self {
        let posterior = PosteriorScorer::new(alpha).with_scorer(Box::new(mass.clone()));
        let sd = config.retention_time_prediction_sd;
        Self {
            posterior,
            mass,
            retention: None,
            network: None,
            config,
            rt_prediction_precision: 1.0 / (sd * sd),
        }
    }

    pub fn with_correlation(mut self, correlation: Arc<CorrelationScorer>) -> Self {
        self.posterior.push(Box::new(correlation));
        self
    }

    pub fn with_retention_time(mut self, retention: Arc<RetentionTimeScorer>) -> Self {
        self.posterior.push(Box::new(retention.clone()));
        self.retention = Some(retention);
        self
    }

    pub fn with_network(mut self, network: Arc<ConnectivityNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn scorer(&self) -> &PosteriorScorer<MoleculeClustering> {
        &self.posterior
    }

    pub fn mass_scorer(&self) -> &MassIntensityScorer {
        &self.mass
    }

    fn retention_scorer(&self) -> Result<&RetentionTimeScorer, EngineError> {
        self.retention.as_deref().ok_or_else(|| {
            EngineError::Internal(
                "retention-time scorer required by the molecule step is missing".to_string(),
            )
        })
    }

    /// Closest theoretical peak of the feature, if it lies within the mass
    /// tolerance of some replicate.
    fn nearest_explanation(&self, feature: usize) -> Option<(usize, usize)> {
        let table = self.mass.table();
        let log_mass = table.average_mz(feature).ln();
        let (molecule, position) = self
            .mass
            .catalog()
            .nearest_position(log_mass, table.polarity(feature))?;
        self.mass
            .mass_cache()
            .get(feature, molecule, position)
            .map(|_| (molecule, position))
    }

    /// Nearest explanation of the feature, or a molecule drawn from its flat
    /// likelihoods on the sentinel position.
    fn starting_explanation(
        &self,
        feature: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<(usize, usize), EngineError> {
        if let Some(explanation) = self.nearest_explanation(feature) {
            return Ok(explanation);
        }
        let molecule = self
            .mass
            .pick_molecule(feature, rng)
            .map_err(EngineError::numerical("initial molecule"))?;
        Ok((molecule, self.mass.catalog().default_position()))
    }

    fn single_peak_state(&self, rng: &mut ChaCha8Rng) -> Result<MoleculeClustering, EngineError> {
        let n = self.mass.table().num_features();
        let mut molecules = Vec::with_capacity(n);
        let mut positions = Vec::with_capacity(n);
        for f in 0..n {
            let (molecule, position) = self.starting_explanation(f, rng)?;
            molecules.push(molecule);
            positions.push(position);
        }
        let labels: Vec<usize> = (0..n).collect();
        Ok(MoleculeClustering::new(
            Clustering::from_assignments(&labels),
            molecules,
            positions,
            self.mass.catalog().len(),
        ))
    }

    fn pregrouped_state(&self, rng: &mut ChaCha8Rng) -> Result<MoleculeClustering, EngineError> {
        let n = self.mass.table().num_features();
        let mut labels = Vec::with_capacity(n);
        let mut positions = Vec::with_capacity(n);
        let mut cluster_molecule = Vec::new();
        let mut by_molecule: HashMap<usize, usize> = HashMap::new();

        for f in 0..n {
            let label = match self.nearest_explanation(f) {
                Some((molecule, position)) => {
                    positions.push(position);
                    *by_molecule.entry(molecule).or_insert_with(|| {
                        cluster_molecule.push(molecule);
                        cluster_molecule.len() - 1
                    })
                }
                // Unexplained features open their own clusters.
                None => {
                    let (molecule, position) = self.starting_explanation(f, rng)?;
                    positions.push(position);
                    cluster_molecule.push(molecule);
                    cluster_molecule.len() - 1
                }
            };
            labels.push(label);
        }
        // Labels are dense and in creation order, so compaction keeps them.
        Ok(MoleculeClustering::new(
            Clustering::from_assignments(&labels),
            cluster_molecule,
            positions,
            self.mass.catalog().len(),
        ))
    }

    fn fixed_state(&self, clusters: usize, rng: &mut ChaCha8Rng) -> MoleculeClustering {
        let n = self.mass.table().num_features();
        let num_molecules = self.mass.catalog().len();
        let partition = Clustering::random(n, clusters, rng);
        let molecules = (0..partition.num_clusters())
            .map(|_| rng.gen_range(0..num_molecules))
            .collect();
        let positions = vec![self.mass.catalog().default_position(); n];
        MoleculeClustering::new(partition, molecules, positions, num_molecules)
    }

    /// Log-posterior of explaining cluster `k`'s members with `molecule` at
    /// `positions`. Members are scored from last to first, each against the
    /// members before it.
    fn cluster_log_posterior(
        &self,
        molecule: usize,
        members: &[usize],
        positions: &[usize],
        cluster_means: Option<&[f64]>,
        k: usize,
    ) -> f64 {
        let num_replicates = self.mass.table().num_replicates();
        let mut sum = 0.0;
        for i in (0..members.len()).rev() {
            let (feature, position) = (members[i], positions[i]);
            let peers = || members[..=i].iter().copied().zip(positions[..=i].iter().copied());
            for rep in 0..num_replicates {
                sum += self
                    .mass
                    .intensity_likelihood(molecule, rep, feature, position, peers());
                sum += self.mass.mass_likelihood(molecule, rep, feature, position);
            }
        }
        if let Some(means) = cluster_means {
            sum += self.retention_prediction(molecule, means[k]);
        }
        sum
    }

    fn retention_prediction(&self, molecule: usize, cluster_mean: f64) -> f64 {
        match self.mass.catalog().molecule(molecule).retention_time {
            Some(rt) => normal_density(cluster_mean, rt, self.rt_prediction_precision, true),
            None => 0.0,
        }
    }

    /// Related molecules of `molecule` in use by some cluster other than `k`.
    fn network_support(
        &self,
        network: &ConnectivityNetwork,
        state: &MoleculeClustering,
        molecule: usize,
        k: usize,
    ) -> usize {
        network
            .related(molecule)
            .iter()
            .filter(|&&related| {
                let clusters = state.clusters_for_molecule(related);
                clusters.len() > 1 || (clusters.len() == 1 && clusters[0] != k)
            })
            .count()
    }

    fn metropolis_hastings_step(
        &self,
        state: &mut MoleculeClustering,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError> {
        let num_molecules = self.mass.catalog().len();
        let cluster_means = if self.config.use_retention_time_prediction {
            Some(self.retention_scorer()?.cluster_means(&*state))
        } else {
            None
        };
        let mut accepted = 0usize;

        for k in 0..state.partition().num_clusters() {
            let members = state.partition().members(k).to_vec();
            let mut proposal_weights = vec![0.0; num_molecules];
            for &f in &members {
                self.mass.add_flat_log_likelihoods(f, &mut proposal_weights);
            }
            let (proposal, _) = sample_log_distribution(&proposal_weights, rng)
                .map_err(EngineError::numerical("molecule proposal"))?;
            let current = state.molecule_of(k);
            if proposal == current {
                continue;
            }

            let current_positions = state.positions_of(k);
            let mut proposal_positions = Vec::with_capacity(members.len());
            let mut proposed_density = 0.0;
            let mut current_density = 0.0;
            for (&f, &current_position) in members.iter().zip(&current_positions) {
                let (position, value) = self
                    .mass
                    .sample_position(f, proposal, rng)
                    .map_err(EngineError::numerical("molecule proposal"))?;
                proposal_positions.push(position);
                proposed_density += value;
                current_density += self.mass.position_proposal_weight(f, current, current_position);
            }

            let (choice, _) = sample_log_distribution(&[current_density, proposed_density], rng)
                .map_err(EngineError::numerical("molecule proposal"))?;
            if choice == 0 {
                continue;
            }

            let means = cluster_means.as_deref();
            let mut proposed_posterior =
                self.cluster_log_posterior(proposal, &members, &proposal_positions, means, k);
            let mut current_posterior =
                self.cluster_log_posterior(current, &members, &current_positions, means, k);
            if let Some(network) = &self.network {
                let beta_current = self.network_support(network, state, current, k) as f64;
                let beta_proposed = self.network_support(network, state, proposal, k) as f64;
                let normaliser = (2.0 * NETWORK_DELTA + beta_current + beta_proposed).ln();
                current_posterior += (beta_current + NETWORK_DELTA).ln() - normaliser;
                proposed_posterior += (beta_proposed + NETWORK_DELTA).ln() - normaliser;
            }

            let acceptance = metropolis_acceptance(
                current_density,
                proposed_density,
                proposed_posterior,
                current_posterior,
            );
            let u: f64 = rng.r#gen();
            trace!(cluster = k, current, proposal, acceptance, "Molecule move proposed");
            if acceptance >= u {
                state.set_molecule(k, proposal, &proposal_positions);
                accepted += 1;
            }
        }
        debug!(accepted, "Metropolis-Hastings molecule step finished.");
        Ok(())
    }

    fn gibbs_positions_step(
        &self,
        state: &mut MoleculeClustering,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError> {
        let num_molecules = self.mass.catalog().len();
        let sentinel = self.mass.catalog().default_position();

        for k in 0..state.partition().num_clusters() {
            let mut members = state.partition().members(k).to_vec();
            members.shuffle(rng);

            let mut log_weights = vec![0.0; num_molecules];
            let mut placed: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();

            for &f in &members {
                let mut candidates: BTreeMap<usize, BTreeMap<usize, f64>> = BTreeMap::new();
                for rep in 0..self.mass.table().num_replicates() {
                    if self.mass.table().intensity(rep, f).is_none() {
                        continue;
                    }
                    for entry in self.mass.replicate_cache(rep).non_zeros(f) {
                        let peers = placed.get(&entry.molecule).map_or(&[][..], Vec::as_slice);
                        let intensity = self.mass.intensity_likelihood(
                            entry.molecule,
                            rep,
                            f,
                            entry.position,
                            peers.iter().copied(),
                        );
                        *candidates
                            .entry(entry.molecule)
                            .or_default()
                            .entry(entry.position)
                            .or_default() += entry.value + intensity;
                    }
                }

                let background = self.mass.background_sum(f);
                for (molecule, weight) in log_weights.iter_mut().enumerate() {
                    let Some(positions) = candidates.get(&molecule) else {
                        *weight += background;
                        continue;
                    };
                    let mut options: Vec<usize> = positions.keys().copied().collect();
                    let mut values: Vec<f64> = positions.values().copied().collect();
                    options.push(sentinel);
                    values.push(background);
                    let (index, value) = sample_log_distribution(&values, rng)
                        .map_err(EngineError::numerical("position sampling"))?;
                    *weight += value;
                    if options[index] != sentinel {
                        placed.entry(molecule).or_default().push((f, options[index]));
                    }
                }
            }

            let (molecule, _) = sample_log_distribution(&log_weights, rng)
                .map_err(EngineError::numerical("molecule sampling"))?;
            let chosen = placed.remove(&molecule).unwrap_or_default();
            let positions: Vec<usize> = state
                .partition()
                .members(k)
                .iter()
                .map(|f| {
                    chosen
                        .iter()
                        .find(|(placed_feature, _)| placed_feature == f)
                        .map_or(sentinel, |&(_, position)| position)
                })
                .collect();
            state.set_molecule(k, molecule, &positions);
        }
        Ok(())
    }

    fn retention_time_step(
        &self,
        state: &mut MoleculeClustering,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError> {
        let retention = self.retention_scorer()?;
        let catalog = self.mass.catalog();
        let means: Vec<Vec<f64>> = (0..self.mass.table().num_replicates())
            .map(|rep| retention.cluster_means_for_replicate(&*state, rep))
            .collect();

        for k in 0..state.partition().num_clusters() {
            let formula = &catalog.molecule(state.molecule_of(k)).formula;
            let candidates: Vec<(usize, f64)> = catalog
                .molecules_with_formula(formula)
                .iter()
                .filter_map(|&m| catalog.molecule(m).retention_time.map(|rt| (m, rt)))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let log_weights: Vec<f64> = candidates
                .iter()
                .map(|&(_, rt)| {
                    means
                        .iter()
                        .map(|rep_means| {
                            normal_density(rep_means[k], rt, self.rt_prediction_precision, true)
                        })
                        .sum()
                })
                .collect();
            let (index, _) = sample_log_distribution(&log_weights, rng)
                .map_err(EngineError::numerical("retention-time step"))?;
            let positions = state.positions_of(k);
            state.set_molecule(k, candidates[index].0, &positions);
        }
        Ok(())
    }
}

impl Clusterer for MoleculeClusterer {
    type State = MoleculeClustering;

    fn initial_state(&self, rng: &mut ChaCha8Rng) -> Result<MoleculeClustering, EngineError> {
        if self.mass.table().num_features() == 0 {
            return Err(EngineError::Initialization("no features to cluster".to_string()));
        }
        if self.mass.catalog().is_empty() {
            return Err(EngineError::Initialization("the molecule catalog is empty".to_string()));
        }
        let state = match self.config.initial_clustering {
            InitialClustering::SinglePeak => self.single_peak_state(rng)?,
            InitialClustering::Pregrouped => self.pregrouped_state(rng)?,
            InitialClustering::Fixed { clusters } => self.fixed_state(clusters, rng),
        };
        Ok(state)
    }

    fn peak_log_posterior(&self, state: &MoleculeClustering, feature: usize) -> Vec<f64> {
        self.posterior.peak_log_posterior(state, feature)
    }

    fn assign(
        &self,
        state: &mut MoleculeClustering,
        feature: usize,
        cluster: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError> {
        if cluster == state.partition().num_clusters() {
            let molecule = self
                .mass
                .pick_molecule(feature, rng)
                .map_err(EngineError::numerical("new cluster molecule"))?;
            state.move_to_new_cluster(feature, molecule);
        } else {
            state.set_cluster(feature, cluster);
        }
        let molecule = state.feature_molecule(feature);
        let (position, _) = self
            .mass
            .sample_position(feature, molecule, rng)
            .map_err(EngineError::numerical("position sampling"))?;
        state.set_position(feature, position);
        Ok(())
    }

    fn after_sweep(
        &self,
        state: &mut MoleculeClustering,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), EngineError> {
        match self.config.step {
            MoleculeStep::MetropolisHastings => self.metropolis_hastings_step(state, rng),
            MoleculeStep::GibbsPositions => self.gibbs_positions_step(state, rng),
            MoleculeStep::RetentionTime => self.retention_time_step(state, rng),
            MoleculeStep::None => Ok(()),
        }
    }

    fn score(&self, state: &MoleculeClustering) -> f64 {
        self.posterior.total_log_likelihood(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::feature::{FeatureTable, FeatureTableBuilder, Observation, Polarity};
    use crate::core::models::molecule::{CatalogRow, MoleculeCatalog};
    use crate::engine::config::SamplerConfig;
    use crate::engine::progress::ProgressReporter;
    use crate::engine::sampler::GibbsSampler;
    use rand::SeedableRng;

    fn row(molecule: &str, formula: &str, mz: f64, intensity: f64, rt: Option<f64>) -> CatalogRow {
        CatalogRow {
            molecule: molecule.to_string(),
            formula: formula.to_string(),
            adduct: "M+H".to_string(),
            mz,
            relative_intensity: intensity,
            polarity: Polarity::Positive,
            retention_time: rt,
        }
    }

    fn catalog(config: &MoleculeConfig) -> Arc<MoleculeCatalog> {
        Arc::new(
            MoleculeCatalog::from_rows(
                vec![
                    row("glucose", "C6H12O6", 181.0707, 1.0, Some(300.0)),
                    row("glucose", "C6H12O6", 182.0741, 0.07, Some(300.0)),
                    row("fructose", "C6H12O6", 181.0707, 1.0, Some(600.0)),
                    row("fructose", "C6H12O6", 182.0741, 0.07, Some(600.0)),
                    row("alanine", "C3H7NO2", 90.0550, 1.0, Some(120.0)),
                ],
                &config.spectrum_limits(),
            )
            .unwrap(),
        )
    }

    fn table() -> Arc<FeatureTable> {
        let mut builder = FeatureTableBuilder::new(2);
        let obs = |mz: f64, intensity: f64, rt: f64| {
            Some(
                Observation::new(mz)
                    .with_intensity(intensity)
                    .with_retention_time(rt),
            )
        };
        builder
            .add_feature("g0", Polarity::Positive, vec![obs(181.0708, 1e6, 301.0), obs(181.0706, 1.1e6, 299.0)])
            .unwrap();
        builder
            .add_feature("g1", Polarity::Positive, vec![obs(182.0740, 7e4, 301.5), obs(182.0742, 7.5e4, 299.5)])
            .unwrap();
        builder
            .add_feature("a0", Polarity::Positive, vec![obs(90.0551, 3e5, 121.0), obs(90.0549, 3.2e5, 119.0)])
            .unwrap();
        builder
            .add_feature("x", Polarity::Positive, vec![obs(400.0, 2e5, 50.0), None])
            .unwrap();
        Arc::new(builder.build().unwrap())
    }

    fn clusterer(config: MoleculeConfig) -> MoleculeClusterer {
        let catalog = catalog(&config);
        let table = table();
        let reporter = ProgressReporter::new();
        let mass = Arc::new(MassIntensityScorer::new(table.clone(), catalog, &config, &reporter));
        let retention = Arc::new(RetentionTimeScorer::new(table, &Default::default()));
        MoleculeClusterer::new(mass, config, 1.0).with_retention_time(retention)
    }

    #[test]
    fn acceptance_of_a_neutral_move_is_one() {
        assert_eq!(metropolis_acceptance(-3.5, -3.5, 12.0, 12.0), 1.0);
        assert_eq!(metropolis_acceptance(0.0, 0.0, 1.0, 0.0), 1.0);
        assert!((metropolis_acceptance(0.0, 0.0, 0.0, 2.0) - (-2.0_f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn single_peak_start_uses_nearest_cached_positions() {
        let clusterer = clusterer(MoleculeConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let state = clusterer.initial_state(&mut rng).unwrap();
        let catalog = clusterer.mass_scorer().catalog();

        assert_eq!(state.partition().num_clusters(), 4);
        let alanine = catalog.index_of("alanine").unwrap();
        assert_eq!(state.feature_molecule(2), alanine);
        assert_eq!(state.position_of(2), 0);
        assert_eq!(state.position_of(3), catalog.default_position());
    }

    #[test]
    fn pregrouped_start_shares_clusters_by_molecule() {
        let config = MoleculeConfig {
            initial_clustering: InitialClustering::Pregrouped,
            ..MoleculeConfig::default()
        };
        let clusterer = clusterer(config);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let state = clusterer.initial_state(&mut rng).unwrap();
        let catalog = clusterer.mass_scorer().catalog();
        let alanine = catalog.index_of("alanine").unwrap();
        let partition = state.partition();

        // Both hexose features start on an isomer; the alanine peak starts alone.
        for f in [0, 1] {
            assert_eq!(catalog.molecule(state.feature_molecule(f)).formula, "C6H12O6");
            assert_ne!(partition.cluster_of(f), partition.cluster_of(2));
        }
        assert_eq!(partition.members(partition.cluster_of(2)), &[2]);
        assert_eq!(state.feature_molecule(2), alanine);
        assert!(state.clusters_for_molecule(alanine).len() == 1);
        assert!(partition.num_clusters() <= 4);
        assert!(partition.is_consistent());
    }

    #[test]
    fn fixed_start_places_every_feature_on_the_sentinel() {
        let config = MoleculeConfig {
            initial_clustering: InitialClustering::Fixed { clusters: 2 },
            ..MoleculeConfig::default()
        };
        let clusterer = clusterer(config);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let state = clusterer.initial_state(&mut rng).unwrap();
        let sentinel = clusterer.mass_scorer().catalog().default_position();
        assert!(state.positions().iter().all(|&p| p == sentinel));
        assert!(state.partition().num_clusters() <= 2);
    }

    #[test]
    fn out_of_tolerance_feature_stays_on_the_sentinel() {
        for step in [
            MoleculeStep::MetropolisHastings,
            MoleculeStep::GibbsPositions,
            MoleculeStep::RetentionTime,
            MoleculeStep::None,
        ] {
            let config = MoleculeConfig {
                step,
                ..MoleculeConfig::default()
            };
            let sentinel = catalog(&config).default_position();
            let mut sampler = GibbsSampler::new(clusterer(config), SamplerConfig::default());
            let mut state = sampler.initial_state().unwrap();
            for _ in 0..10 {
                sampler.sweep(&mut state).unwrap();
                assert_eq!(state.position_of(3), sentinel);
                assert!(state.partition().is_consistent());
                for k in 0..state.partition().num_clusters() {
                    assert!(state.clusters_for_molecule(state.molecule_of(k)).contains(&k));
                }
            }
        }
    }

    #[test]
    fn retention_time_step_picks_the_isomer_with_the_closest_retention_time() {
        let config = MoleculeConfig {
            step: MoleculeStep::RetentionTime,
            retention_time_prediction_sd: 10.0,
            ..MoleculeConfig::default()
        };
        let clusterer = clusterer(config);
        let catalog = clusterer.mass_scorer().catalog();
        let glucose = catalog.index_of("glucose").unwrap();
        let fructose = catalog.index_of("fructose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        let sentinel = catalog.default_position();

        let mut state = MoleculeClustering::new(
            Clustering::from_assignments(&[0, 0, 1, 2]),
            vec![fructose, alanine, alanine],
            vec![0, 1, 0, sentinel],
            catalog.len(),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        clusterer.after_sweep(&mut state, &mut rng).unwrap();
        assert_eq!(state.molecule_of(0), glucose);
        assert_eq!(state.positions_of(0), vec![0, 1]);
        assert_eq!(state.molecule_of(1), alanine);
    }

    #[test]
    fn metropolis_step_moves_clusters_towards_explaining_molecules() {
        let config = MoleculeConfig {
            step: MoleculeStep::MetropolisHastings,
            ..MoleculeConfig::default()
        };
        let clusterer = clusterer(config);
        let catalog = clusterer.mass_scorer().catalog();
        let alanine = catalog.index_of("alanine").unwrap();
        let glucose = catalog.index_of("glucose").unwrap();
        let fructose = catalog.index_of("fructose").unwrap();
        let sentinel = catalog.default_position();

        let mut state = MoleculeClustering::new(
            Clustering::from_assignments(&[0, 0, 1, 2]),
            vec![alanine, glucose, alanine],
            vec![sentinel, sentinel, sentinel, sentinel],
            catalog.len(),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..20 {
            clusterer.after_sweep(&mut state, &mut rng).unwrap();
        }
        let hexose = state.molecule_of(0);
        assert!(hexose == glucose || hexose == fructose);
        assert_eq!(state.molecule_of(1), alanine);
    }

    #[test]
    fn single_metropolis_step_leaves_an_unexplaining_molecule() {
        let config = MoleculeConfig {
            step: MoleculeStep::MetropolisHastings,
            ..MoleculeConfig::default()
        };
        let clusterer = clusterer(config);
        let catalog = clusterer.mass_scorer().catalog();
        let glucose = catalog.index_of("glucose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        let sentinel = catalog.default_position();

        let trials = 200;
        let mut moved = 0;
        for seed in 0..trials {
            let mut state = MoleculeClustering::new(
                Clustering::from_assignments(&[0, 0, 1, 2]),
                vec![glucose, glucose, alanine],
                vec![0, 1, sentinel, sentinel],
                catalog.len(),
            );
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            clusterer.metropolis_hastings_step(&mut state, &mut rng).unwrap();
            if state.molecule_of(1) == alanine {
                assert_eq!(state.positions_of(1), vec![0]);
                moved += 1;
            }
        }
        assert!(moved > trials * 3 / 4, "moved in {moved}/{trials} steps");
    }

    fn isomer_clusterer(network: Option<ConnectivityNetwork>) -> MoleculeClusterer {
        let config = MoleculeConfig {
            step: MoleculeStep::MetropolisHastings,
            use_retention_time_prediction: false,
            ..MoleculeConfig::default()
        };
        let clusterer = clusterer(config);
        match network {
            Some(network) => clusterer.with_network(Arc::new(network)),
            None => clusterer,
        }
    }

    fn isomer_state(catalog: &MoleculeCatalog) -> MoleculeClustering {
        let glucose = catalog.index_of("glucose").unwrap();
        let fructose = catalog.index_of("fructose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        MoleculeClustering::new(
            Clustering::from_assignments(&[0, 0, 1, 2]),
            vec![glucose, alanine, fructose],
            vec![0, 1, 0, catalog.default_position()],
            catalog.len(),
        )
    }

    #[test]
    fn network_support_counts_related_molecules_used_by_other_clusters() {
        let catalog = catalog(&MoleculeConfig::default());
        let glucose = catalog.index_of("glucose").unwrap();
        let fructose = catalog.index_of("fructose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        let mut network = ConnectivityNetwork::new(catalog.len());
        network.connect(glucose, alanine);
        network.connect(fructose, alanine);
        network.connect(glucose, fructose);

        let clusterer = isomer_clusterer(None);
        let state = isomer_state(&catalog);

        // Glucose sees alanine (cluster 1) and fructose (cluster 2).
        assert_eq!(clusterer.network_support(&network, &state, glucose, 0), 2);
        // Alanine's neighbours glucose and fructose back clusters 0 and 2.
        assert_eq!(clusterer.network_support(&network, &state, alanine, 1), 2);
        // The cluster being moved never supports itself.
        assert_eq!(clusterer.network_support(&network, &state, alanine, 0), 1);
        assert_eq!(clusterer.network_support(&network, &state, fructose, 2), 2);

        let isolated = ConnectivityNetwork::new(catalog.len());
        assert_eq!(clusterer.network_support(&isolated, &state, glucose, 0), 0);
    }

    #[test]
    fn network_prior_holds_clusters_on_supported_molecules() {
        let catalog = catalog(&MoleculeConfig::default());
        let glucose = catalog.index_of("glucose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        let mut network = ConnectivityNetwork::new(catalog.len());
        network.connect(glucose, alanine);

        let plain = isomer_clusterer(None);
        let networked = isomer_clusterer(Some(network));
        let count_departures = |clusterer: &MoleculeClusterer| {
            (0..400u64)
                .filter(|&seed| {
                    let mut state = isomer_state(&catalog);
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    clusterer.metropolis_hastings_step(&mut state, &mut rng).unwrap();
                    state.molecule_of(0) != glucose
                })
                .count()
        };

        // Glucose and fructose explain the hexose peaks equally well, so only
        // the network separates them: leaving glucose costs ln 2.
        let without = count_departures(&plain);
        let with = count_departures(&networked);
        assert!(without > 0);
        assert!(with < without, "left glucose {with} times with the network, {without} without");
    }
}
