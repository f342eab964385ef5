use super::cluster::{cluster_lists, most_intense, sample_scores};
use crate::core::models::feature::{FeatureTable, Polarity};
use crate::core::models::molecule::{ConnectivityNetwork, MoleculeCatalog};
use crate::engine::config::IdentificationConfig;
use crate::engine::error::EngineError;
use crate::engine::handlers::{CoClusteringHandler, IdentificationSupportHandler, SampleHandler};
use crate::engine::molecule::MoleculeClusterer;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sampler::GibbsSampler;
use crate::engine::scoring::{CorrelationScorer, MassIntensityScorer, RetentionTimeScorer};
use crate::engine::state::{ClusterState, MoleculeClustering};
use nalgebra::DMatrix;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Best annotated partition found by an identification run.
#[derive(Debug, Clone)]
pub struct IdentificationResult {
    pub assignments: Vec<usize>,
    pub clusters: Vec<Vec<usize>>,
    pub representatives: Vec<usize>,
    /// Catalog index of the molecule explaining each cluster.
    pub cluster_molecules: Vec<usize>,
    /// Spectrum position of each feature; the catalog's default position
    /// marks an unexplained feature.
    pub positions: Vec<usize>,
    /// Number of retained samples in which each catalog molecule was supported.
    pub molecule_support: Vec<usize>,
    pub support_samples: usize,
    /// Features whose molecule lacks enough ranked peaks in the best sample.
    pub unsupported: Vec<bool>,
    pub score: f64,
    pub sample_scores: Vec<f64>,
    pub co_clustering: Option<DMatrix<f64>>,
}

impl IdentificationResult {
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Catalog index of the molecule explaining the feature.
    pub fn molecule_of_feature(&self, feature: usize) -> usize {
        self.cluster_molecules[self.assignments[feature]]
    }

    /// Fraction of samples supporting `molecule`.
    pub fn support_fraction(&self, molecule: usize) -> f64 {
        if self.support_samples == 0 {
            return 0.0;
        }
        self.molecule_support[molecule] as f64 / self.support_samples as f64
    }
}

#[instrument(skip_all, name = "identification_workflow")]
pub fn run(
    table: Arc<FeatureTable>,
    catalog: Arc<MoleculeCatalog>,
    network: Option<Arc<ConnectivityNetwork>>,
    config: &IdentificationConfig,
    handlers: &mut [&mut dyn SampleHandler<MoleculeClustering>],
    reporter: &ProgressReporter,
) -> Result<IdentificationResult, EngineError> {
    info!(
        features = table.num_features(),
        replicates = table.num_replicates(),
        molecules = catalog.len(),
        "Starting identification workflow."
    );
    if let Some(network) = &network {
        if network.num_molecules() != catalog.len() {
            return Err(EngineError::Initialization(format!(
                "connectivity network covers {} molecules but the catalog has {}",
                network.num_molecules(),
                catalog.len()
            )));
        }
    }

    // === Phase 1: Precompute the clustering-independent likelihoods ===
    reporter.report(Progress::PhaseStart {
        name: "Precomputation",
    });
    let mass = Arc::new(MassIntensityScorer::new(
        table.clone(),
        catalog.clone(),
        &config.molecule,
        reporter,
    ));
    let mut clusterer = MoleculeClusterer::new(mass, config.molecule.clone(), config.sampler.alpha);
    if let Some(correlation) = &config.correlation {
        let scorer = CorrelationScorer::new(&table, correlation, reporter);
        clusterer = clusterer.with_correlation(Arc::new(scorer));
    }
    if let Some(retention_time) = &config.retention_time {
        let scorer = RetentionTimeScorer::new(table.clone(), retention_time);
        clusterer = clusterer.with_retention_time(Arc::new(scorer));
    }
    if let Some(network) = network {
        clusterer = clusterer.with_network(network);
    }
    info!(scorers = ?clusterer.scorer().scorer_names(), step = ?config.molecule.step, "Scorers ready.");
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Gibbs sampling with molecule updates ===
    let mut sampler = GibbsSampler::new(clusterer, config.sampler.clone());
    let mut support = IdentificationSupportHandler::new(
        table.clone(),
        catalog.clone(),
        config.molecule.identification_peaks,
    );
    let mut co_clustering = config
        .sampler
        .track_co_clustering
        .then(|| CoClusteringHandler::new(table.num_features()));

    let outcome = {
        let mut all: Vec<&mut dyn SampleHandler<MoleculeClustering>> = handlers
            .iter_mut()
            .map(|h| &mut **h as &mut dyn SampleHandler<MoleculeClustering>)
            .collect();
        all.push(&mut support);
        if let Some(handler) = co_clustering.as_mut() {
            all.push(handler);
        }
        sampler.run(&mut all, reporter)?
    };

    // === Phase 3: Organize results ===
    let best = outcome.best;
    let clusters = cluster_lists(best.partition());
    let representatives = clusters
        .iter()
        .map(|members| most_intense(&table, members))
        .collect();
    let unsupported = unsupported_features(
        &table,
        &catalog,
        &best,
        config.molecule.min_supporting_features,
    );
    let result = IdentificationResult {
        assignments: best.partition().snapshot(),
        clusters,
        representatives,
        cluster_molecules: best.molecules().to_vec(),
        positions: best.positions().to_vec(),
        molecule_support: support.supports().to_vec(),
        support_samples: support.samples(),
        unsupported,
        score: outcome.best_score,
        sample_scores: sample_scores(&outcome.samples),
        co_clustering: co_clustering.map(|handler| handler.probabilities()),
    };

    info!(
        clusters = result.num_clusters(),
        molecules = result.cluster_molecules.iter().collect::<HashSet<_>>().len(),
        unsupported = result.unsupported.iter().filter(|&&u| u).count(),
        score = result.score,
        "Identification workflow complete."
    );
    Ok(result)
}

/// Flags the features of every molecule whose clusters do not cover a long
/// enough run of its ranked peaks for any adduct and polarity.
///
/// A run starts at the most intense peak and stops at the first peak no
/// feature sits on. It is long enough at `min_supporting_features` peaks, or
/// when it covers every peak of the adduct.
pub fn unsupported_features(
    table: &FeatureTable,
    catalog: &MoleculeCatalog,
    state: &MoleculeClustering,
    min_supporting_features: usize,
) -> Vec<bool> {
    let mut unsupported = vec![false; table.num_features()];
    let used: HashSet<usize> = state.molecules().iter().copied().collect();

    for molecule in used {
        let features: Vec<usize> = state
            .clusters_for_molecule(molecule)
            .iter()
            .flat_map(|&k| state.partition().members(k).iter().copied())
            .collect();
        let spectrum = catalog.molecule(molecule);

        let supported = [Polarity::Positive, Polarity::Negative].into_iter().any(|polarity| {
            let occupied: HashSet<usize> = features
                .iter()
                .filter(|&&f| table.polarity(f) == polarity)
                .map(|&f| state.position_of(f))
                .collect();
            (0..catalog.adducts().len()).any(|adduct| {
                let ranked = spectrum.ranked_positions(polarity, adduct);
                let run = ranked.iter().take_while(|p| occupied.contains(p)).count();
                run > 0 && (run >= min_supporting_features || run == ranked.len())
            })
        });

        if !supported {
            debug!(molecule = %spectrum.name, features = features.len(), "Molecule lacks peak support.");
            for f in features {
                unsupported[f] = true;
            }
        }
    }
    unsupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::feature::{FeatureTableBuilder, Observation};
    use crate::core::models::molecule::{CatalogRow, SpectrumLimits};
    use crate::engine::config::{
        IdentificationConfigBuilder, MoleculeConfig, RetentionTimeConfig, SamplerConfig,
    };
    use crate::engine::molecule::MoleculeStep;
    use crate::engine::state::Clustering;

    fn row(molecule: &str, formula: &str, mz: f64, intensity: f64) -> CatalogRow {
        CatalogRow {
            molecule: molecule.to_string(),
            formula: formula.to_string(),
            adduct: "M+H".to_string(),
            mz,
            relative_intensity: intensity,
            polarity: Polarity::Positive,
            retention_time: None,
        }
    }

    fn limits() -> SpectrumLimits {
        SpectrumLimits {
            adducts: vec!["M+H".to_string()],
            max_positions_per_adduct: 3,
            min_distribution_value: 1e-5,
        }
    }

    fn catalog() -> Arc<MoleculeCatalog> {
        Arc::new(
            MoleculeCatalog::from_rows(
                vec![
                    row("glucose", "C6H12O6", 181.0707, 1.0),
                    row("glucose", "C6H12O6", 182.0741, 0.07),
                    row("glucose", "C6H12O6", 183.0775, 0.01),
                    row("alanine", "C3H7NO2", 90.0550, 1.0),
                ],
                &limits(),
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
            .add_feature("g0", Polarity::Positive, vec![obs(181.0708, 1e6, 300.0), obs(181.0706, 1.1e6, 301.0)])
            .unwrap();
        builder
            .add_feature("g1", Polarity::Positive, vec![obs(182.0740, 7e4, 300.2), obs(182.0742, 7.6e4, 301.1)])
            .unwrap();
        builder
            .add_feature("a0", Polarity::Positive, vec![obs(90.0551, 3e5, 120.0), obs(90.0549, 3.2e5, 121.0)])
            .unwrap();
        builder
            .add_feature("x", Polarity::Positive, vec![obs(412.3, 2e5, 700.0), None])
            .unwrap();
        Arc::new(builder.build().unwrap())
    }

    fn config(step: MoleculeStep) -> IdentificationConfig {
        IdentificationConfigBuilder::new()
            .sampler(SamplerConfig {
                num_samples: 15,
                burn_in: 10,
                ..SamplerConfig::default()
            })
            .retention_time(RetentionTimeConfig::default())
            .molecule(MoleculeConfig {
                adducts: vec!["M+H".to_string()],
                step,
                ..MoleculeConfig::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn identifies_features_on_their_theoretical_peaks() {
        let catalog = catalog();
        let result = run(
            table(),
            catalog.clone(),
            None,
            &config(MoleculeStep::MetropolisHastings),
            &mut [],
            &ProgressReporter::new(),
        )
        .unwrap();

        let glucose = catalog.index_of("glucose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.molecule_of_feature(0), glucose);
        assert_eq!(result.molecule_of_feature(2), alanine);
        assert_eq!(result.positions[0], 0);
        assert_eq!(result.positions[1], 1);
        assert_eq!(result.positions[3], catalog.default_position());
        assert_eq!(result.support_samples, 15);
        assert_eq!(result.sample_scores.len(), 15);
        assert!(!result.unsupported[0]);
        assert!(!result.unsupported[2]);
    }

    #[test]
    fn identical_seeds_give_identical_runs() {
        let run_once = || {
            run(
                table(),
                catalog(),
                None,
                &config(MoleculeStep::GibbsPositions),
                &mut [],
                &ProgressReporter::new(),
            )
            .unwrap()
        };
        let (a, b) = (run_once(), run_once());
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.positions, b.positions);
        assert_eq!(a.sample_scores, b.sample_scores);
    }

    #[test]
    fn network_must_match_the_catalog() {
        let network = Arc::new(ConnectivityNetwork::new(5));
        let result = run(
            table(),
            catalog(),
            Some(network),
            &config(MoleculeStep::MetropolisHastings),
            &mut [],
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(EngineError::Initialization(_))));
    }

    #[test]
    fn support_needs_a_gapless_run_of_ranked_peaks() {
        let catalog = catalog();
        let table = table();
        let glucose = catalog.index_of("glucose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        let sentinel = catalog.default_position();
        let state = |positions: Vec<usize>| {
            MoleculeClustering::new(
                Clustering::from_assignments(&[0, 0, 1, 1]),
                vec![glucose, alanine],
                positions,
                catalog.len(),
            )
        };

        // Two ranked glucose peaks meet the default threshold; alanine has one peak only.
        let flags = unsupported_features(&table, &catalog, &state(vec![0, 1, 0, sentinel]), 2);
        assert_eq!(flags, vec![false, false, false, false]);

        // The most intense glucose peak is missing, so the run is empty.
        let flags = unsupported_features(&table, &catalog, &state(vec![sentinel, 1, 0, sentinel]), 2);
        assert_eq!(flags, vec![true, true, false, false]);

        let flags = unsupported_features(&table, &catalog, &state(vec![0, 1, 0, sentinel]), 3);
        assert_eq!(flags, vec![true, true, false, false]);
    }
}
