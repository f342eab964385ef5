use super::{close_trace, load_features, open_trace};
use crate::cli::IdentifyArgs;
use crate::config::PartialConfig;
use crate::error::Result;
use crate::output;
use crate::utils::progress::CliProgressHandler;
use peakgroup::core::io::catalog::{load_catalog, load_network};
use peakgroup::core::models::molecule::SpectrumLimits;
use peakgroup::engine::handlers::SampleHandler;
use peakgroup::engine::progress::ProgressReporter;
use peakgroup::engine::state::MoleculeClustering;
use peakgroup::workflows;
use std::sync::Arc;
use tracing::info;

pub fn run(args: IdentifyArgs, quiet: bool) -> Result<()> {
    let partial_config = PartialConfig::load(&args.common)?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_for_identification(&args)?;

    let table = Arc::new(load_features(&args.common)?);

    info!("Loading molecule catalog from {:?}", &args.molecules);
    let limits = SpectrumLimits {
        adducts: config.molecule.adducts.clone(),
        max_positions_per_adduct: config.molecule.max_positions_per_adduct,
        min_distribution_value: config.molecule.min_distribution_value,
    };
    let catalog = Arc::new(load_catalog(&args.molecules, &limits)?);
    let network = match &args.network {
        Some(path) => {
            info!("Loading connectivity network from {:?}", path);
            Some(Arc::new(load_network(path, &catalog)?))
        }
        None => None,
    };
    println!("Loaded {} candidate molecules.", catalog.len());

    let mut trace = open_trace(args.common.trace.as_deref())?;
    let progress_handler = if quiet {
        CliProgressHandler::hidden()
    } else {
        CliProgressHandler::new()
    };
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting feature identification...");
    let result = {
        let mut handlers: Vec<&mut dyn SampleHandler<MoleculeClustering>> = Vec::new();
        if let Some(trace) = trace.as_mut() {
            handlers.push(trace);
        }
        workflows::identify::run(
            table.clone(),
            catalog.clone(),
            network,
            &config,
            &mut handlers,
            &reporter,
        )?
    };
    let unsupported = result.unsupported.iter().filter(|&&u| u).count();
    info!(
        clusters = result.num_clusters(),
        unsupported,
        score = result.score,
        "Workflow finished."
    );

    output::write_identities(&args.common.output, &table, &catalog, &result)?;
    println!(
        "✓ {} clusters (log posterior {:.4}, {} unsupported features) written to: {}",
        result.num_clusters(),
        result.score,
        unsupported,
        args.common.output.display()
    );

    if let Some(path) = &args.support {
        output::write_support(path, &catalog, &result)?;
        println!("  Molecule support written to: {}", path.display());
    }

    close_trace(trace, args.common.trace.as_deref())
}
