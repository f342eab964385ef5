use super::{close_trace, load_features, open_trace};
use crate::cli::ClusterArgs;
use crate::config::PartialConfig;
use crate::error::Result;
use crate::output;
use crate::utils::progress::CliProgressHandler;
use peakgroup::engine::handlers::SampleHandler;
use peakgroup::engine::progress::ProgressReporter;
use peakgroup::engine::state::Clustering;
use peakgroup::workflows;
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(args: ClusterArgs, quiet: bool) -> Result<()> {
    let partial_config = PartialConfig::load(&args.common)?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_for_clustering(&args)?;

    let table = Arc::new(load_features(&args.common)?);
    let mut trace = open_trace(args.common.trace.as_deref())?;

    let progress_handler = if quiet {
        CliProgressHandler::hidden()
    } else {
        CliProgressHandler::new()
    };
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting feature clustering...");
    let result = {
        let mut handlers: Vec<&mut dyn SampleHandler<Clustering>> = Vec::new();
        if let Some(trace) = trace.as_mut() {
            handlers.push(trace);
        }
        workflows::cluster::run(table.clone(), &config, &mut handlers, &reporter)?
    };
    info!(
        clusters = result.num_clusters(),
        score = result.score,
        "Workflow finished."
    );

    output::write_clusters(&args.common.output, &table, &result)?;
    println!(
        "✓ {} clusters (log posterior {:.4}) written to: {}",
        result.num_clusters(),
        result.score,
        args.common.output.display()
    );

    if let Some(path) = &args.co_clustering {
        match &result.co_clustering {
            Some(probabilities) => {
                output::write_co_clustering(path, table.ids(), probabilities)?;
                println!("  Co-clustering probabilities written to: {}", path.display());
            }
            None => warn!("No co-clustering probabilities were recorded."),
        }
    }

    close_trace(trace, args.common.trace.as_deref())
}
