pub mod cluster;
pub mod identify;

use crate::cli::CommonArgs;
use crate::error::{CliError, Result};
use peakgroup::core::io::features::load_feature_table;
use peakgroup::core::models::feature::FeatureTable;
use peakgroup::engine::handlers::TraceHandler;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

pub(crate) fn load_features(args: &CommonArgs) -> Result<FeatureTable> {
    info!("Loading feature table from {:?}", &args.features);
    let table = load_feature_table(&args.features, args.signals.as_deref())?;
    if table.num_features() == 0 {
        return Err(CliError::Argument(format!(
            "feature table '{}' contains no features",
            args.features.display()
        )));
    }
    println!(
        "Loaded {} features across {} replicates.",
        table.num_features(),
        table.num_replicates()
    );
    Ok(table)
}

pub(crate) fn open_trace(path: Option<&Path>) -> Result<Option<TraceHandler<BufWriter<File>>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    info!("Streaming retained samples to {:?}", path);
    let file = File::create(path)?;
    Ok(Some(TraceHandler::new(BufWriter::new(file))))
}

pub(crate) fn close_trace(
    trace: Option<TraceHandler<BufWriter<File>>>,
    path: Option<&Path>,
) -> Result<()> {
    if let (Some(trace), Some(path)) = (trace, path) {
        trace.finish().map_err(|source| CliError::Output {
            path: path.to_path_buf(),
            source,
        })?;
        println!("  Sample trace written to: {}", path.display());
    }
    Ok(())
}
