use crate::error::{CliError, Result};
use nalgebra::DMatrix;
use peakgroup::core::models::feature::FeatureTable;
use peakgroup::core::models::molecule::MoleculeCatalog;
use peakgroup::workflows::cluster::ClusteringResult;
use peakgroup::workflows::identify::IdentificationResult;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Serialize)]
struct ClusterRow<'a> {
    feature: &'a str,
    cluster: usize,
    representative: bool,
}

#[derive(Serialize)]
struct IdentityRow<'a> {
    feature: &'a str,
    cluster: usize,
    molecule: &'a str,
    formula: &'a str,
    adduct: Option<&'a str>,
    position: Option<usize>,
    theoretical_mz: Option<f64>,
    unsupported: bool,
}

#[derive(Serialize)]
struct SupportRow<'a> {
    molecule: &'a str,
    formula: &'a str,
    support: usize,
    fraction: f64,
}

fn create(path: &Path) -> Result<File> {
    Ok(File::create(path)?)
}

fn output_error(path: &Path) -> impl FnOnce(csv::Error) -> CliError + '_ {
    move |source| CliError::Output {
        path: path.to_path_buf(),
        source,
    }
}

pub fn write_clusters_to<W: Write>(
    writer: W,
    table: &FeatureTable,
    result: &ClusteringResult,
) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for feature in 0..table.num_features() {
        let cluster = result.assignments[feature];
        writer.serialize(ClusterRow {
            feature: table.id(feature),
            cluster,
            representative: result.representatives[cluster] == feature,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_clusters(path: &Path, table: &FeatureTable, result: &ClusteringResult) -> Result<()> {
    write_clusters_to(create(path)?, table, result).map_err(output_error(path))?;
    info!(path = %path.display(), clusters = result.num_clusters(), "Wrote cluster assignments.");
    Ok(())
}

/// One row per feature. Features left on the default position carry no
/// adduct, position or theoretical m/z.
pub fn write_identities_to<W: Write>(
    writer: W,
    table: &FeatureTable,
    catalog: &MoleculeCatalog,
    result: &IdentificationResult,
) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    let sentinel = catalog.default_position();
    for feature in 0..table.num_features() {
        let molecule = catalog.molecule(result.molecule_of_feature(feature));
        let position = Some(result.positions[feature]).filter(|&p| p != sentinel);
        let peak = position.and_then(|p| molecule.position(p));
        writer.serialize(IdentityRow {
            feature: table.id(feature),
            cluster: result.assignments[feature],
            molecule: &molecule.name,
            formula: &molecule.formula,
            adduct: peak.and_then(|p| catalog.adducts().get(p.adduct).map(String::as_str)),
            position,
            theoretical_mz: peak.map(|p| p.mz),
            unsupported: result.unsupported[feature],
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_identities(
    path: &Path,
    table: &FeatureTable,
    catalog: &MoleculeCatalog,
    result: &IdentificationResult,
) -> Result<()> {
    write_identities_to(create(path)?, table, catalog, result).map_err(output_error(path))?;
    info!(path = %path.display(), clusters = result.num_clusters(), "Wrote identifications.");
    Ok(())
}

/// Square matrix with a `feature` header column followed by one column per feature.
pub fn write_co_clustering_to<W: Write>(
    writer: W,
    ids: &[String],
    probabilities: &DMatrix<f64>,
) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_field("feature")?;
    writer.write_record(ids)?;
    for (i, id) in ids.iter().enumerate() {
        writer.write_field(id)?;
        writer.write_record(probabilities.row(i).iter().map(|p| p.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_co_clustering(
    path: &Path,
    ids: &[String],
    probabilities: &DMatrix<f64>,
) -> Result<()> {
    write_co_clustering_to(create(path)?, ids, probabilities).map_err(output_error(path))?;
    info!(path = %path.display(), "Wrote co-clustering probabilities.");
    Ok(())
}

pub fn write_support_to<W: Write>(
    writer: W,
    catalog: &MoleculeCatalog,
    result: &IdentificationResult,
) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for (m, molecule) in catalog.molecules().iter().enumerate() {
        writer.serialize(SupportRow {
            molecule: &molecule.name,
            formula: &molecule.formula,
            support: result.molecule_support[m],
            fraction: result.support_fraction(m),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_support(
    path: &Path,
    catalog: &MoleculeCatalog,
    result: &IdentificationResult,
) -> Result<()> {
    write_support_to(create(path)?, catalog, result).map_err(output_error(path))?;
    info!(path = %path.display(), "Wrote molecule support.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use peakgroup::core::models::feature::{FeatureTableBuilder, Observation, Polarity};
    use peakgroup::core::models::molecule::{CatalogRow, SpectrumLimits};

    fn table() -> FeatureTable {
        let mut builder = FeatureTableBuilder::new(1);
        for (id, mz, intensity) in [("f0", 181.0707, 1e6), ("f1", 182.0741, 6.5e4), ("f2", 90.055, 3e5)] {
            builder
                .add_feature(
                    id.to_string(),
                    Polarity::Positive,
                    vec![Some(Observation::new(mz).with_intensity(intensity))],
                )
                .unwrap();
        }
        builder.build().unwrap()
    }

    fn catalog() -> MoleculeCatalog {
        let row = |molecule: &str, formula: &str, mz: f64, relative_intensity: f64| CatalogRow {
            molecule: molecule.to_string(),
            formula: formula.to_string(),
            adduct: "M+H".to_string(),
            mz,
            relative_intensity,
            polarity: Polarity::Positive,
            retention_time: None,
        };
        let limits = SpectrumLimits {
            adducts: vec!["M+H".to_string()],
            max_positions_per_adduct: 3,
            min_distribution_value: 1e-5,
        };
        MoleculeCatalog::from_rows(
            vec![
                row("glucose", "C6H12O6", 181.0707, 0.93),
                row("glucose", "C6H12O6", 182.0741, 0.065),
                row("alanine", "C3H7NO2", 90.055, 0.96),
            ],
            &limits,
        )
        .unwrap()
    }

    fn identification(catalog: &MoleculeCatalog) -> IdentificationResult {
        let glucose = catalog.index_of("glucose").unwrap();
        let alanine = catalog.index_of("alanine").unwrap();
        let mut molecule_support = vec![0; catalog.len()];
        molecule_support[glucose] = 3;
        IdentificationResult {
            assignments: vec![0, 0, 1],
            clusters: vec![vec![0, 1], vec![2]],
            representatives: vec![0, 2],
            cluster_molecules: vec![glucose, alanine],
            positions: vec![0, 1, catalog.default_position()],
            molecule_support,
            support_samples: 4,
            unsupported: vec![false, false, true],
            score: -10.0,
            sample_scores: vec![-12.0, -10.0],
            co_clustering: None,
        }
    }

    fn to_string(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn clusters_mark_representatives() {
        let table = table();
        let result = ClusteringResult {
            assignments: vec![0, 0, 1],
            clusters: vec![vec![0, 1], vec![2]],
            representatives: vec![0, 2],
            score: -3.0,
            sample_scores: vec![-3.0],
            co_clustering: None,
        };
        let mut buffer = Vec::new();
        write_clusters_to(&mut buffer, &table, &result).unwrap();

        assert_eq!(
            to_string(buffer),
            "feature,cluster,representative\nf0,0,true\nf1,0,false\nf2,1,true\n"
        );
    }

    #[test]
    fn identities_leave_sentinel_fields_empty() {
        let (table, catalog) = (table(), catalog());
        let result = identification(&catalog);
        let mut buffer = Vec::new();
        write_identities_to(&mut buffer, &table, &catalog, &result).unwrap();
        let content = to_string(buffer);
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(
            lines[0],
            "feature,cluster,molecule,formula,adduct,position,theoretical_mz,unsupported"
        );
        assert_eq!(lines[1], "f0,0,glucose,C6H12O6,M+H,0,181.0707,false");
        assert_eq!(lines[2], "f1,0,glucose,C6H12O6,M+H,1,182.0741,false");
        assert_eq!(lines[3], "f2,1,alanine,C3H7NO2,,,,true");
    }

    #[test]
    fn co_clustering_matrix_has_labelled_rows_and_columns() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 0.25, 0.25, 1.0]);
        let mut buffer = Vec::new();
        write_co_clustering_to(&mut buffer, &ids, &matrix).unwrap();

        assert_eq!(to_string(buffer), "feature,a,b\na,1,0.25\nb,0.25,1\n");
    }

    #[test]
    fn support_reports_fractions_of_samples() {
        let catalog = catalog();
        let result = identification(&catalog);
        let mut buffer = Vec::new();
        write_support_to(&mut buffer, &catalog, &result).unwrap();
        let content = to_string(buffer);

        assert!(content.starts_with("molecule,formula,support,fraction\n"));
        assert!(content.contains("glucose,C6H12O6,3,0.75\n"));
        assert!(content.contains("alanine,C3H7NO2,0,0.0\n"));
    }

    #[test]
    fn writing_to_a_missing_directory_fails_with_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("clusters.csv");
        let result = ClusteringResult {
            assignments: vec![0, 0, 0],
            clusters: vec![vec![0, 1, 2]],
            representatives: vec![0],
            score: 0.0,
            sample_scores: vec![],
            co_clustering: None,
        };

        assert!(matches!(write_clusters(&path, &table(), &result), Err(CliError::Io(_))));
    }
}
