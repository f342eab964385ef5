use super::{LoadError, csv_line, display_path};
use crate::core::models::feature::{ParsePolarityError, Polarity};
use crate::core::models::molecule::{
    CatalogRow, ConnectivityNetwork, MoleculeCatalog, SpectrumLimits,
};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    molecule: String,
    formula: String,
    adduct: String,
    mz: f64,
    intensity: f64,
    polarity: String,
    rt: Option<f64>,
}

/// Reads theoretical spectra from a CSV with header
/// `molecule,formula,adduct,mz,intensity,polarity,rt` (`rt` may be empty).
#[instrument(skip_all, name = "load_catalog")]
pub fn load_catalog(path: &Path, limits: &SpectrumLimits) -> Result<MoleculeCatalog, LoadError> {
    let path_str = display_path(path);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize::<CatalogRecord>().enumerate() {
        let record = result.map_err(|e| LoadError::Csv {
            path: path_str.clone(),
            source: e,
        })?;
        let polarity: Polarity = record.polarity.parse().map_err(|e: ParsePolarityError| {
            LoadError::InvalidRecord {
                path: path_str.clone(),
                line: csv_line(i),
                reason: e.to_string(),
            }
        })?;
        rows.push(CatalogRow {
            molecule: record.molecule,
            formula: record.formula,
            adduct: record.adduct,
            mz: record.mz,
            relative_intensity: record.intensity,
            polarity,
            retention_time: record.rt,
        });
    }

    let catalog = MoleculeCatalog::from_rows(rows, limits).map_err(|e| LoadError::Catalog {
        path: path_str.clone(),
        source: e,
    })?;
    debug!(molecules = catalog.len(), "Loaded molecule catalog");
    Ok(catalog)
}

/// Reads a connectivity network: one molecule per line followed by the
/// molecules related to it, separated by whitespace. Blank lines and lines
/// starting with `#` are ignored.
#[instrument(skip_all, name = "load_network")]
pub fn load_network(path: &Path, catalog: &MoleculeCatalog) -> Result<ConnectivityNetwork, LoadError> {
    let path_str = display_path(path);
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path_str.clone(),
        source: e,
    })?;

    let resolve = |name: &str| {
        catalog
            .index_of(name)
            .ok_or_else(|| LoadError::UnknownMolecule {
                path: path_str.clone(),
                name: name.to_string(),
            })
    };

    let mut network = ConnectivityNetwork::new(catalog.len());
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut names = line.split_whitespace();
        let Some(head) = names.next() else { continue };
        let from = resolve(head)?;
        for name in names {
            network.connect(from, resolve(name)?);
        }
    }
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CATALOG: &str = "\
molecule,formula,adduct,mz,intensity,polarity,rt
glucose,C6H12O6,M+H,181.0707,0.92,+,300
glucose,C6H12O6,M-H,179.0561,0.92,-,300
alanine,C3H7NO2,M+H,90.0550,0.96,+,
serine,C3H7NO3,M+H,106.0499,0.96,+,
";

    fn limits() -> SpectrumLimits {
        SpectrumLimits {
            adducts: vec!["M+H".to_string(), "M-H".to_string()],
            max_positions_per_adduct: 3,
            min_distribution_value: 1e-5,
        }
    }

    #[test]
    fn load_catalog_reads_rows_and_retention_times() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        fs::write(&path, CATALOG).unwrap();

        let catalog = load_catalog(&path, &limits()).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.molecule(0).retention_time, Some(300.0));
        assert_eq!(catalog.molecule(1).retention_time, None);
        assert_eq!(catalog.molecule(0).len(), 2);
    }

    #[test]
    fn load_catalog_fails_for_bad_polarity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        fs::write(
            &path,
            "molecule,formula,adduct,mz,intensity,polarity,rt\nx,C,M+H,10,1,up,\n",
        )
        .unwrap();
        assert!(matches!(
            load_catalog(&path, &limits()),
            Err(LoadError::InvalidRecord { line: 2, .. })
        ));
    }

    #[test]
    fn load_network_links_named_molecules() {
        let dir = tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.csv");
        let network_path = dir.path().join("network.txt");
        fs::write(&catalog_path, CATALOG).unwrap();
        fs::write(&network_path, "# reactions\nalanine serine\n\nglucose\n").unwrap();

        let catalog = load_catalog(&catalog_path, &limits()).unwrap();
        let network = load_network(&network_path, &catalog).unwrap();
        assert_eq!(network.related(1), &[2]);
        assert_eq!(network.related(2), &[1]);
        assert!(network.related(0).is_empty());
    }

    #[test]
    fn load_network_rejects_unknown_names() {
        let dir = tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.csv");
        let network_path = dir.path().join("network.txt");
        fs::write(&catalog_path, CATALOG).unwrap();
        fs::write(&network_path, "alanine unobtainium\n").unwrap();

        let catalog = load_catalog(&catalog_path, &limits()).unwrap();
        assert!(matches!(
            load_network(&network_path, &catalog),
            Err(LoadError::UnknownMolecule { name, .. }) if name == "unobtainium"
        ));
    }
}
