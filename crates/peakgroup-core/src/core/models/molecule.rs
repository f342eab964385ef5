use super::feature::Polarity;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("Molecule catalog contains no usable molecules")]
    Empty,
    #[error("At least one adduct must be configured")]
    NoAdducts,
    #[error("At least one position per adduct must be kept")]
    NoPositionsPerAdduct,
    #[error("Molecule '{molecule}' has an invalid {field} value {value}")]
    InvalidValue {
        molecule: String,
        field: &'static str,
        value: f64,
    },
    #[error("Molecule '{molecule}' is listed with conflicting {field}")]
    Inconsistent {
        molecule: String,
        field: &'static str,
    },
}

/// Pruning rules applied when theoretical spectra are assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumLimits {
    pub adducts: Vec<String>,
    pub max_positions_per_adduct: usize,
    pub min_distribution_value: f64,
}

impl SpectrumLimits {
    /// Size of every molecule's position space, including the sentinel slot.
    pub fn max_positions(&self) -> usize {
        self.adducts.len() * self.max_positions_per_adduct + 1
    }
}

/// One row of a catalog listing: a single theoretical peak of a molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub molecule: String,
    pub formula: String,
    pub adduct: String,
    pub mz: f64,
    pub relative_intensity: f64,
    pub polarity: Polarity,
    pub retention_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumPosition {
    pub adduct: usize,
    pub mz: f64,
    pub log_mass: f64,
    pub relative_intensity: f64,
    pub polarity: Polarity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TheoreticalSpectrum {
    pub name: String,
    pub formula: String,
    pub retention_time: Option<f64>,
    positions: Vec<SpectrumPosition>,
}

impl TheoreticalSpectrum {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[SpectrumPosition] {
        &self.positions
    }

    pub fn position(&self, pos: usize) -> Option<&SpectrumPosition> {
        self.positions.get(pos)
    }

    pub fn log_mass(&self, pos: usize) -> Option<f64> {
        self.positions.get(pos).map(|p| p.log_mass)
    }

    pub fn relative_intensity(&self, pos: usize) -> Option<f64> {
        self.positions.get(pos).map(|p| p.relative_intensity)
    }

    pub fn adduct_of(&self, pos: usize) -> Option<usize> {
        self.positions.get(pos).map(|p| p.adduct)
    }

    /// Positions of one adduct and polarity, most intense first.
    pub fn ranked_positions(&self, polarity: Polarity, adduct: usize) -> Vec<usize> {
        let mut ranked: Vec<usize> = (0..self.positions.len())
            .filter(|&i| self.positions[i].polarity == polarity && self.positions[i].adduct == adduct)
            .collect();
        ranked.sort_by(|&a, &b| {
            self.positions[b]
                .relative_intensity
                .total_cmp(&self.positions[a].relative_intensity)
        });
        ranked
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MassIndexEntry {
    log_mass: f64,
    molecule: usize,
    position: usize,
}

/// The library of candidate molecules and their theoretical spectra.
#[derive(Debug, Clone)]
pub struct MoleculeCatalog {
    adducts: Vec<String>,
    max_positions: usize,
    molecules: Vec<TheoreticalSpectrum>,
    by_name: HashMap<String, usize>,
    by_formula: HashMap<String, Vec<usize>>,
    positive_index: Vec<MassIndexEntry>,
    negative_index: Vec<MassIndexEntry>,
}

impl MoleculeCatalog {
    /// Assembles spectra from catalog rows.
    ///
    /// Molecules keep the order in which they first appear. Peaks below
    /// `min_distribution_value` are dropped, and only the
    /// `max_positions_per_adduct` most intense peaks of each adduct are kept.
    /// Rows naming an adduct outside `limits.adducts` are skipped.
    pub fn from_rows<I>(rows: I, limits: &SpectrumLimits) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = CatalogRow>,
    {
        if limits.adducts.is_empty() {
            return Err(CatalogError::NoAdducts);
        }
        if limits.max_positions_per_adduct == 0 {
            return Err(CatalogError::NoPositionsPerAdduct);
        }

        let adduct_index: HashMap<&str, usize> = limits
            .adducts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.as_str(), i))
            .collect();

        let mut molecules: Vec<TheoreticalSpectrum> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut skipped_adducts = 0usize;

        for row in rows {
            let invalid = |field: &'static str, value: f64| CatalogError::InvalidValue {
                molecule: row.molecule.clone(),
                field,
                value,
            };
            if !row.mz.is_finite() || row.mz <= 0.0 {
                return Err(invalid("mz", row.mz));
            }
            if !row.relative_intensity.is_finite() || row.relative_intensity < 0.0 {
                return Err(invalid("intensity", row.relative_intensity));
            }
            if let Some(rt) = row.retention_time.filter(|rt| !rt.is_finite()) {
                return Err(invalid("retention time", rt));
            }

            let index = match by_name.get(&row.molecule) {
                Some(&index) => {
                    let existing = &mut molecules[index];
                    if existing.formula != row.formula {
                        return Err(CatalogError::Inconsistent {
                            molecule: row.molecule,
                            field: "formulae",
                        });
                    }
                    match (existing.retention_time, row.retention_time) {
                        (Some(a), Some(b)) if a != b => {
                            return Err(CatalogError::Inconsistent {
                                molecule: row.molecule,
                                field: "retention times",
                            });
                        }
                        (None, Some(b)) => existing.retention_time = Some(b),
                        _ => {}
                    }
                    index
                }
                None => {
                    let index = molecules.len();
                    by_name.insert(row.molecule.clone(), index);
                    molecules.push(TheoreticalSpectrum {
                        name: row.molecule.clone(),
                        formula: row.formula.clone(),
                        retention_time: row.retention_time,
                        positions: Vec::new(),
                    });
                    index
                }
            };

            let Some(&adduct) = adduct_index.get(row.adduct.as_str()) else {
                skipped_adducts += 1;
                warn!(
                    molecule = %row.molecule,
                    adduct = %row.adduct,
                    "Skipping catalog row with an unconfigured adduct"
                );
                continue;
            };
            if row.relative_intensity < limits.min_distribution_value {
                continue;
            }
            molecules[index].positions.push(SpectrumPosition {
                adduct,
                mz: row.mz,
                log_mass: row.mz.ln(),
                relative_intensity: row.relative_intensity,
                polarity: row.polarity,
            });
        }

        for spectrum in &mut molecules {
            truncate_positions(spectrum, limits.adducts.len(), limits.max_positions_per_adduct);
        }
        if molecules.is_empty() {
            return Err(CatalogError::Empty);
        }
        if skipped_adducts > 0 {
            warn!(rows = skipped_adducts, "Catalog rows skipped for unknown adducts");
        }

        Ok(Self::assemble(limits, molecules, by_name))
    }

    fn assemble(
        limits: &SpectrumLimits,
        molecules: Vec<TheoreticalSpectrum>,
        by_name: HashMap<String, usize>,
    ) -> Self {
        let mut by_formula: HashMap<String, Vec<usize>> = HashMap::new();
        let mut positive_index = Vec::new();
        let mut negative_index = Vec::new();
        for (m, spectrum) in molecules.iter().enumerate() {
            by_formula.entry(spectrum.formula.clone()).or_default().push(m);
            for (position, p) in spectrum.positions.iter().enumerate() {
                let entry = MassIndexEntry {
                    log_mass: p.log_mass,
                    molecule: m,
                    position,
                };
                match p.polarity {
                    Polarity::Positive => positive_index.push(entry),
                    Polarity::Negative => negative_index.push(entry),
                }
            }
        }
        positive_index.sort_by(|a, b| a.log_mass.total_cmp(&b.log_mass));
        negative_index.sort_by(|a, b| a.log_mass.total_cmp(&b.log_mass));

        Self {
            adducts: limits.adducts.clone(),
            max_positions: limits.max_positions(),
            molecules,
            by_name,
            by_formula,
            positive_index,
            negative_index,
        }
    }

    pub fn len(&self) -> usize {
        self.molecules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.molecules.is_empty()
    }

    pub fn adducts(&self) -> &[String] {
        &self.adducts
    }

    pub fn molecule(&self, m: usize) -> &TheoreticalSpectrum {
        &self.molecules[m]
    }

    pub fn molecules(&self) -> &[TheoreticalSpectrum] {
        &self.molecules
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Every molecule sharing `formula`, in catalog order.
    pub fn molecules_with_formula(&self, formula: &str) -> &[usize] {
        self.by_formula.get(formula).map_or(&[], Vec::as_slice)
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// The sentinel position for peaks no theoretical peak explains.
    pub fn default_position(&self) -> usize {
        self.max_positions - 1
    }

    fn mass_index(&self, polarity: Polarity) -> &[MassIndexEntry] {
        match polarity {
            Polarity::Positive => &self.positive_index,
            Polarity::Negative => &self.negative_index,
        }
    }

    /// All `(molecule, position)` pairs of the given polarity whose log-mass is
    /// within `tolerance` of `log_mass`.
    pub fn positions_within(
        &self,
        log_mass: f64,
        polarity: Polarity,
        tolerance: f64,
    ) -> impl Iterator<Item = (usize, usize)> + '_ {
        let index = self.mass_index(polarity);
        let start = index.partition_point(|e| e.log_mass < log_mass - tolerance);
        index[start..]
            .iter()
            .take_while(move |e| e.log_mass <= log_mass + tolerance)
            .map(|e| (e.molecule, e.position))
    }

    /// The theoretical peak of the given polarity closest in log-mass.
    pub fn nearest_position(&self, log_mass: f64, polarity: Polarity) -> Option<(usize, usize)> {
        let index = self.mass_index(polarity);
        let upper = index.partition_point(|e| e.log_mass < log_mass);
        let candidates = [upper.checked_sub(1), Some(upper)];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|i| index.get(i))
            .min_by(|a, b| {
                (a.log_mass - log_mass)
                    .abs()
                    .total_cmp(&(b.log_mass - log_mass).abs())
            })
            .map(|e| (e.molecule, e.position))
    }
}

fn truncate_positions(spectrum: &mut TheoreticalSpectrum, num_adducts: usize, max_per_adduct: usize) {
    let mut kept = Vec::with_capacity(spectrum.positions.len());
    for adduct in 0..num_adducts {
        let mut of_adduct: Vec<SpectrumPosition> = spectrum
            .positions
            .iter()
            .filter(|p| p.adduct == adduct)
            .cloned()
            .collect();
        of_adduct.sort_by(|a, b| b.relative_intensity.total_cmp(&a.relative_intensity));
        of_adduct.truncate(max_per_adduct);
        of_adduct.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        kept.extend(of_adduct);
    }
    spectrum.positions = kept;
}

/// Known relationships between molecules (e.g. shared reactions).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectivityNetwork {
    related: Vec<Vec<usize>>,
}

impl ConnectivityNetwork {
    pub fn new(num_molecules: usize) -> Self {
        Self {
            related: vec![Vec::new(); num_molecules],
        }
    }

    /// Records a symmetric relation between two molecules. Self-links are ignored.
    pub fn connect(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            let list = &mut self.related[from];
            if let Err(at) = list.binary_search(&to) {
                list.insert(at, to);
            }
        }
    }

    pub fn related(&self, molecule: usize) -> &[usize] {
        self.related.get(molecule).map_or(&[], Vec::as_slice)
    }

    pub fn num_molecules(&self) -> usize {
        self.related.len()
    }
}
