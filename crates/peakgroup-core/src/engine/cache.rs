/// One stored `(molecule, position) -> value` entry of a feature's row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub molecule: usize,
    pub position: usize,
    pub value: f64,
}

impl CacheEntry {
    #[inline]
    fn key(&self) -> (usize, usize) {
        (self.molecule, self.position)
    }
}

/// Sparse per-feature store of log-likelihoods keyed by `(molecule, position)`.
///
/// Each feature owns one row kept sorted by key, so the non-zero listing of a
/// row is a plain slice that stays valid until the next write to that row.
/// Missing keys mean zero probability; there is no stored "zero".
#[derive(Debug, Clone, Default)]
pub struct ScoringCache {
    rows: Vec<Vec<CacheEntry>>,
}

impl ScoringCache {
    pub fn new(num_features: usize) -> Self {
        Self {
            rows: vec![Vec::new(); num_features],
        }
    }

    pub fn num_features(&self) -> usize {
        self.rows.len()
    }

    /// Total number of stored entries.
    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    pub fn row_len(&self, feature: usize) -> usize {
        self.rows[feature].len()
    }

    fn locate(&self, feature: usize, molecule: usize, position: usize) -> Result<usize, usize> {
        self.rows[feature].binary_search_by_key(&(molecule, position), CacheEntry::key)
    }

    pub fn get(&self, feature: usize, molecule: usize, position: usize) -> Option<f64> {
        self.locate(feature, molecule, position)
            .ok()
            .map(|i| self.rows[feature][i].value)
    }

    pub fn set(&mut self, feature: usize, molecule: usize, position: usize, value: f64) {
        debug_assert!(!value.is_nan(), "NaN stored in scoring cache");
        match self.locate(feature, molecule, position) {
            Ok(i) => self.rows[feature][i].value = value,
            Err(i) => self.rows[feature].insert(
                i,
                CacheEntry {
                    molecule,
                    position,
                    value,
                },
            ),
        }
    }

    /// Adds to the stored value, treating a missing entry as zero.
    pub fn add(&mut self, feature: usize, molecule: usize, position: usize, value: f64) {
        match self.locate(feature, molecule, position) {
            Ok(i) => self.rows[feature][i].value += value,
            Err(_) => self.set(feature, molecule, position, value),
        }
    }

    /// Every stored entry of a feature, ordered by `(molecule, position)`.
    pub fn non_zeros(&self, feature: usize) -> &[CacheEntry] {
        &self.rows[feature]
    }

    /// The contiguous entries of one molecule within a feature's row.
    pub fn positions(&self, feature: usize, molecule: usize) -> &[CacheEntry] {
        let row = &self.rows[feature];
        let start = row.partition_point(|e| e.molecule < molecule);
        let end = start + row[start..].partition_point(|e| e.molecule == molecule);
        &row[start..end]
    }

    /// Replaces a whole row; entries are sorted on the way in.
    pub fn set_row(&mut self, feature: usize, mut entries: Vec<CacheEntry>) {
        entries.sort_by_key(CacheEntry::key);
        entries.dedup_by_key(|e| e.key());
        self.rows[feature] = entries;
    }
}
