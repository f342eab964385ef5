use rand::Rng;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum SamplingError {
    #[error("Input distribution is empty, cannot perform sampling")]
    EmptyDistribution,
    #[error("Distribution entry {index} is not a valid log-likelihood: {value}")]
    NonFiniteValue { index: usize, value: f64 },
    #[error("Every entry of the distribution has zero probability")]
    ZeroTotalWeight,
    #[error("Distribution entry {index} is not a valid probability: {value}")]
    InvalidProbability { index: usize, value: f64 },
}

/// Numerically stable running `ln Σ exp(x)`.
#[derive(Debug, Clone, Copy)]
pub struct LogSumExp {
    max: f64,
    scaled_sum: f64,
}

impl Default for LogSumExp {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSumExp {
    pub fn new() -> Self {
        Self {
            max: f64::NEG_INFINITY,
            scaled_sum: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        if value == f64::NEG_INFINITY {
            return;
        }
        if value <= self.max {
            self.scaled_sum += (value - self.max).exp();
        } else {
            self.scaled_sum = self.scaled_sum * (self.max - value).exp() + 1.0;
            self.max = value;
        }
    }

    /// The accumulated `ln Σ exp(x)`, `-∞` if nothing was added.
    pub fn value(&self) -> f64 {
        if self.scaled_sum == 0.0 {
            f64::NEG_INFINITY
        } else {
            self.max + self.scaled_sum.ln()
        }
    }
}

impl FromIterator<f64> for LogSumExp {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = LogSumExp::new();
        for v in iter {
            acc.add(v);
        }
        acc
    }
}

/// Turns log-weights into probabilities.
///
/// The maximum is subtracted before exponentiating. The `excluded` entry, if
/// any, takes no part in the normalisation and receives probability zero.
/// `NaN` and `+∞` entries are rejected; `-∞` entries get probability zero.
pub fn normalise_log_distribution(
    log_values: &[f64],
    excluded: Option<usize>,
) -> Result<Vec<f64>, SamplingError> {
    if log_values.is_empty() {
        return Err(SamplingError::EmptyDistribution);
    }

    let included = || {
        log_values
            .iter()
            .enumerate()
            .filter(move |(i, _)| Some(*i) != excluded)
    };

    let mut max = f64::NEG_INFINITY;
    for (index, &value) in included() {
        if value.is_nan() || value == f64::INFINITY {
            return Err(SamplingError::NonFiniteValue { index, value });
        }
        max = max.max(value);
    }
    if max == f64::NEG_INFINITY {
        return Err(SamplingError::ZeroTotalWeight);
    }

    let inner_sum: f64 = included().map(|(_, v)| (v - max).exp()).sum();
    let log_total = max + inner_sum.ln();

    let mut probabilities = vec![0.0; log_values.len()];
    for (i, &value) in included() {
        probabilities[i] = (value - log_total).exp();
    }
    Ok(probabilities)
}

/// Draws an index from a probability vector with a single uniform draw.
///
/// The cumulative sum is normalised so that the last non-zero entry is
/// exactly one; the first index whose cumulative probability exceeds the draw
/// is returned, so zero-probability entries are never selected.
#[instrument(level = "trace", skip_all, fields(len = probabilities.len()))]
pub fn sample_index(probabilities: &[f64], rng: &mut impl Rng) -> Result<usize, SamplingError> {
    if probabilities.is_empty() {
        return Err(SamplingError::EmptyDistribution);
    }

    let mut cumulative = Vec::with_capacity(probabilities.len());
    let mut total = 0.0;
    let mut last_positive = None;
    for (index, &p) in probabilities.iter().enumerate() {
        if !p.is_finite() || p < 0.0 {
            return Err(SamplingError::InvalidProbability { index, value: p });
        }
        if p > 0.0 {
            last_positive = Some(index);
        }
        total += p;
        cumulative.push(total);
    }
    let Some(last_positive) = last_positive else {
        return Err(SamplingError::ZeroTotalWeight);
    };

    for c in cumulative.iter_mut() {
        *c /= total;
    }
    cumulative[last_positive] = 1.0;

    let draw: f64 = rng.r#gen();
    let selected = cumulative
        .iter()
        .position(|&c| draw < c)
        .unwrap_or(last_positive);
    Ok(selected)
}

/// Normalises log-weights, draws an index, and returns it with its
/// unnormalised log-weight.
pub fn sample_log_distribution(
    log_values: &[f64],
    rng: &mut impl Rng,
) -> Result<(usize, f64), SamplingError> {
    let probabilities = normalise_log_distribution(log_values, None)?;
    let index = sample_index(&probabilities, rng)?;
    Ok((index, log_values[index]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn normalised_distribution_sums_to_one() {
        let p = normalise_log_distribution(&[-1000.0, -1001.0, -999.5, f64::NEG_INFINITY], None)
            .unwrap();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < TOLERANCE);
        assert!(p.iter().all(|&x| x >= 0.0));
        assert_eq!(p[3], 0.0);
    }

    #[test]
    fn excluded_entry_gets_zero_probability() {
        let p = normalise_log_distribution(&[0.0, 0.0, 0.0], Some(1)).unwrap();
        assert_eq!(p[1], 0.0);
        assert!((p[0] - 0.5).abs() < TOLERANCE);
        assert!((p[2] - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn excluded_entry_may_hold_any_value() {
        let p = normalise_log_distribution(&[0.0, f64::NAN], Some(1)).unwrap();
        assert_eq!(p, vec![1.0, 0.0]);
    }

    #[test]
    fn normalise_rejects_degenerate_input() {
        assert_eq!(
            normalise_log_distribution(&[], None),
            Err(SamplingError::EmptyDistribution)
        );
        assert!(matches!(
            normalise_log_distribution(&[0.0, f64::NAN], None),
            Err(SamplingError::NonFiniteValue { index: 1, .. })
        ));
        assert!(matches!(
            normalise_log_distribution(&[f64::INFINITY], None),
            Err(SamplingError::NonFiniteValue { index: 0, .. })
        ));
        assert_eq!(
            normalise_log_distribution(&[f64::NEG_INFINITY; 2], None),
            Err(SamplingError::ZeroTotalWeight)
        );
    }

    #[test]
    fn sample_index_never_picks_zero_probability_entries() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let probabilities = [0.0, 0.3, 0.0, 0.7, 0.0];
        for _ in 0..1000 {
            let i = sample_index(&probabilities, &mut rng).unwrap();
            assert!(i == 1 || i == 3);
        }
    }

    #[test]
    fn sample_index_follows_probabilities() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let probabilities = [0.2, 0.8];
        let draws = 10_000;
        let ones = (0..draws)
            .filter(|_| sample_index(&probabilities, &mut rng).unwrap() == 1)
            .count();
        let frequency = ones as f64 / draws as f64;
        assert!((frequency - 0.8).abs() < 0.03, "frequency = {frequency}");
    }

    #[test]
    fn sample_index_rejects_negative_and_all_zero_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(
            sample_index(&[0.5, -0.1], &mut rng),
            Err(SamplingError::InvalidProbability { index: 1, .. })
        ));
        assert_eq!(
            sample_index(&[0.0, 0.0], &mut rng),
            Err(SamplingError::ZeroTotalWeight)
        );
    }

    #[test]
    fn sample_log_distribution_returns_raw_log_value() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let (index, value) =
            sample_log_distribution(&[f64::NEG_INFINITY, -42.0], &mut rng).unwrap();
        assert_eq!(index, 1);
        assert_eq!(value, -42.0);
    }

    #[test]
    fn log_sum_exp_matches_direct_computation() {
        let values = [-1.0, 0.5, 2.0, f64::NEG_INFINITY];
        let acc: LogSumExp = values.iter().copied().collect();
        let direct = values.iter().map(|v| v.exp()).sum::<f64>().ln();
        assert!((acc.value() - direct).abs() < TOLERANCE);
        assert_eq!(LogSumExp::new().value(), f64::NEG_INFINITY);
    }

    #[test]
    fn log_sum_exp_handles_large_magnitudes() {
        let acc: LogSumExp = [-1.0e6, -1.0e6].into_iter().collect();
        assert!((acc.value() - (-1.0e6 + 2f64.ln())).abs() < 1e-6);
    }
}
