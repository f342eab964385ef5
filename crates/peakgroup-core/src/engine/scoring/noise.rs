use crate::engine::config::ConfigError;
use statrs::function::beta::ln_beta;
use std::f64::consts::PI;

const CLAMP_LOW: f64 = 0.001;
const CLAMP_HIGH: f64 = 0.999;

/// Likelihood of a shape correlation given that two features are, or are
/// not, from the same analyte.
///
/// Each model splits its log-likelihood into a constant term, which also
/// absorbs the probability `1 - p` of the pair being inside the retention-time
/// window, and a correlation-dependent term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseModel {
    Exponential { lambda: f64 },
    Normal { mean: f64, variance: f64 },
    /// Beta(α1, 1): mass piled up near perfect correlation.
    BetaIn { alpha1: f64 },
    /// Beta(α0, α0): symmetric around the middle of the correlation range.
    BetaOut { alpha0: f64 },
}

impl NoiseModel {
    pub fn constant_term(&self, p: f64) -> f64 {
        let in_window = (1.0 - p).ln();
        match *self {
            NoiseModel::Exponential { lambda } => in_window + lambda.ln(),
            NoiseModel::Normal { variance, .. } => in_window - 0.5 * (2.0 * PI * variance).ln(),
            NoiseModel::BetaIn { alpha1 } => in_window - ln_beta(alpha1, 1.0),
            NoiseModel::BetaOut { alpha0 } => in_window - ln_beta(alpha0, alpha0),
        }
    }

    /// `range` is the `(lower, upper)` interval the correlation is reported in.
    pub fn correlation_term(&self, correlation: f64, range: (f64, f64)) -> f64 {
        match *self {
            NoiseModel::Exponential { lambda } => -lambda * (1.0 - correlation),
            NoiseModel::Normal { mean, variance } => {
                let diff = correlation - mean;
                -(diff * diff) / (2.0 * variance)
            }
            NoiseModel::BetaIn { alpha1 } => {
                let c = rescale(correlation, range);
                (alpha1 - 1.0) * c.ln()
            }
            NoiseModel::BetaOut { alpha0 } => {
                let c = rescale(correlation, range);
                (alpha0 - 1.0) * (c * (1.0 - c)).ln()
            }
        }
    }

    pub fn log_likelihood(&self, p: f64, correlation: f64, range: (f64, f64)) -> f64 {
        self.constant_term(p) + self.correlation_term(correlation, range)
    }

    pub(crate) fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        let (param, value) = match *self {
            NoiseModel::Exponential { lambda } => ("rate", lambda),
            NoiseModel::Normal { variance, mean } => {
                if !mean.is_finite() {
                    return Err(ConfigError::InvalidParameter {
                        name,
                        reason: format!("mean must be finite, got {mean}"),
                    });
                }
                ("variance", variance)
            }
            NoiseModel::BetaIn { alpha1 } => ("alpha1", alpha1),
            NoiseModel::BetaOut { alpha0 } => ("alpha0", alpha0),
        };
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidParameter {
                name,
                reason: format!("{param} must be positive, got {value}"),
            })
        }
    }
}

/// Maps a correlation onto the unit interval, clamped away from the edges.
fn rescale(correlation: f64, (lower, upper): (f64, f64)) -> f64 {
    ((correlation - lower) / (upper - lower)).clamp(CLAMP_LOW, CLAMP_HIGH)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;
    const PEARSON: (f64, f64) = (-1.0, 1.0);

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    #[test]
    fn exponential_terms_match_closed_form() {
        let model = NoiseModel::Exponential { lambda: 2.0 };
        assert!(f64_approx_equal(model.constant_term(0.1), (0.9f64 * 2.0).ln()));
        assert!(f64_approx_equal(model.correlation_term(0.5, PEARSON), -1.0));
    }

    #[test]
    fn normal_terms_match_closed_form() {
        let model = NoiseModel::Normal {
            mean: 0.8,
            variance: 0.04,
        };
        let expected = (0.5f64 / (2.0 * PI * 0.04).sqrt()).ln();
        assert!(f64_approx_equal(model.constant_term(0.5), expected));
        assert!(f64_approx_equal(
            model.correlation_term(0.6, PEARSON),
            -(0.2 * 0.2) / 0.08
        ));
    }

    #[test]
    fn beta_in_integrates_with_beta_function() {
        // B(a, 1) = 1 / a.
        let model = NoiseModel::BetaIn { alpha1: 10.0 };
        assert!(f64_approx_equal(
            model.constant_term(0.001),
            0.999f64.ln() + 10f64.ln()
        ));
        assert!(f64_approx_equal(
            model.correlation_term(1.0, PEARSON),
            9.0 * 0.999f64.ln()
        ));
    }

    #[test]
    fn beta_out_is_symmetric_about_zero_correlation() {
        let model = NoiseModel::BetaOut { alpha0: 2.0 };
        let a = model.correlation_term(0.4, PEARSON);
        let b = model.correlation_term(-0.4, PEARSON);
        assert!(f64_approx_equal(a, b));
        // B(2, 2) = 1 / 6.
        assert!(f64_approx_equal(model.constant_term(0.97), 0.03f64.ln() + 6f64.ln()));
    }

    #[test]
    fn rescaled_correlation_is_clamped() {
        assert_eq!(rescale(-1.0, PEARSON), CLAMP_LOW);
        assert_eq!(rescale(1.0, PEARSON), CLAMP_HIGH);
        assert!(f64_approx_equal(rescale(0.5, (0.0, 1.0)), 0.5));
        let model = NoiseModel::BetaIn { alpha1: 3.0 };
        assert!(model.correlation_term(-1.0, PEARSON).is_finite());
    }

    #[test]
    fn validate_rejects_non_positive_parameters() {
        assert!(NoiseModel::Exponential { lambda: 0.0 }.validate("m").is_err());
        assert!(
            NoiseModel::Normal {
                mean: 0.0,
                variance: -1.0
            }
            .validate("m")
            .is_err()
        );
        assert!(NoiseModel::BetaOut { alpha0: 2.0 }.validate("m").is_ok());
    }
}
