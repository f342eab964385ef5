use std::f64::consts::PI;

/// The width of one part-per-million in log-mass space.
pub const ONE_PPM: f64 = 0.000_000_999_999_500_000_333_3;

/// Log-density (or density) of a Normal distribution parameterised by its precision.
#[inline]
pub fn normal_density(x: f64, mu: f64, precision: f64, logged: bool) -> f64 {
    let diff = x - mu;
    let log_density = 0.5 * (precision.ln() - (2.0 * PI).ln() - precision * diff * diff);
    if logged { log_density } else { log_density.exp() }
}

/// Precision of the log-mass error model for a given ppm tolerance.
///
/// The tolerance is read as a two standard deviation window, so the standard
/// deviation is half of `ppm` expressed in log-mass units.
pub fn mass_precision(ppm: f64) -> f64 {
    let standard_deviation = ONE_PPM * ppm / 2.0;
    1.0 / (standard_deviation * standard_deviation)
}

/// Mean over the finite values of an iterator, `None` if there are none.
pub fn mean_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
