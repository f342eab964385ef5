use serde::Deserialize;

/// A chromatographic trace: intensities sampled at retention times.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    times: Vec<f64>,
    intensities: Vec<f64>,
}

impl Signal {
    /// Builds a signal from parallel arrays, sorting the points by time.
    ///
    /// Returns `None` when the arrays are empty, differ in length, or hold
    /// non-finite values.
    pub fn new(times: Vec<f64>, intensities: Vec<f64>) -> Option<Self> {
        if times.is_empty() || times.len() != intensities.len() {
            return None;
        }
        if times.iter().chain(&intensities).any(|v| !v.is_finite()) {
            return None;
        }

        let mut points: Vec<(f64, f64)> = times.into_iter().zip(intensities).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (times, intensities) = points.into_iter().unzip();
        Some(Self { times, intensities })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    /// Returns a copy scaled so that the most intense point equals one.
    pub fn normalized(&self) -> Self {
        let max = self.intensities.iter().copied().fold(f64::MIN, f64::max);
        if max <= 0.0 {
            return self.clone();
        }
        Self {
            times: self.times.clone(),
            intensities: self.intensities.iter().map(|y| y / max).collect(),
        }
    }

    /// Linearly interpolated intensity at `time`, zero outside the sampled range.
    pub fn value_at(&self, time: f64) -> f64 {
        let (Some(&first), Some(&last)) = (self.times.first(), self.times.last()) else {
            return 0.0;
        };
        if time < first || time > last {
            return 0.0;
        }

        let upper = self.times.partition_point(|&t| t < time);
        if self.times[upper] == time {
            return self.intensities[upper];
        }
        let lower = upper - 1;
        let (x0, x1) = (self.times[lower], self.times[upper]);
        let (y0, y1) = (self.intensities[lower], self.intensities[upper]);
        y0 + (y1 - y0) * (time - x0) / (x1 - x0)
    }
}

/// Similarity measure between two signal shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorrelationMeasure {
    #[default]
    Pearson,
    Cosine,
}

impl CorrelationMeasure {
    /// The interval the measure's values are reported in.
    pub fn range(&self) -> (f64, f64) {
        match self {
            CorrelationMeasure::Pearson => (-1.0, 1.0),
            CorrelationMeasure::Cosine => (0.0, 1.0),
        }
    }

    pub fn correlation(&self, a: &Signal, b: &Signal) -> f64 {
        let (xs, ys) = synchronized_values(a, b);
        match self {
            CorrelationMeasure::Pearson => pearson(&xs, &ys),
            CorrelationMeasure::Cosine => cosine(&xs, &ys),
        }
    }
}

/// Evaluates both normalized signals at the union of their sampling times.
fn synchronized_values(a: &Signal, b: &Signal) -> (Vec<f64>, Vec<f64>) {
    let a = a.normalized();
    let b = b.normalized();
    let total = a.len() + b.len();
    let mut xs = Vec::with_capacity(total);
    let mut ys = Vec::with_capacity(total);

    for (&t, &y) in a.times.iter().zip(&a.intensities) {
        xs.push(y);
        ys.push(b.value_at(t));
    }
    for (&t, &y) in b.times.iter().zip(&b.intensities) {
        xs.push(a.value_at(t));
        ys.push(y);
    }
    (xs, ys)
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&x, &y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    sxy / (sxx * syy).sqrt()
}

fn cosine(xs: &[f64], ys: &[f64]) -> f64 {
    let (mut xy, mut xx, mut yy) = (0.0, 0.0, 0.0);
    for (&x, &y) in xs.iter().zip(ys) {
        xy += x * y;
        xx += x * x;
        yy += y * y;
    }
    if xx == 0.0 || yy == 0.0 {
        return 0.0;
    }
    xy / (xx * yy).sqrt()
}
