//! Knee detection on convex, decreasing curves (Kneedle).

/// Default Kneedle sensitivity.
pub const DEFAULT_SENSITIVITY: f64 = 1.0;

fn normalize(values: &[f64]) -> Option<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > min) {
        return None;
    }
    Some(values.iter().map(|v| (v - min) / (max - min)).collect())
}

/// Index of the knee of the decreasing convex curve `(x[i], y[i])`, with sensitivity `s`.
///
/// `x` must be increasing. Returns `None` with fewer than three points, for a flat curve or
/// when the difference curve never drops below the threshold of a local maximum.
pub fn knee_index_with_sensitivity(x: &[f64], y: &[f64], s: f64) -> Option<usize> {
    let n = x.len();
    if n < 3 || y.len() != n {
        return None;
    }
    let xn = normalize(x)?;
    let yn = normalize(y)?;
    let diff: Vec<f64> = xn.iter().zip(&yn).map(|(xi, yi)| (1.0 - yi) - xi).collect();

    // Non-strict extrema with the ends clipped, so an endpoint or a flat stretch also counts.
    let prev = |i: usize| diff[i.saturating_sub(1)];
    let next = |i: usize| diff[(i + 1).min(n - 1)];
    let is_max = |i: usize| diff[i] >= prev(i) && diff[i] >= next(i);
    let is_min = |i: usize| diff[i] <= prev(i) && diff[i] <= next(i);
    let first_max = (0..n).find(|&i| is_max(i))?;

    // Mean spacing of the normalized x values.
    let step = 1.0 / (n - 1) as f64;
    let mut threshold = 0.0;
    let mut last_max = first_max;
    for i in first_max..n - 1 {
        if is_max(i) {
            threshold = diff[i] - s * step;
            last_max = i;
        }
        if is_min(i) {
            threshold = 0.0;
        }
        if diff[i + 1] < threshold {
            return Some(last_max);
        }
    }
    None
}

/// Index of the knee with the default sensitivity.
pub fn knee_index(x: &[f64], y: &[f64]) -> Option<usize> {
    knee_index_with_sensitivity(x, y, DEFAULT_SENSITIVITY)
}
