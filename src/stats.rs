//! Small statistics helpers shared by the analyzer and the calibration computer.

/// Arithmetic mean, 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation, 0.0 for an empty slice
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Pearson correlation coefficient between two paired series.
///
/// Returns 0.0 when fewer than two pairs are available or when either series
/// has zero variance. Extra elements of the longer series are ignored.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let len = xs.len().min(ys.len());
    if len < 2 {
        return 0.0;
    }

    let xs = &xs[..len];
    let ys = &ys[..len];
    let mean_x = mean(xs);
    let mean_y = mean(ys);

    let mut numerator = 0.0;
    let mut denom_x = 0.0;
    let mut denom_y = 0.0;

    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        numerator += dx * dy;
        denom_x += dx * dx;
        denom_y += dy * dy;
    }

    let denominator = (denom_x * denom_y).sqrt();
    if denominator > 0.0 {
        (numerator / denominator).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Fraction of `outcomes` that are `true`, 0.0 when empty
pub fn hit_rate<I>(outcomes: I) -> f64
where
    I: IntoIterator<Item = bool>,
{
    let (hits, total) = outcomes
        .into_iter()
        .fold((0usize, 0usize), |(h, t), o| (h + o as usize, t + 1));
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
