//! Small descriptive statistics over latency samples.

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median, averaging the middle pair for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Sample standard deviation (n - 1 denominator). Needs two values.
pub fn sample_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let var = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Cut points dividing `values` into `n` equal-probability intervals.
///
/// Uses the exclusive method: the data is treated as a sample from a
/// larger population, positions are `i * (len + 1) / n` with linear
/// interpolation between neighbours. Returns `n - 1` cut points, or
/// `None` when there are fewer than two values or `n < 2`.
pub fn quantiles(values: &[f64], n: usize) -> Option<Vec<f64>> {
    if values.len() < 2 || n < 2 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let len = sorted.len();
    let m = len + 1;
    let cuts = (1..n)
        .map(|i| {
            let j = (i * m / n).clamp(1, len - 1);
            // i * m may fall short of j * n after clamping at the low end
            let delta = (i * m) as f64 - (j * n) as f64;
            (sorted[j - 1] * (n as f64 - delta) + sorted[j] * delta) / n as f64
        })
        .collect();

    Some(cuts)
}

/// 95th percentile as used for latency summaries.
///
/// With 20 or more samples this is the 19th of the 20-quantile cut points;
/// smaller sets are too thin for a stable estimate and report the maximum.
pub fn percentile_95(values: &[f64]) -> Option<f64> {
    if values.len() >= 20 {
        quantiles(values, 20).map(|cuts| cuts[18])
    } else {
        values.iter().copied().reduce(f64::max)
    }
}
