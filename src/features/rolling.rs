/// Trailing-window z-score for every position of `values`.
///
/// Position `i` is scored against the `window` values ending at `i`
/// (inclusive) using the sample standard deviation. Positions without a full
/// window, and windows with zero variance, score 0.
pub fn rolling_z_scores(values: &[f64], window: usize) -> Vec<f64> {
    let mut scores = vec![0.0; values.len()];
    if window < 2 || values.len() < window {
        return scores;
    }

    for (offset, slice) in values.windows(window).enumerate() {
        let n = window as f64;
        let mean = slice.iter().sum::<f64>() / n;
        let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();

        let idx = offset + window - 1;
        let z = (values[idx] - mean) / std;
        scores[idx] = if std > 0.0 && z.is_finite() { z } else { 0.0 };
    }
    scores
}
