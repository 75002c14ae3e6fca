//! Linear-interpolation sample-rate conversion.

/// Resamples `samples` from `from_rate` to `to_rate`.
///
/// Output length is `round(len * to_rate / from_rate)`. Output index `i` reads
/// source position `i * from_rate / to_rate` and blends its two neighbours;
/// when no right-hand neighbour exists the last source sample is used as is.
/// Identity when the rates match (or either rate is zero).
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = output_len(samples.len(), from_rate, to_rate);
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(last);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx < last {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left * (1.0 - fraction) + right * fraction
            } else {
                samples[source_idx]
            }
        })
        .collect()
}

/// Number of samples [`resample`] produces for `len` input samples.
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return len;
    }
    (len as f64 * to_rate as f64 / from_rate as f64).round() as usize
}
