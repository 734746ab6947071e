/// Median by partial selection (reorders the slice in place).
/// For even lengths this is the upper median. Returns 0.0 for an empty slice.
pub fn find_median(data: &mut [f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let k = data.len() / 2;
    let (_, median, _) = data.select_nth_unstable_by(k, f32::total_cmp);
    *median
}

/// Median absolute deviation scaled to a Gaussian sigma (1.4826 × MAD).
pub fn mad_sigma(data: &[f32], median: f32, scratch: &mut Vec<f32>) -> f32 {
    scratch.clear();
    scratch.extend(data.iter().map(|&x| (x - median).abs()));
    1.4826 * find_median(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_even() {
        let mut odd = [5.0, 1.0, 3.0];
        assert_eq!(find_median(&mut odd), 3.0);
        let mut even = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(find_median(&mut even), 3.0);
        let mut single = [7.0];
        assert_eq!(find_median(&mut single), 7.0);
        assert_eq!(find_median(&mut []), 0.0);
    }

    #[test]
    fn test_mad_sigma() {
        let data = [1.0, 2.0, 3.0, 4.0, 100.0];
        let mut scratch = Vec::new();
        // |x - 3| = 2,1,0,1,97 → MAD 1
        assert!((mad_sigma(&data, 3.0, &mut scratch) - 1.4826).abs() < 1e-6);
    }
}
