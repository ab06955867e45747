//! Five-number summaries for box plots.

use serde::{Deserialize, Serialize};

/// Whisker reach as a multiple of the interquartile range.
pub const WHISKER_IQR: f64 = 1.5;

/// Quantile of sorted data by linear interpolation between order
/// statistics: position `(n - 1) * q`.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Box plot statistics for one group of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSummary {
    /// Number of values.
    pub n: usize,
    /// First quartile.
    pub q1: f64,
    /// Median.
    pub median: f64,
    /// Third quartile.
    pub q3: f64,
    /// Smallest value within `q1 - 1.5 * IQR`.
    pub lower_whisker: f64,
    /// Largest value within `q3 + 1.5 * IQR`.
    pub upper_whisker: f64,
    /// Values beyond the whiskers, ascending.
    pub outliers: Vec<f64>,
}

impl BoxSummary {
    /// Interquartile range.
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Summarize `values` for a box plot. Non-finite values are ignored;
/// returns `None` when nothing is left.
pub fn box_summary(values: &[f64]) -> Option<BoxSummary> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let q1 = quantile(&sorted, 0.25)?;
    let median = quantile(&sorted, 0.5)?;
    let q3 = quantile(&sorted, 0.75)?;
    let iqr = q3 - q1;
    let low_fence = q1 - WHISKER_IQR * iqr;
    let high_fence = q3 + WHISKER_IQR * iqr;

    let lower_whisker = sorted
        .iter()
        .copied()
        .find(|&v| v >= low_fence)
        .unwrap_or(q1);
    let upper_whisker = sorted
        .iter()
        .rev()
        .copied()
        .find(|&v| v <= high_fence)
        .unwrap_or(q3);
    let outliers = sorted
        .iter()
        .copied()
        .filter(|&v| v < lower_whisker || v > upper_whisker)
        .collect();

    Some(BoxSummary {
        n: sorted.len(),
        q1,
        median,
        q3,
        lower_whisker,
        upper_whisker,
        outliers,
    })
}

/// Group `ys` by the distinct values of `xs` and summarize each group.
/// Groups are returned in ascending order of x.
pub fn grouped_box_summaries(xs: &[f64], ys: &[f64]) -> Vec<(f64, BoxSummary)> {
    let mut keys: Vec<f64> = xs.iter().copied().filter(|v| v.is_finite()).collect();
    keys.sort_by(f64::total_cmp);
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let group: Vec<f64> = xs
                .iter()
                .zip(ys)
                .filter(|(x, _)| **x == key)
                .map(|(_, y)| *y)
                .collect();
            box_summary(&group).map(|s| (key, s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_linear_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile(&sorted, 0.25).unwrap(), 1.75);
        assert_relative_eq!(quantile(&sorted, 0.5).unwrap(), 2.5);
        assert_relative_eq!(quantile(&sorted, 0.75).unwrap(), 3.25);
        assert_relative_eq!(quantile(&sorted, 0.0).unwrap(), 1.0);
        assert_relative_eq!(quantile(&sorted, 1.0).unwrap(), 4.0);
        assert!(quantile(&[], 0.5).is_none());
        assert!(quantile(&sorted, 1.5).is_none());
    }

    #[test]
    fn test_box_summary_with_outlier() {
        let values = [3.0, 1.0, 2.0, 5.0, 4.0, 100.0];
        let s = box_summary(&values).unwrap();

        assert_eq!(s.n, 6);
        assert_relative_eq!(s.q1, 2.25);
        assert_relative_eq!(s.median, 3.5);
        assert_relative_eq!(s.q3, 4.75);
        assert_relative_eq!(s.lower_whisker, 1.0);
        assert_relative_eq!(s.upper_whisker, 5.0);
        assert_eq!(s.outliers, vec![100.0]);
        for o in &s.outliers {
            assert!(*o < s.lower_whisker || *o > s.upper_whisker);
        }
    }

    #[test]
    fn test_box_summary_single_value() {
        let s = box_summary(&[7.0]).unwrap();
        assert_eq!(s.q1, 7.0);
        assert_eq!(s.q3, 7.0);
        assert_eq!(s.lower_whisker, 7.0);
        assert!(s.outliers.is_empty());
        assert!(box_summary(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_grouped_summaries_sorted_by_x() {
        let xs = [5.0, 2.0, 2.0, 5.0, 3.0];
        let ys = [10.0, 1.0, 3.0, 20.0, 7.0];
        let groups = grouped_box_summaries(&xs, &ys);

        let keys: Vec<f64> = groups.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![2.0, 3.0, 5.0]);
        assert_relative_eq!(groups[0].1.median, 2.0);
        assert_relative_eq!(groups[2].1.median, 15.0);
        assert_eq!(groups[1].1.n, 1);
    }
}
