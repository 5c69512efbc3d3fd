use serde::{Deserialize, Serialize};

/// Summary statistics of all values recorded for a timer in one flush.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct TimerSummary {
    /// Number of recorded values.
    pub count: u64,
    /// The smallest value.
    pub min: f64,
    /// The largest value.
    pub max: f64,
    /// Arithmetic mean of all values.
    pub mean: f64,
    /// Sum of all values.
    pub sum: f64,
    /// The middle value. For an even count, the mean of the two middle values.
    pub median: f64,
    /// Population standard deviation.
    pub stddev: f64,
}

impl TimerSummary {
    /// Computes the summary of the given values.
    ///
    /// Returns `None` if `values` is empty.
    ///
    /// ```
    /// use mouth_metrics::TimerSummary;
    ///
    /// let summary = TimerSummary::from_values(&[3.0, 1.0, 2.0]).unwrap();
    /// assert_eq!(summary.median, 2.0);
    /// ```
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let min = *sorted.first()?;
        let max = *sorted.last()?;
        let sum: f64 = sorted.iter().sum();
        let mean = sum / count as f64;

        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        let variance = sorted
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / count as f64;

        Some(Self {
            count: count as u64,
            min,
            max,
            mean,
            sum,
            median,
            stddev: variance.sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(TimerSummary::from_values(&[]), None);
    }

    #[test]
    fn test_single_value() {
        let summary = TimerSummary::from_values(&[5.0]).unwrap();
        assert_eq!(
            summary,
            TimerSummary {
                count: 1,
                min: 5.0,
                max: 5.0,
                mean: 5.0,
                sum: 5.0,
                median: 5.0,
                stddev: 0.0,
            }
        );
    }

    #[test]
    fn test_even_count() {
        let summary = TimerSummary::from_values(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
        assert_eq!(summary.sum, 10.0);
        assert_eq!(summary.mean, 2.5);
        assert_eq!(summary.median, 2.5);
        assert!((summary.stddev - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_odd_count() {
        let summary = TimerSummary::from_values(&[10.0, 2.0, 9.0, 4.0, 5.0]).unwrap();
        assert_eq!(summary.median, 5.0);
        assert_eq!(summary.mean, 6.0);
    }

    #[test]
    fn test_serialize() {
        let summary = TimerSummary::from_values(&[2.0, 4.0]).unwrap();
        insta::assert_json_snapshot!(summary, @r###"
        {
          "count": 2,
          "min": 2.0,
          "max": 4.0,
          "mean": 3.0,
          "sum": 6.0,
          "median": 3.0,
          "stddev": 1.0
        }
        "###);
    }
}
