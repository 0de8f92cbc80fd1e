use serde::Deserialize;

/// Diagnostic distance between two contingency vectors.
///
/// Only used for reporting how far the published vectors drifted from the
/// raw ones; never feeds back into estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Manhattan,
    Euclidean,
    /// Total variation distance between the normalized vectors.
    Tvd,
    /// Cosine similarity (1.0 = identical direction).
    Cosine,
}

impl DistanceMetric {
    /// Compute the metric between two equal-length count vectors.
    pub fn compute(&self, a: &[i64], b: &[i64]) -> f64 {
        debug_assert!(a.len() == b.len(), "vector length mismatch");
        match self {
            DistanceMetric::Manhattan => {
                a.iter().zip(b).map(|(x, y)| (x - y).abs() as f64).sum()
            }
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| ((x - y) as f64).powi(2))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Tvd => {
                let sum_a = a.iter().sum::<i64>() as f64;
                let sum_b = b.iter().sum::<i64>() as f64;
                if sum_a == 0.0 || sum_b == 0.0 {
                    return 0.0;
                }
                0.5 * a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (*x as f64 / sum_a - *y as f64 / sum_b).abs())
                    .sum::<f64>()
            }
            DistanceMetric::Cosine => {
                let dot = a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum::<f64>();
                let norm_a = a.iter().map(|x| (x * x) as f64).sum::<f64>().sqrt();
                let norm_b = b.iter().map(|y| (y * y) as f64).sum::<f64>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 0.0;
                }
                dot / (norm_a * norm_b)
            }
        }
    }

    /// Short name for reporting.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Tvd => "tvd",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan() {
        let metric = DistanceMetric::Manhattan;
        assert_eq!(metric.compute(&[1, 2, 3], &[1, 2, 3]), 0.0);
        assert_eq!(metric.compute(&[1, 2, 3], &[0, 4, 3]), 3.0);
    }

    #[test]
    fn euclidean() {
        let metric = DistanceMetric::Euclidean;
        assert_eq!(metric.compute(&[0, 0], &[3, 4]), 5.0);
    }

    #[test]
    fn tvd_identical_is_zero() {
        let metric = DistanceMetric::Tvd;
        assert_eq!(metric.compute(&[2, 2], &[4, 4]), 0.0);
    }

    #[test]
    fn tvd_disjoint_is_one() {
        let metric = DistanceMetric::Tvd;
        assert!((metric.compute(&[1, 0], &[0, 1]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tvd_zero_sum_is_zero() {
        let metric = DistanceMetric::Tvd;
        assert_eq!(metric.compute(&[0, 0], &[1, 2]), 0.0);
    }

    #[test]
    fn cosine_parallel_is_one() {
        let metric = DistanceMetric::Cosine;
        assert!((metric.compute(&[1, 2], &[2, 4]) - 1.0).abs() < 1e-12);
        assert_eq!(metric.compute(&[0, 0], &[1, 1]), 0.0);
    }

    #[test]
    fn parses_from_json() {
        let metric: DistanceMetric = serde_json::from_str(r#""tvd""#).unwrap();
        assert_eq!(metric, DistanceMetric::Tvd);
        assert!(serde_json::from_str::<DistanceMetric>(r#""chebyshev""#).is_err());
    }
}
