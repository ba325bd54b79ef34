use crate::prelude::{LidarError, LidarResult};

pub struct StatsHelper;

/// Ordinary least-squares fit `y = slope * x + intercept`.
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Standard error of the intercept with `n - 2` degrees of freedom.
    pub intercept_stderr: f64,
    pub residuals: Vec<f64>,
}

impl LinearFit {
    /// `|intercept / stderr|`; an exact fit through the origin scores zero.
    pub fn intercept_t(&self) -> f64 {
        if self.intercept_stderr > 0.0 {
            (self.intercept / self.intercept_stderr).abs()
        } else if self.intercept == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    }
}

impl StatsHelper {
    pub fn mean(samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Pearson correlation; `None` when either series has no variance.
    pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
        if x.len() != y.len() || x.len() < 2 {
            return None;
        }
        let (mx, my) = (Self::mean(x), Self::mean(y));
        let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
        for (&a, &b) in x.iter().zip(y) {
            sxy += (a - mx) * (b - my);
            sxx += (a - mx) * (a - mx);
            syy += (b - my) * (b - my);
        }
        if sxx <= 0.0 || syy <= 0.0 {
            return None;
        }
        Some(sxy / (sxx * syy).sqrt())
    }

    pub fn linear_fit(x: &[f64], y: &[f64]) -> LidarResult<LinearFit> {
        if x.len() != y.len() {
            return Err(LidarError::mismatch("linear fit", x.len(), y.len()));
        }
        let n = x.len();
        if n < 3 {
            return Err(LidarError::singular(format!(
                "{} points leave no residual degrees of freedom",
                n
            )));
        }
        let (mx, my) = (Self::mean(x), Self::mean(y));
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (&a, &b) in x.iter().zip(y) {
            sxx += (a - mx) * (a - mx);
            sxy += (a - mx) * (b - my);
        }
        let scale: f64 = x.iter().map(|v| v * v).sum();
        if !(sxx > scale * 1e-14) {
            return Err(LidarError::singular("regressor has zero variance"));
        }
        let slope = sxy / sxx;
        let intercept = my - slope * mx;
        let residuals: Vec<f64> = x
            .iter()
            .zip(y)
            .map(|(&a, &b)| b - (slope * a + intercept))
            .collect();
        let sse: f64 = residuals.iter().map(|r| r * r).sum();
        let variance = sse / (n - 2) as f64;
        let intercept_stderr = (variance * (1.0 / n as f64 + mx * mx / sxx)).sqrt();
        Ok(LinearFit {
            slope,
            intercept,
            intercept_stderr,
            residuals,
        })
    }

    /// Least-squares `k` minimising `sum((y - k x)^2)`.
    pub fn zero_intercept_slope(x: &[f64], y: &[f64]) -> LidarResult<f64> {
        if x.len() != y.len() {
            return Err(LidarError::mismatch("zero-intercept fit", x.len(), y.len()));
        }
        let sxx: f64 = x.iter().map(|v| v * v).sum();
        if sxx <= 0.0 || !sxx.is_finite() {
            return Err(LidarError::singular("regressor is identically zero"));
        }
        let sxy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
        Ok(sxy / sxx)
    }

    /// `min / max` of the samples; zero when the maximum is not positive.
    pub fn min_max_ratio(samples: &[f64]) -> f64 {
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if samples.is_empty() || max <= 0.0 {
            return 0.0;
        }
        min / max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_of_affine_series_is_one() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 1.0).collect();
        assert!((StatsHelper::pearson(&x, &y).unwrap() - 1.0).abs() < 1e-12);
        assert!(StatsHelper::pearson(&x, &[2.0; 4]).is_none());
    }

    #[test]
    fn linear_fit_recovers_line_and_intercept_error() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [1.1, 2.9, 5.1, 6.9, 9.1];
        let fit = StatsHelper::linear_fit(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 1.02).abs() < 1e-9);
        // sse = 0.048, s^2 = 0.048 / 3, se_b = sqrt(s^2 (1/5 + 4/10))
        let expected = (0.048f64 / 3.0 * 0.6).sqrt();
        assert!((fit.intercept_stderr - expected).abs() < 1e-9);
        assert!(fit.intercept_t() > 1.0);
    }

    #[test]
    fn constant_regressor_is_singular() {
        let err = StatsHelper::linear_fit(&[2.0; 5], &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap_err();
        assert!(matches!(err, LidarError::SingularFit { .. }));
    }

    #[test]
    fn zero_intercept_slope_matches_ratio() {
        let x = [1.0, 2.0, 4.0];
        let y = [0.5, 1.0, 2.0];
        assert!((StatsHelper::zero_intercept_slope(&x, &y).unwrap() - 0.5).abs() < 1e-12);
        assert!(StatsHelper::zero_intercept_slope(&[0.0; 3], &y).is_err());
    }

    #[test]
    fn min_max_ratio_handles_non_positive_maximum() {
        assert_eq!(StatsHelper::min_max_ratio(&[2.0, 4.0, 8.0]), 0.25);
        assert_eq!(StatsHelper::min_max_ratio(&[-1.0, -2.0]), 0.0);
    }
}
