use crate::prelude::{LidarError, LidarResult};
use nalgebra::DMatrix;

/// Sliding polynomial least-squares filter.
///
/// Points closer than half a window to either edge are evaluated on the
/// polynomial fitted to the first (or last) complete window instead of padding
/// the input.
pub struct SavitzkyGolay {
    window: usize,
    order: usize,
    /// Maps a window of samples to polynomial coefficients in `u = (j - half) / half`.
    projection: DMatrix<f64>,
}

impl SavitzkyGolay {
    pub fn new(window: usize, order: usize) -> LidarResult<Self> {
        if window % 2 == 0 || window <= order {
            return Err(LidarError::InvalidInput(format!(
                "filter window {} must be odd and exceed polynomial order {}",
                window, order
            )));
        }
        let half = (window - 1) / 2;
        let scale = half.max(1) as f64;
        let design = DMatrix::<f64>::from_fn(window, order + 1, |j, k| {
            ((j as f64 - half as f64) / scale).powi(k as i32)
        });
        let normal = design.transpose() * &design;
        let projection = normal
            .lu()
            .solve(&design.transpose())
            .ok_or_else(|| LidarError::singular(format!("normal equations of order {}", order)))?;
        Ok(Self {
            window,
            order,
            projection,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn smooth(&self, samples: &[f64]) -> LidarResult<Vec<f64>> {
        self.derivative(samples, 0, 1.0)
    }

    /// `deriv`-th derivative of the local fit, for samples spaced `delta` apart.
    pub fn derivative(&self, samples: &[f64], deriv: usize, delta: f64) -> LidarResult<Vec<f64>> {
        let n = samples.len();
        if n < self.window {
            return Err(LidarError::InvalidInput(format!(
                "{} samples are fewer than the filter window {}",
                n, self.window
            )));
        }
        if deriv > self.order {
            return Ok(vec![0.0; n]);
        }
        let half = (self.window - 1) / 2;
        let scale = half.max(1) as f64;
        let step = (scale * delta).powi(deriv as i32);

        let mut output = Vec::with_capacity(n);
        let mut coeffs = vec![0.0; self.order + 1];
        for i in 0..n {
            let start = i.saturating_sub(half).min(n - self.window);
            let window = &samples[start..start + self.window];
            for (k, coeff) in coeffs.iter_mut().enumerate() {
                *coeff = self
                    .projection
                    .row(k)
                    .iter()
                    .zip(window)
                    .map(|(p, y)| p * y)
                    .sum();
            }
            let t0 = (i as f64 - (start + half) as f64) / scale;
            let value: f64 = (deriv..=self.order)
                .map(|k| coeffs[k] * falling_factorial(k, deriv) * t0.powi((k - deriv) as i32))
                .sum();
            output.push(value / step);
        }
        Ok(output)
    }
}

fn falling_factorial(k: usize, d: usize) -> f64 {
    ((k - d + 1)..=k).map(|v| v as f64).product()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_passes_through_unchanged_including_edges() {
        let samples: Vec<f64> = (0..20)
            .map(|i| {
                let x = i as f64;
                0.01 * x * x * x - 0.3 * x * x + 2.0 * x + 5.0
            })
            .collect();
        let filter = SavitzkyGolay::new(7, 3).unwrap();
        let smoothed = filter.smooth(&samples).unwrap();
        for (a, b) in smoothed.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn five_point_quadratic_matches_tabulated_weights() {
        let filter = SavitzkyGolay::new(5, 2).unwrap();
        let expected = [-3.0, 12.0, 17.0, 12.0, -3.0];
        for (j, weight) in expected.iter().enumerate() {
            let mut impulse = vec![0.0; 5];
            impulse[j] = 1.0;
            let smoothed = filter.smooth(&impulse).unwrap();
            assert!((smoothed[2] - weight / 35.0).abs() < 1e-12);
        }
    }

    #[test]
    fn derivative_uses_sample_spacing() {
        let delta = 0.5;
        let samples: Vec<f64> = (0..30).map(|i| (i as f64 * delta).powi(2)).collect();
        let filter = SavitzkyGolay::new(9, 3).unwrap();
        let slope = filter.derivative(&samples, 1, delta).unwrap();
        for (i, value) in slope.iter().enumerate() {
            assert!((value - 2.0 * i as f64 * delta).abs() < 1e-8);
        }
    }

    #[test]
    fn flattens_alternating_noise() {
        let samples: Vec<f64> = (0..50).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let smoothed = SavitzkyGolay::new(15, 3).unwrap().smooth(&samples).unwrap();
        assert!(smoothed[25].abs() < 0.2);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(SavitzkyGolay::new(8, 3).is_err());
        assert!(SavitzkyGolay::new(3, 3).is_err());
        let filter = SavitzkyGolay::new(15, 3).unwrap();
        assert!(filter.smooth(&[1.0; 10]).is_err());
    }
}
