use crate::config::GlueConfig;
use crate::instrument::frame::DetectionMode;
use crate::math::normality::shapiro_wilk;
use crate::math::stats::StatsHelper;
use crate::prelude::{LidarError, LidarResult};
use crate::processing::correction::{range_correct, CorrectedFrame};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

/// Fuses the analog (near range) and photon-counting (far range) channels of one wavelength.
pub struct ChannelGluer {
    config: GlueConfig,
    logger: LogManager,
}

/// Agreement diagnostics of the two channels over `[start, end)`, centred on `center`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WindowDiagnostics {
    pub center: usize,
    pub start: usize,
    pub end: usize,
    pub correlation: f64,
    pub intercept_t: f64,
    pub normality_p: f64,
    pub min_max_ratio: f64,
    pub score: f64,
    pub glueable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GluedProfile {
    pub wavelength: u32,
    pub window_start: usize,
    pub window_end: usize,
    pub window_center: usize,
    pub score: f64,
    pub lower_constant: f64,
    pub upper_constant: f64,
    pub vertical_resolution: f64,
    pub samples: Vec<f64>,
}

impl GluedProfile {
    pub fn range_corrected(&self) -> Vec<f64> {
        range_correct(&self.samples, self.vertical_resolution)
    }
}

impl ChannelGluer {
    pub fn new(config: GlueConfig) -> Self {
        Self {
            config,
            logger: LogManager::scoped("glue"),
        }
    }

    pub fn config(&self) -> &GlueConfig {
        &self.config
    }

    /// Glues `{wavelength}AN` with `{wavelength}PC` from a corrected frame.
    pub fn glue_frame(&self, frame: &CorrectedFrame, wavelength: u32) -> LidarResult<GluedProfile> {
        let lower = frame.require(&DetectionMode::Analog.label(wavelength))?;
        let upper = frame.require(&DetectionMode::PhotonCounting.label(wavelength))?;
        let mut glued = self.glue(&wavelength.to_string(), &lower.samples, &upper.samples)?;
        glued.wavelength = wavelength;
        glued.vertical_resolution = frame.vertical_resolution;
        Ok(glued)
    }

    pub fn glue(&self, name: &str, lower: &[f64], upper: &[f64]) -> LidarResult<GluedProfile> {
        if lower.len() != upper.len() {
            return Err(LidarError::mismatch(
                format!("glue channels at {}", name),
                lower.len(),
                upper.len(),
            ));
        }
        let best = self.select_window(name, lower, upper)?;
        let (start, end) = (best.start, best.end);
        let (lower_constant, upper_constant) =
            self.calibration_constants(&lower[start..end], &upper[start..end])?;
        let samples = blend(lower, upper, start, end, lower_constant, upper_constant);

        self.logger.record(&format!(
            "{} window {}..{} score {:.4} constants {:.6}/{:.6}",
            name, start, end, best.score, lower_constant, upper_constant
        ));
        Ok(GluedProfile {
            wavelength: name.parse().unwrap_or(0),
            window_start: start,
            window_end: end,
            window_center: best.center,
            score: best.score,
            lower_constant,
            upper_constant,
            vertical_resolution: 1.0,
            samples,
        })
    }

    /// Diagnostics for every window `[c - W/2, c - W/2 + W)` lying inside the search range.
    pub fn scan(&self, lower: &[f64], upper: &[f64]) -> LidarResult<Vec<WindowDiagnostics>> {
        let width = self.config.window_length;
        let half = width / 2;
        let max_idx = self.config.max_idx.min(lower.len()).min(upper.len());
        if width < 3 || self.config.min_idx + width > max_idx {
            return Err(LidarError::InvalidInput(format!(
                "glue window {} does not fit search range [{}, {})",
                width, self.config.min_idx, max_idx
            )));
        }
        Ok((self.config.min_idx + half..=max_idx - width + half)
            .map(|center| {
                let start = center - half;
                self.diagnose(center, &lower[start..start + width], &upper[start..start + width])
            })
            .collect())
    }

    fn select_window(&self, name: &str, lower: &[f64], upper: &[f64]) -> LidarResult<WindowDiagnostics> {
        let diagnostics = self.scan(lower, upper)?;
        let mut best: Option<WindowDiagnostics> = None;
        for candidate in diagnostics.into_iter().filter(|d| d.glueable) {
            if best.map_or(true, |current| candidate.score > current.score) {
                best = Some(candidate);
            }
        }
        best.ok_or_else(|| LidarError::NoGlueableRegion {
            wavelength: name.to_string(),
            min_idx: self.config.min_idx,
            max_idx: self.config.max_idx,
        })
    }

    /// Singular or degenerate windows come back as non-glueable.
    pub fn diagnose(&self, center: usize, lower: &[f64], upper: &[f64]) -> WindowDiagnostics {
        let start = center.saturating_sub(lower.len() / 2);
        let mut diagnostics = WindowDiagnostics {
            center,
            start,
            end: start + lower.len(),
            correlation: f64::NAN,
            intercept_t: f64::INFINITY,
            normality_p: f64::NAN,
            min_max_ratio: 0.0,
            score: 0.0,
            glueable: false,
        };
        let Some(correlation) = StatsHelper::pearson(upper, lower) else {
            return diagnostics;
        };
        let Ok(fit) = StatsHelper::linear_fit(upper, lower) else {
            return diagnostics;
        };
        let Ok(normality) = shapiro_wilk(&fit.residuals) else {
            return diagnostics;
        };
        let cap = self.config.intercept_cap;
        diagnostics.correlation = correlation;
        diagnostics.intercept_t = fit.intercept_t();
        diagnostics.normality_p = normality.p_value;
        diagnostics.min_max_ratio =
            StatsHelper::min_max_ratio(lower).min(StatsHelper::min_max_ratio(upper));
        diagnostics.score = correlation
            * (1.0 - diagnostics.intercept_t.min(cap) / cap)
            * diagnostics.min_max_ratio;
        diagnostics.glueable = correlation > self.config.correlation_threshold
            && diagnostics.intercept_t < self.config.intercept_threshold
            && diagnostics.normality_p >= self.config.gaussian_threshold
            && diagnostics.min_max_ratio > self.config.minmax_threshold;
        diagnostics
    }

    /// Multiplicative constants mapping each channel onto the reference channel's scale.
    pub fn calibration_constants(&self, lower: &[f64], upper: &[f64]) -> LidarResult<(f64, f64)> {
        if self.config.upper_is_reference {
            Ok((StatsHelper::zero_intercept_slope(lower, upper)?, 1.0))
        } else {
            Ok((1.0, StatsHelper::zero_intercept_slope(upper, lower)?))
        }
    }
}

/// Lower channel before the window, upper after, linear crossfade inside.
pub fn blend(
    lower: &[f64],
    upper: &[f64],
    start: usize,
    end: usize,
    lower_constant: f64,
    upper_constant: f64,
) -> Vec<f64> {
    let width = (end - start) as f64;
    lower
        .iter()
        .zip(upper)
        .enumerate()
        .map(|(i, (l, u))| {
            let weight = if i < start {
                1.0
            } else if i < end {
                1.0 - (i - start) as f64 / width
            } else {
                0.0
            };
            weight * lower_constant * l + (1.0 - weight) * upper_constant * u
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use statrs::distribution::{ContinuousCDF, Normal};

    const REGION: (usize, usize) = (300, 380);

    fn gaussian_noise(n: usize, seed: u64) -> Vec<f64> {
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| normal.inverse_cdf(rng.gen_range(1e-9..1.0 - 1e-9)))
            .collect()
    }

    /// `upper = 0.5 lower + 0.3 N(0, 1)` inside `REGION`, unrelated clutter elsewhere.
    fn synthetic(n: usize) -> (Vec<f64>, Vec<f64>) {
        let lower: Vec<f64> = (0..n).map(|i| 2000.0 * (-(i as f64) / 300.0).exp()).collect();
        let noise = gaussian_noise(n, 532);
        let upper = lower
            .iter()
            .enumerate()
            .map(|(i, l)| {
                if (REGION.0..REGION.1).contains(&i) {
                    0.5 * l + 0.3 * noise[i]
                } else {
                    40.0 + 10.0 * (2.3 * i as f64).sin()
                }
            })
            .collect();
        (lower, upper)
    }

    fn gluer() -> ChannelGluer {
        ChannelGluer::new(GlueConfig {
            window_length: 40,
            min_idx: 100,
            max_idx: 600,
            intercept_threshold: 5.0,
            ..GlueConfig::default()
        })
    }

    #[test]
    fn gaussian_overlap_selects_window_inside_region() {
        let (lower, upper) = synthetic(800);
        let glued = gluer().glue("532", &lower, &upper).unwrap();
        assert!(glued.window_start >= REGION.0, "{}", glued.window_start);
        assert!(glued.window_end <= REGION.1, "{}", glued.window_end);
        assert_eq!(glued.window_end - glued.window_start, 40);
        assert_eq!(glued.window_center, glued.window_start + 20);
        assert_eq!(glued.wavelength, 532);
        assert!((glued.lower_constant - 0.5).abs() < 5e-3);
        assert_eq!(glued.upper_constant, 1.0);
        assert_eq!(glued.samples.len(), lower.len());
        assert_eq!(glued.samples[10], glued.lower_constant * lower[10]);
        assert_eq!(glued.samples[700], upper[700]);
    }

    #[test]
    fn every_window_inside_the_overlap_is_well_correlated() {
        let (lower, upper) = synthetic(800);
        let diagnostics = gluer().scan(&lower, &upper).unwrap();
        assert_eq!(diagnostics.first().unwrap().center, 120);
        assert_eq!(diagnostics.last().unwrap().center, 580);
        let inside: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.start >= REGION.0 && d.end <= REGION.1)
            .collect();
        assert_eq!(inside.len(), 41);
        assert!(inside.iter().all(|d| d.correlation > 0.95 && d.min_max_ratio > 0.5));
        assert!(inside.iter().any(|d| d.glueable));
        assert!(diagnostics
            .iter()
            .filter(|d| d.glueable)
            .all(|d| d.start >= REGION.0 && d.end <= REGION.1));
    }

    #[test]
    fn score_ignores_common_scaling_and_constant_tracks_one_channel() {
        let (lower, upper) = synthetic(800);
        let gluer = gluer();
        let base = gluer.glue("532", &lower, &upper).unwrap();

        let both: (Vec<f64>, Vec<f64>) = (
            lower.iter().map(|v| v * 7.0).collect(),
            upper.iter().map(|v| v * 7.0).collect(),
        );
        let scaled = gluer.glue("532", &both.0, &both.1).unwrap();
        assert_eq!(scaled.window_start, base.window_start);
        assert!((scaled.score - base.score).abs() < 1e-9);
        assert!((scaled.lower_constant - base.lower_constant).abs() < 1e-9);

        let lower_only: Vec<f64> = lower.iter().map(|v| v * 4.0).collect();
        let rescaled = gluer.glue("532", &lower_only, &upper).unwrap();
        assert_eq!(rescaled.window_start, base.window_start);
        assert!((rescaled.lower_constant * 4.0 - base.lower_constant).abs() < 1e-9);
    }

    #[test]
    fn uncorrelated_channels_have_no_glueable_region() {
        let lower: Vec<f64> = (0..800).map(|i| 2000.0 * (-(i as f64) / 300.0).exp()).collect();
        let upper: Vec<f64> = (0..800).map(|i| 40.0 + 10.0 * (2.3 * i as f64).sin()).collect();
        match gluer().glue("355", &lower, &upper).unwrap_err() {
            LidarError::NoGlueableRegion { wavelength, min_idx, max_idx } => {
                assert_eq!(wavelength, "355");
                assert_eq!((min_idx, max_idx), (100, 600));
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn gaussian_residuals_pass_the_normality_gate() {
        let normal = Normal::new(0.0, 1.0).unwrap();
        let lower: Vec<f64> = (0..40).map(|i| 1000.0 - i as f64 * 5.0).collect();
        // normal scores in scrambled order
        let upper: Vec<f64> = lower
            .iter()
            .enumerate()
            .map(|(i, l)| {
                let rank = ((i * 7) % 40) as f64 + 1.0;
                0.5 * l + 0.3 * normal.inverse_cdf((rank - 0.375) / 40.25)
            })
            .collect();
        let diagnostics = gluer().diagnose(20, &lower, &upper);
        assert_eq!((diagnostics.start, diagnostics.end), (0, 40));
        assert!(diagnostics.correlation > 0.999);
        assert!(diagnostics.min_max_ratio > 0.5);
        assert!(diagnostics.intercept_t < 5.0);
        assert!(diagnostics.normality_p > 0.1);
        assert!(diagnostics.glueable);
    }

    #[test]
    fn two_level_residuals_fail_the_normality_gate() {
        let lower: Vec<f64> = (0..40).map(|i| 1000.0 - i as f64 * 5.0).collect();
        let upper: Vec<f64> = lower
            .iter()
            .enumerate()
            .map(|(i, l)| 0.5 * l + if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        let diagnostics = gluer().diagnose(20, &lower, &upper);
        assert!(diagnostics.correlation > 0.999);
        assert!(diagnostics.normality_p < 0.1);
        assert!(!diagnostics.glueable);
    }

    #[test]
    fn constant_window_is_not_glueable() {
        let diagnostics = gluer().diagnose(20, &[5.0; 40], &[2.0; 40]);
        assert!(!diagnostics.glueable);
    }

    #[test]
    fn lower_reference_puts_constant_on_upper() {
        let gluer = ChannelGluer::new(GlueConfig {
            upper_is_reference: false,
            ..GlueConfig::default()
        });
        let (lower_constant, upper_constant) = gluer
            .calibration_constants(&[2.0, 4.0, 6.0], &[1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(lower_constant, 1.0);
        assert!((upper_constant - 2.0).abs() < 1e-12);
    }

    #[test]
    fn blend_fades_linearly() {
        let lower = vec![10.0; 8];
        let upper = vec![20.0; 8];
        let out = blend(&lower, &upper, 2, 6, 1.0, 1.0);
        assert_eq!(out, vec![10.0, 10.0, 10.0, 12.5, 15.0, 17.5, 20.0, 20.0]);
    }

    #[test]
    fn search_range_must_hold_a_window() {
        let gluer = ChannelGluer::new(GlueConfig {
            min_idx: 90,
            max_idx: 100,
            ..GlueConfig::default()
        });
        assert!(gluer.scan(&[1.0; 200], &[1.0; 200]).is_err());
    }
}
