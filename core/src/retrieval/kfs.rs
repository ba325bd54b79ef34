use crate::atmosphere::molecular::MolecularProfile;
use crate::config::KfsConfig;
use crate::math::savgol::SavitzkyGolay;
use crate::math::stats::StatsHelper;
use crate::prelude::{LidarError, LidarResult};
use crate::retrieval::{AerosolProfile, InversionMethod};
use crate::telemetry::log::LogManager;

/// Bin where the aerosol backscatter is assumed known, and the averaging half-width around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KfsReference {
    pub index: usize,
    pub half_width: usize,
}

impl KfsReference {
    /// Centre of the molecular reference window `[start, end)`.
    pub fn from_bins((start, end): (usize, usize)) -> Self {
        let half_width = end.saturating_sub(start) / 2;
        Self {
            index: start + half_width,
            half_width,
        }
    }

    fn span(&self, bins: usize) -> LidarResult<(usize, usize)> {
        let (start, end) = if self.half_width == 0 {
            (Some(self.index), self.index + 1)
        } else {
            (self.index.checked_sub(self.half_width), self.index + self.half_width)
        };
        match start {
            Some(start) if end <= bins => Ok((start, end)),
            _ => Err(LidarError::InvalidInput(format!(
                "reference bin {} +/- {} outside {} bins",
                self.index, self.half_width, bins
            ))),
        }
    }
}

/// Klett-Fernald-Sasano inversion integrated outward from the reference bin.
pub struct KfsInversion {
    config: KfsConfig,
    smoother: SavitzkyGolay,
    logger: LogManager,
}

impl KfsInversion {
    pub fn new(config: KfsConfig) -> LidarResult<Self> {
        let smoother = SavitzkyGolay::new(config.smoothing_window, config.smoothing_order)?;
        Ok(Self {
            config,
            smoother,
            logger: LogManager::scoped("kfs"),
        })
    }

    pub fn lidar_ratio_for(&self, month: u32) -> LidarResult<f64> {
        self.config.lidar_ratio.for_month(month).ok_or_else(|| {
            LidarError::InvalidInput(format!("no aerosol lidar ratio for month {}", month))
        })
    }

    /// Smoothed aerosol backscatter and extinction from a range-corrected signal.
    pub fn invert(
        &self,
        range_corrected: &[f64],
        molecular: &MolecularProfile,
        month: u32,
    ) -> LidarResult<AerosolProfile> {
        let lidar_ratio = self.lidar_ratio_for(month)?;
        let vertical_resolution = molecular.altitudes.first().copied().unwrap_or(0.0);
        let reference = KfsReference::from_bins(molecular.reference_bins);
        let backscatter = self.solve(
            range_corrected,
            &molecular.backscatter,
            vertical_resolution,
            lidar_ratio,
            reference,
        )?;
        let extinction: Vec<f64> = backscatter.iter().map(|b| b * lidar_ratio).collect();
        Ok(AerosolProfile {
            method: InversionMethod::Kfs,
            wavelength: molecular.wavelength,
            altitudes: molecular.altitudes.clone(),
            backscatter: Some(self.smoother.smooth(&backscatter)?),
            extinction: self.smoother.smooth(&extinction)?,
            lidar_ratio: Some(lidar_ratio),
            reference_bins: Some(molecular.reference_bins),
        })
    }

    /// Unsmoothed aerosol backscatter. Bins whose denominator is not positive are NaN.
    pub fn solve(
        &self,
        range_corrected: &[f64],
        molecular_backscatter: &[f64],
        vertical_resolution: f64,
        lidar_ratio: f64,
        reference: KfsReference,
    ) -> LidarResult<Vec<f64>> {
        let n = range_corrected.len();
        if molecular_backscatter.len() != n {
            return Err(LidarError::mismatch(
                "molecular backscatter for inversion",
                n,
                molecular_backscatter.len(),
            ));
        }
        if !(lidar_ratio > 0.0) || !(vertical_resolution > 0.0) {
            return Err(LidarError::InvalidInput(format!(
                "lidar ratio {} and resolution {} m must be positive",
                lidar_ratio, vertical_resolution
            )));
        }
        let (lo, hi) = reference.span(n)?;
        let signal_ref = StatsHelper::mean(&range_corrected[lo..hi]);
        let molecular_ref = StatsHelper::mean(&molecular_backscatter[lo..hi]);
        let boundary = signal_ref / (molecular_ref + self.config.reference_backscatter);
        if !(boundary.is_finite() && boundary > 0.0) {
            return Err(LidarError::InvalidInput(format!(
                "reference signal {:.4e} at bins {}..{} gives no usable boundary value",
                signal_ref, lo, hi
            )));
        }

        let ratio_gap = lidar_ratio - self.config.molecular_lidar_ratio;
        let gap: Vec<f64> = molecular_backscatter.iter().map(|b| ratio_gap * b).collect();
        let optical = integrate_from(&gap, reference.index, vertical_resolution);
        let transmission: Vec<f64> = optical.iter().map(|j| (-2.0 * j).exp()).collect();
        let weighted: Vec<f64> = range_corrected
            .iter()
            .zip(&transmission)
            .map(|(x, t)| lidar_ratio * x * t)
            .collect();
        let accumulated = integrate_from(&weighted, reference.index, vertical_resolution);

        let mut rejected = 0;
        let aerosol = (0..n)
            .map(|i| {
                let denominator = boundary - 2.0 * accumulated[i];
                if denominator > 0.0 {
                    range_corrected[i] * transmission[i] / denominator - molecular_backscatter[i]
                } else {
                    rejected += 1;
                    f64::NAN
                }
            })
            .collect();
        if rejected > 0 {
            self.logger.warn(&format!(
                "{} bins with non-positive denominator set to NaN",
                rejected
            ));
        }
        Ok(aerosol)
    }
}

/// Signed trapezoidal integral from `origin` to every bin.
fn integrate_from(values: &[f64], origin: usize, step: f64) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    for i in origin + 1..values.len() {
        out[i] = out[i - 1] + 0.5 * (values[i - 1] + values[i]) * step;
    }
    for i in (0..origin.min(values.len())).rev() {
        out[i] = out[i + 1] - 0.5 * (values[i] + values[i + 1]) * step;
    }
    out
}
