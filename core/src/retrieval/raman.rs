use crate::atmosphere::rayleigh::{number_density, RayleighScattering};
use crate::atmosphere::AtmosphereProfile;
use crate::config::RamanConfig;
use crate::math::savgol::SavitzkyGolay;
use crate::prelude::{LidarError, LidarResult};
use crate::retrieval::{AerosolProfile, InversionMethod};
use crate::telemetry::log::LogManager;

/// Aerosol extinction from the slope of the Raman return against air density.
pub struct RamanRetrieval {
    config: RamanConfig,
    derivative: SavitzkyGolay,
    smoother: SavitzkyGolay,
    logger: LogManager,
}

impl RamanRetrieval {
    pub fn new(config: RamanConfig) -> LidarResult<Self> {
        let derivative = SavitzkyGolay::new(config.derivative_window, config.derivative_order)?;
        let smoother = SavitzkyGolay::new(config.smoothing_window, config.smoothing_order)?;
        Ok(Self {
            config,
            derivative,
            smoother,
            logger: LogManager::scoped("raman"),
        })
    }

    pub fn config(&self) -> &RamanConfig {
        &self.config
    }

    /// Extinction at the elastic wavelength; bins with a non-positive Raman
    /// signal are NaN before smoothing.
    pub fn retrieve(
        &self,
        raman_range_corrected: &[f64],
        atmosphere: &AtmosphereProfile,
        vertical_resolution: f64,
    ) -> LidarResult<AerosolProfile> {
        let n = raman_range_corrected.len();
        for (name, len) in [
            ("altitudes", atmosphere.altitudes.len()),
            ("temperature", atmosphere.temperature.len()),
            ("pressure", atmosphere.pressure.len()),
        ] {
            if len != n {
                return Err(LidarError::mismatch(format!("Raman {}", name), n, len));
            }
        }
        if !(vertical_resolution > 0.0) {
            return Err(LidarError::InvalidInput(format!(
                "vertical resolution {} m",
                vertical_resolution
            )));
        }

        let elastic = RayleighScattering::new(f64::from(self.config.elastic_wavelength));
        let shifted = RayleighScattering::new(f64::from(self.config.raman_wavelength));
        let mut dropped = 0;
        let log_ratio: Vec<f64> = raman_range_corrected
            .iter()
            .zip(atmosphere.temperature.iter().zip(&atmosphere.pressure))
            .map(|(&signal, (&t, &p))| {
                if signal > 0.0 {
                    (number_density(t, p) / signal).ln()
                } else {
                    dropped += 1;
                    f64::NAN
                }
            })
            .collect();
        if dropped > 0 {
            self.logger
                .warn(&format!("{} bins with non-positive Raman signal", dropped));
        }

        let slope = self.derivative.derivative(&log_ratio, 1, vertical_resolution)?;
        let wavelength_ratio =
            f64::from(self.config.elastic_wavelength) / f64::from(self.config.raman_wavelength);
        let angstrom = 1.0 + wavelength_ratio.powf(self.config.angstrom_exponent);
        let extinction: Vec<f64> = slope
            .iter()
            .zip(atmosphere.temperature.iter().zip(&atmosphere.pressure))
            .map(|(d, (&t, &p))| {
                let (alpha_elastic, _) = elastic.coefficients(t, p);
                let (alpha_shifted, _) = shifted.coefficients(t, p);
                (d - alpha_elastic - alpha_shifted) / angstrom
            })
            .collect();

        Ok(AerosolProfile {
            method: InversionMethod::Raman,
            wavelength: self.config.elastic_wavelength,
            altitudes: atmosphere.altitudes.clone(),
            backscatter: None,
            extinction: self.smoother.smooth(&extinction)?,
            lidar_ratio: None,
            reference_bins: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::StandardAtmosphere;
    use crate::instrument::frame::altitude_grid;
    use crate::math::grid::cumulative_trapezoid;

    const PEAK: f64 = 1e-4;

    fn retrieval() -> RamanRetrieval {
        RamanRetrieval::new(RamanConfig {
            enabled: true,
            elastic_wavelength: 355,
            raman_wavelength: 387,
            derivative_window: 21,
            smoothing_window: 31,
            ..RamanConfig::default()
        })
        .unwrap()
    }

    fn atmosphere(bins: usize) -> AtmosphereProfile {
        let altitudes = altitude_grid(bins, 7.5);
        let asl: Vec<f64> = altitudes.iter().map(|z| z + 760.0).collect();
        let mut profile = StandardAtmosphere::default().profile(&asl);
        profile.altitudes = altitudes;
        profile
    }

    #[test]
    fn recovers_aerosol_layer_extinction() {
        let retrieval = retrieval();
        let atmosphere = atmosphere(1200);
        let z = &atmosphere.altitudes;
        let aerosol: Vec<f64> = z
            .iter()
            .map(|h| PEAK * (-((h - 3000.0) / 500.0).powi(2)).exp())
            .collect();
        let elastic = RayleighScattering::new(355.0);
        let shifted = RayleighScattering::new(387.0);
        let ratio = (355.0_f64 / 387.0).powf(1.0);
        let total: Vec<f64> = (0..z.len())
            .map(|i| {
                let (t, p) = (atmosphere.temperature[i], atmosphere.pressure[i]);
                elastic.coefficients(t, p).0
                    + shifted.coefficients(t, p).0
                    + aerosol[i] * (1.0 + ratio)
            })
            .collect();
        let tau = cumulative_trapezoid(&total, z).unwrap();
        let signal: Vec<f64> = (0..z.len())
            .map(|i| {
                let density = number_density(atmosphere.temperature[i], atmosphere.pressure[i]);
                1e-15 * density * (-tau[i]).exp()
            })
            .collect();

        let profile = retrieval.retrieve(&signal, &atmosphere, 7.5).unwrap();
        assert_eq!(profile.method, InversionMethod::Raman);
        assert!(profile.backscatter.is_none());
        for i in (40..1160).step_by(9) {
            assert!(
                (profile.extinction[i] - aerosol[i]).abs() < 0.03 * PEAK,
                "bin {}: {} vs {}",
                i,
                profile.extinction[i],
                aerosol[i]
            );
        }
    }

    #[test]
    fn non_positive_signal_becomes_nan() {
        let retrieval = retrieval();
        let atmosphere = atmosphere(200);
        let mut signal = vec![1.0; 200];
        signal[100] = 0.0;
        let profile = retrieval.retrieve(&signal, &atmosphere, 7.5).unwrap();
        assert!(profile.extinction[100].is_nan());
        assert!(profile.extinction[10].is_finite());
    }

    #[test]
    fn mismatched_atmosphere_is_rejected() {
        let err = retrieval()
            .retrieve(&[1.0; 50], &atmosphere(60), 7.5)
            .unwrap_err();
        assert!(matches!(err, LidarError::ArrayLengthMismatch { .. }));
    }
}
