//! Molecular scattering after Bucholtz (1995).

use crate::math::grid::interpolate;
use std::f64::consts::PI;

const BOLTZMANN: f64 = 1.380_649e-23;

/// Depolarization ratio of air versus wavelength (nm).
const DEPOLARIZATION: [(f64, f64); 13] = [
    (200.0, 0.0454),
    (250.0, 0.0369),
    (300.0, 0.0330),
    (355.0, 0.0301),
    (400.0, 0.0295),
    (450.0, 0.0290),
    (500.0, 0.0286),
    (532.0, 0.0284),
    (600.0, 0.0280),
    (700.0, 0.0277),
    (800.0, 0.0275),
    (1064.0, 0.0273),
    (2000.0, 0.0272),
];

#[derive(Debug, Clone, Copy)]
pub struct RayleighScattering {
    wavelength_nm: f64,
    cross_section_m2: f64,
    backscatter_phase: f64,
}

impl RayleighScattering {
    pub fn new(wavelength_nm: f64) -> Self {
        let rho = depolarization(wavelength_nm);
        let gamma = rho / (2.0 - rho);
        Self {
            wavelength_nm,
            cross_section_m2: cross_section_cm2(wavelength_nm) * 1e-4,
            backscatter_phase: 1.5 * (1.0 + gamma) / (1.0 + 2.0 * gamma),
        }
    }

    pub fn wavelength_nm(&self) -> f64 {
        self.wavelength_nm
    }

    /// Extinction and backscatter coefficients (m^-1, m^-1 sr^-1) for
    /// temperature in K and pressure in hPa.
    pub fn coefficients(&self, temperature: f64, pressure: f64) -> (f64, f64) {
        let alpha = self.cross_section_m2 * number_density(temperature, pressure);
        (alpha, alpha * self.backscatter_phase / (4.0 * PI))
    }

    /// Extinction-to-backscatter ratio of air at this wavelength.
    pub fn lidar_ratio(&self) -> f64 {
        4.0 * PI / self.backscatter_phase
    }
}

/// Molecules per cubic metre of an ideal gas.
pub fn number_density(temperature: f64, pressure: f64) -> f64 {
    pressure * 100.0 / (BOLTZMANN * temperature)
}

/// Total scattering cross-section per molecule in cm^2.
pub fn cross_section_cm2(wavelength_nm: f64) -> f64 {
    let lambda = wavelength_nm / 1000.0;
    let (a, b, c, d) = if lambda <= 0.5 {
        (3.01577e-28, 3.55212, 1.35579, 0.11563)
    } else {
        (4.01061e-28, 3.99668, 1.10298e-3, 2.71393e-2)
    };
    a * lambda.powf(-(b + c * lambda + d / lambda))
}

pub fn depolarization(wavelength_nm: f64) -> f64 {
    let first = DEPOLARIZATION[0];
    let last = DEPOLARIZATION[DEPOLARIZATION.len() - 1];
    let clamped = wavelength_nm.clamp(first.0, last.0);
    let (xp, fp): (Vec<f64>, Vec<f64>) = DEPOLARIZATION.iter().copied().unzip();
    interpolate(&xp, &fp, &[clamped])
        .ok()
        .and_then(|values| values.first().copied())
        .unwrap_or(last.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_section_at_532_nm() {
        let sigma = cross_section_cm2(532.0);
        assert!((sigma - 5.16e-27).abs() / 5.16e-27 < 0.01);
    }

    #[test]
    fn sea_level_extinction_is_order_1e_5() {
        let (alpha, beta) = RayleighScattering::new(532.0).coefficients(288.15, 1013.25);
        assert!(alpha > 1.2e-5 && alpha < 1.4e-5);
        assert!((alpha / beta - RayleighScattering::new(532.0).lidar_ratio()).abs() < 1e-9);
    }

    #[test]
    fn lidar_ratio_is_close_to_eight_pi_thirds() {
        let ratio = RayleighScattering::new(355.0).lidar_ratio();
        assert!((ratio - 8.0 * PI / 3.0).abs() < 0.2);
    }

    #[test]
    fn depolarization_is_clamped_outside_table() {
        assert!((depolarization(100.0) - 0.0454).abs() < 1e-12);
        assert!((depolarization(5000.0) - 0.0272).abs() < 1e-12);
        assert!((depolarization(532.0) - 0.0284).abs() < 1e-12);
    }

    #[test]
    fn shorter_wavelengths_scatter_more() {
        assert!(cross_section_cm2(355.0) > 4.0 * cross_section_cm2(532.0));
    }
}
