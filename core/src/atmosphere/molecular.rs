use crate::atmosphere::rayleigh::RayleighScattering;
use crate::atmosphere::sounding::{read_sounding, sounding_path};
use crate::atmosphere::standard::StandardAtmosphere;
use crate::atmosphere::AtmosphereProfile;
use crate::config::{AtmosphereSource, MolecularConfig};
use crate::instrument::frame::altitude_grid;
use crate::math::grid::cumulative_trapezoid;
use crate::math::stats::StatsHelper;
use crate::prelude::{LidarError, LidarResult};
use crate::telemetry::log::LogManager;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Rayleigh profile on the lidar grid, calibrated against a measured signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MolecularProfile {
    pub wavelength: u32,
    pub source: AtmosphereSource,
    /// Metres above the station.
    pub altitudes: Vec<f64>,
    pub temperature: Vec<f64>,
    pub pressure: Vec<f64>,
    pub backscatter: Vec<f64>,
    pub extinction: Vec<f64>,
    pub optical_depth: Vec<f64>,
    /// `backscatter * exp(-2 * optical_depth) / altitude^2`.
    pub simulated: Vec<f64>,
    pub scale: f64,
    pub intercept: f64,
    /// Reference window as bin indices `[start, end)`.
    pub reference_bins: (usize, usize),
}

impl MolecularProfile {
    pub fn atmosphere(&self) -> AtmosphereProfile {
        AtmosphereProfile {
            altitudes: self.altitudes.clone(),
            temperature: self.temperature.clone(),
            pressure: self.pressure.clone(),
        }
    }
}

pub struct MolecularModel {
    config: MolecularConfig,
    logger: LogManager,
}

impl MolecularModel {
    pub fn new(config: MolecularConfig) -> Self {
        Self {
            config,
            logger: LogManager::scoped("molecular"),
        }
    }

    pub fn config(&self) -> &MolecularConfig {
        &self.config
    }

    /// Uncalibrated (scale 1) molecular profile for `bins` bins of `vertical_resolution` metres.
    pub fn build(
        &self,
        wavelength: u32,
        bins: usize,
        vertical_resolution: f64,
        station_altitude: f64,
        start: NaiveDateTime,
    ) -> LidarResult<MolecularProfile> {
        let altitudes = altitude_grid(bins, vertical_resolution);
        let asl: Vec<f64> = altitudes.iter().map(|z| z + station_altitude).collect();
        let scattering = RayleighScattering::new(f64::from(wavelength));

        let (atmosphere, extinction, backscatter) = match self.config.source {
            AtmosphereSource::Standard => {
                let atmosphere = self.standard().profile(&asl);
                let (alpha, beta) = atmosphere
                    .temperature
                    .iter()
                    .zip(&atmosphere.pressure)
                    .map(|(&t, &p)| scattering.coefficients(t, p))
                    .unzip();
                (atmosphere, alpha, beta)
            }
            AtmosphereSource::Sounding => {
                let path = sounding_path(&self.config.sounding_dir, &self.config.sounding_station, start);
                let table = read_sounding(&path)?;
                self.logger
                    .record(&format!("using sounding {}", path.display()));
                let (alpha, beta) = table.coefficients(&scattering, &asl)?;
                (table.atmosphere(&asl)?, alpha, beta)
            }
        };

        let optical_depth = cumulative_trapezoid(&extinction, &altitudes)?;
        let simulated = backscatter
            .iter()
            .zip(&optical_depth)
            .zip(&altitudes)
            .map(|((beta, tau), z)| beta * (-2.0 * tau).exp() / (z * z))
            .collect();
        Ok(MolecularProfile {
            wavelength,
            source: self.config.source,
            altitudes,
            temperature: atmosphere.temperature,
            pressure: atmosphere.pressure,
            backscatter,
            extinction,
            optical_depth,
            simulated,
            scale: 1.0,
            intercept: 0.0,
            reference_bins: self.reference_bins(bins, vertical_resolution)?,
        })
    }

    /// `[floor(low / vres), floor(high / vres))`, clipped to the profile.
    pub fn reference_bins(&self, bins: usize, vertical_resolution: f64) -> LidarResult<(usize, usize)> {
        let [low, high] = self.config.reference_window_m;
        if vertical_resolution <= 0.0 {
            return Err(LidarError::InvalidInput(format!(
                "vertical resolution {} m",
                vertical_resolution
            )));
        }
        let start = (low / vertical_resolution).floor() as usize;
        let end = ((high / vertical_resolution).floor() as usize).min(bins);
        if start >= end {
            return Err(LidarError::InvalidInput(format!(
                "reference window {}-{} m is empty on {} bins of {} m",
                low, high, bins, vertical_resolution
            )));
        }
        Ok((start, end))
    }

    /// Fits `measured ~ scale * simulated + intercept` over the reference window.
    pub fn calibrate(&self, profile: &mut MolecularProfile, measured: &[f64]) -> LidarResult<()> {
        if measured.len() != profile.simulated.len() {
            return Err(LidarError::mismatch(
                format!("measured signal for {} nm molecular fit", profile.wavelength),
                profile.simulated.len(),
                measured.len(),
            ));
        }
        let (start, end) = profile.reference_bins;
        let fit = StatsHelper::linear_fit(&profile.simulated[start..end], &measured[start..end])
            .map_err(|err| match err {
                LidarError::SingularFit { context } => LidarError::singular(format!(
                    "{} nm molecular reference bins {}..{}: {}",
                    profile.wavelength, start, end, context
                )),
                other => other,
            })?;
        profile.scale = fit.slope;
        profile.intercept = fit.intercept;
        self.logger.record(&format!(
            "{} nm scale {:.6e} intercept {:.6e}",
            profile.wavelength, fit.slope, fit.intercept
        ));
        Ok(())
    }

    fn standard(&self) -> StandardAtmosphere {
        StandardAtmosphere::new(self.config.surface_temperature, self.config.surface_pressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, 16)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap()
    }

    fn model() -> MolecularModel {
        MolecularModel::new(MolecularConfig::default())
    }

    #[test]
    fn optical_depth_starts_at_zero_and_grows() {
        let profile = model().build(532, 4000, 7.5, 760.0, start()).unwrap();
        assert_eq!(profile.optical_depth[0], 0.0);
        assert!(profile.optical_depth.windows(2).all(|pair| pair[1] > pair[0]));
        assert_eq!(profile.reference_bins, (666, 3333));
        assert_eq!(profile.source, AtmosphereSource::Standard);
    }

    #[test]
    fn simulated_signal_fits_itself_with_unit_scale() {
        let model = model();
        let mut profile = model.build(355, 4000, 7.5, 760.0, start()).unwrap();
        let measured = profile.simulated.clone();
        model.calibrate(&mut profile, &measured).unwrap();
        assert!((profile.scale - 1.0).abs() < 1e-9);
        assert!(profile.intercept.abs() < 1e-18);
    }

    #[test]
    fn calibration_recovers_instrument_constant() {
        let model = model();
        let mut profile = model.build(532, 4000, 7.5, 760.0, start()).unwrap();
        let measured: Vec<f64> = profile.simulated.iter().map(|v| v * 3.5e12).collect();
        model.calibrate(&mut profile, &measured).unwrap();
        assert!((profile.scale - 3.5e12).abs() / 3.5e12 < 1e-9);
    }

    #[test]
    fn tiny_reference_window_is_singular() {
        let model = MolecularModel::new(MolecularConfig {
            reference_window_m: [100.0, 110.0],
            ..MolecularConfig::default()
        });
        let mut profile = model.build(532, 100, 7.5, 0.0, start()).unwrap();
        let measured = profile.simulated.clone();
        let err = model.calibrate(&mut profile, &measured).unwrap_err();
        assert!(matches!(err, LidarError::SingularFit { .. }));
    }

    #[test]
    fn sounding_source_without_file_is_missing_sounding() {
        let dir = tempdir().unwrap();
        let model = MolecularModel::new(MolecularConfig {
            source: AtmosphereSource::Sounding,
            sounding_dir: dir.path().to_path_buf(),
            ..MolecularConfig::default()
        });
        let err = model.build(532, 100, 7.5, 760.0, start()).unwrap_err();
        assert!(matches!(err, LidarError::MissingSounding { .. }));
    }

    #[test]
    fn sounding_source_reads_bucketed_file() {
        let dir = tempdir().unwrap();
        let station_dir = dir.path().join("83779_SBMT");
        fs::create_dir_all(&station_dir).unwrap();
        let mut text = String::from("title\n-----\n   PRES   HGHT   TEMP\n  hPa\n-----\n\n");
        for level in 0..40 {
            let height = 700.0 + level as f64 * 500.0;
            let (t, p) = StandardAtmosphere::default().at(height);
            text.push_str(&format!("{:7.1}{:7.0}{:7.1}\n", p, height, t - 273.15));
        }
        fs::write(station_dir.join("83779_SBMT_2021_06_17_00Z.csv"), text).unwrap();

        let model = MolecularModel::new(MolecularConfig {
            source: AtmosphereSource::Sounding,
            sounding_dir: dir.path().to_path_buf(),
            ..MolecularConfig::default()
        });
        let profile = model.build(532, 2000, 7.5, 760.0, start()).unwrap();
        assert_eq!(profile.source, AtmosphereSource::Sounding);
        let reference = profile.extinction[1000];
        let standard = MolecularModel::new(MolecularConfig::default())
            .build(532, 2000, 7.5, 760.0, start())
            .unwrap();
        assert!((reference - standard.extinction[1000]).abs() / standard.extinction[1000] < 0.01);
    }
}
