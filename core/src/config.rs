//! Per-deployment configuration with the defaults of the São Paulo instrument.
//!
//! Every coefficient the pipeline uses lives here; no stage carries its own
//! tuning constants.

use crate::instrument::layout::HeaderLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub layout: HeaderLayout,
    /// Accepted band for the declared laser shot count (inclusive).
    pub min_shots: u32,
    pub max_shots: u32,
    /// The header does not describe photon-counting scaling, so it is configured here.
    pub photon_counting_bit_depth: u32,
    pub photon_counting_normalization: f64,
    /// Words following each analog/photon-counting pair in the payload.
    pub pair_trailer_words: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            layout: HeaderLayout::default(),
            min_shots: 2998,
            max_shots: 3008,
            photon_counting_bit_depth: 16,
            photon_counting_normalization: 20.0,
            pair_trailer_words: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Deadtime coefficient per channel index.
    pub deadtime: Vec<f64>,
    /// Trigger-delay compensation per channel index, in bins.
    pub bin_shift: Vec<i64>,
    /// Background reference window in metres (inclusive bounds).
    pub background_window_m: [f64; 2],
    /// Empirical zero-signal bias removed from the background mean, per channel index.
    pub background_offset: Vec<f64>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            deadtime: vec![0.0, 0.0, 0.0, 0.0035, 0.0, 0.0, 0.0, 0.002, 0.0, 0.0, 0.0, 0.0],
            bin_shift: vec![1, -1, 6, -3, 7, -2, 8, -2, 8, -2, 8, -2],
            background_window_m: [29000.0, 29999.0],
            background_offset: vec![0.0, 0.0, 0.0, 0.002, 0.0, 0.0, 0.0, 0.002, 0.0, 0.0, 0.0, 0.0],
        }
    }
}

impl CorrectionConfig {
    pub fn deadtime_for(&self, channel: usize) -> f64 {
        self.deadtime.get(channel).copied().unwrap_or(0.0)
    }

    pub fn bin_shift_for(&self, channel: usize) -> i64 {
        self.bin_shift.get(channel).copied().unwrap_or(0)
    }

    pub fn background_offset_for(&self, channel: usize) -> f64 {
        self.background_offset.get(channel).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlueConfig {
    pub window_length: usize,
    pub correlation_threshold: f64,
    /// Upper bound for the intercept t-statistic.
    pub intercept_threshold: f64,
    /// Residual Shapiro-Wilk p-value must reach this value.
    pub gaussian_threshold: f64,
    pub minmax_threshold: f64,
    /// Intercept statistic saturation used by the composite score.
    pub intercept_cap: f64,
    /// Search range `[min_idx, max_idx)` in bins.
    pub min_idx: usize,
    pub max_idx: usize,
    /// Use the photon-counting channel as the calibration reference.
    pub upper_is_reference: bool,
    pub wavelengths: Vec<u32>,
}

impl Default for GlueConfig {
    fn default() -> Self {
        Self {
            window_length: 50,
            correlation_threshold: 0.95,
            intercept_threshold: 0.5,
            gaussian_threshold: 0.1,
            minmax_threshold: 0.5,
            intercept_cap: 40.0,
            min_idx: 200,
            max_idx: 2000,
            upper_is_reference: true,
            wavelengths: vec![355, 532],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AtmosphereSource {
    Standard,
    Sounding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MolecularConfig {
    pub source: AtmosphereSource,
    pub sounding_dir: PathBuf,
    pub sounding_station: String,
    /// Surface values of the standard atmosphere.
    pub surface_temperature: f64,
    pub surface_pressure: f64,
    /// Reference altitude window in metres for the calibration fit.
    pub reference_window_m: [f64; 2],
}

impl Default for MolecularConfig {
    fn default() -> Self {
        Self {
            source: AtmosphereSource::Standard,
            sounding_dir: PathBuf::from("07-rawinsonde"),
            sounding_station: "83779_SBMT".to_string(),
            surface_temperature: 288.15,
            surface_pressure: 1013.25,
            reference_window_m: [5000.0, 25000.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LidarRatioPolicy {
    Fixed(f64),
    /// Climatological value keyed by measurement month (1-12).
    Monthly(BTreeMap<u32, f64>),
}

impl LidarRatioPolicy {
    pub fn for_month(&self, month: u32) -> Option<f64> {
        match self {
            Self::Fixed(value) => Some(*value),
            Self::Monthly(table) => table.get(&month).copied(),
        }
    }
}

impl Default for LidarRatioPolicy {
    fn default() -> Self {
        let table = [51.0, 50.0, 59.0, 57.0, 55.0, 50.0, 48.0, 49.0, 51.0, 54.0, 51.0, 50.0];
        Self::Monthly(
            table
                .iter()
                .enumerate()
                .map(|(idx, value)| (idx as u32 + 1, *value))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KfsConfig {
    pub wavelength: u32,
    /// Invert the glued profile; otherwise the analog channel alone.
    pub use_glued: bool,
    pub lidar_ratio: LidarRatioPolicy,
    pub molecular_lidar_ratio: f64,
    pub reference_backscatter: f64,
    pub smoothing_window: usize,
    pub smoothing_order: usize,
}

impl Default for KfsConfig {
    fn default() -> Self {
        Self {
            wavelength: 532,
            use_glued: true,
            lidar_ratio: LidarRatioPolicy::default(),
            molecular_lidar_ratio: 8.0 * std::f64::consts::PI / 3.0,
            reference_backscatter: 0.0,
            smoothing_window: 15,
            smoothing_order: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RamanConfig {
    pub enabled: bool,
    pub elastic_wavelength: u32,
    pub raman_wavelength: u32,
    pub angstrom_exponent: f64,
    pub derivative_window: usize,
    pub derivative_order: usize,
    pub smoothing_window: usize,
    pub smoothing_order: usize,
}

impl Default for RamanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            elastic_wavelength: 532,
            raman_wavelength: 530,
            angstrom_exponent: 1.0,
            derivative_window: 41,
            derivative_order: 3,
            smoothing_window: 151,
            smoothing_order: 3,
        }
    }
}

/// Everything one deployment needs, grouped by component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decoder: DecoderConfig,
    pub correction: CorrectionConfig,
    pub glue: GlueConfig,
    pub molecular: MolecularConfig,
    pub kfs: KfsConfig,
    pub raman: RamanConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_channel_coefficients_default_to_zero() {
        let config = CorrectionConfig::default();
        assert_eq!(config.deadtime_for(3), 0.0035);
        assert_eq!(config.deadtime_for(40), 0.0);
        assert_eq!(config.bin_shift_for(40), 0);
        assert_eq!(config.background_offset_for(40), 0.0);
    }

    #[test]
    fn monthly_lidar_ratio_uses_measurement_month() {
        let policy = LidarRatioPolicy::default();
        assert_eq!(policy.for_month(3), Some(59.0));
        assert_eq!(policy.for_month(13), None);
        assert_eq!(LidarRatioPolicy::Fixed(60.0).for_month(13), Some(60.0));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"glue": {"window_length": 150}}"#).unwrap();
        assert_eq!(config.glue.window_length, 150);
        assert_eq!(config.glue.min_idx, 200);
        assert_eq!(config.decoder.min_shots, 2998);
    }
}
