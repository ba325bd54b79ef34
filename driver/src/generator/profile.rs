use anyhow::Context;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use lidarcore::atmosphere::MolecularModel;
use lidarcore::config::{DecoderConfig, MolecularConfig};
use lidarcore::instrument::{ChannelRecord, DetectionMode, FrameHeader, RecordBuilder};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::workflow::discovery::{DARK_CURRENT_DIR, MEASUREMENTS_DIR};

const ADC_BITS: u32 = 12;
const INPUT_RANGE_V: f64 = 0.5;
const SHOTS: u32 = 3000;

/// Configuration for generating a synthetic organized session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub session: String,
    pub site: String,
    pub station_altitude: f64,
    pub start: NaiveDateTime,
    pub wavelengths: Vec<u32>,
    pub bins: usize,
    pub vertical_resolution: f64,
    pub frames: usize,
    pub dark_frames: usize,
    /// Peak analog signal, in decoded units.
    pub peak: f64,
    /// Photon-counting channel gain relative to the analog one.
    pub photon_gain: f64,
    pub aerosol_height: f64,
    pub aerosol_depth: f64,
    pub noise: f64,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2021, 6, 16)
            .and_then(|day| day.and_hms_opt(21, 0, 0))
            .unwrap_or_default();
        Self {
            session: "20210616nt".to_string(),
            site: "SaoPaulo".to_string(),
            station_altitude: 760.0,
            start,
            wavelengths: vec![355, 532],
            bins: 4000,
            vertical_resolution: 7.5,
            frames: 3,
            dark_frames: 2,
            peak: 3000.0,
            photon_gain: 0.02,
            aerosol_height: 2000.0,
            aerosol_depth: 0.8,
            noise: 0.05,
            seed: 0,
        }
    }
}

/// Clean analog-channel shape: molecular return, a Gaussian aerosol layer and
/// a geometric overlap ramp.
fn clean_signal(config: &GeneratorConfig, wavelength: u32) -> anyhow::Result<Vec<f64>> {
    let model = MolecularModel::new(MolecularConfig::default());
    let molecular = model
        .build(
            wavelength,
            config.bins,
            config.vertical_resolution,
            config.station_altitude,
            config.start,
        )
        .with_context(|| format!("modelling {} nm molecular return", wavelength))?;
    let shaped: Vec<f64> = molecular
        .simulated
        .iter()
        .zip(&molecular.altitudes)
        .map(|(value, z)| {
            let overlap = 1.0 - (-(z / 600.0).powi(2)).exp();
            let layer = 1.0 + config.aerosol_depth * (-((z - config.aerosol_height) / 400.0).powi(2)).exp();
            value * overlap * layer
        })
        .collect();
    let max = shaped.iter().cloned().fold(0.0, f64::max);
    if max <= 0.0 {
        anyhow::bail!("synthetic {} nm signal has no positive bins", wavelength);
    }
    Ok(shaped.iter().map(|v| v / max * config.peak).collect())
}

fn analog_raw(counts: f64) -> i32 {
    let unit = (INPUT_RANGE_V * 1e3).trunc() / f64::from(SHOTS);
    (counts / unit * f64::from(1u32 << ADC_BITS)).round() as i32
}

fn photon_raw(counts: f64) -> i32 {
    let pulses = (counts.max(0.0) * f64::from(SHOTS) / 20.0).round();
    (pulses * 65536.0) as i32
}

fn channel(wavelength: u32, mode: DetectionMode, vertical_resolution: f64, raw: Vec<i32>) -> ChannelRecord {
    ChannelRecord {
        wavelength,
        mode,
        vertical_resolution,
        adc_bits: ADC_BITS,
        shots: SHOTS,
        input_range: INPUT_RANGE_V,
        raw,
    }
}

/// Encodes one record; `dark` records carry only offset and noise.
pub fn build_record(
    config: &GeneratorConfig,
    decoder: &DecoderConfig,
    index: usize,
    dark: bool,
    rng: &mut StdRng,
) -> anyhow::Result<Vec<u8>> {
    let start = config.start + Duration::minutes(index as i64);
    let header = FrameHeader {
        file_name: format!("RM{}{:02}.{:06}", start.format("%y%m%d"), start.format("%H"), index),
        site: config.site.clone(),
        latitude: -23.6,
        longitude: -46.7,
        station_altitude: config.station_altitude,
        start,
        stop: start + Duration::seconds(59),
        laser_frequency: 10,
        laser_shots: SHOTS,
    };
    let mut builder = RecordBuilder::new(decoder, header);
    for &wavelength in &config.wavelengths {
        let clean = if dark {
            vec![0.0; config.bins]
        } else {
            clean_signal(config, wavelength)?
        };
        let mut analog = Vec::with_capacity(config.bins);
        let mut photon = Vec::with_capacity(config.bins);
        for value in &clean {
            let jitter = rng.gen_range(-config.noise..=config.noise);
            analog.push(analog_raw(value + 0.4 + jitter));
            photon.push(photon_raw(config.photon_gain * value + 0.3 + jitter.abs()));
        }
        builder = builder
            .channel(channel(wavelength, DetectionMode::Analog, config.vertical_resolution, analog))
            .channel(channel(wavelength, DetectionMode::PhotonCounting, config.vertical_resolution, photon));
    }
    builder
        .build()
        .with_context(|| format!("encoding synthetic record {}", index))
}

/// Writes `{data_dir}/{session}/measurements` and `dark_current` record files.
pub fn write_synthetic_session(
    config: &GeneratorConfig,
    decoder: &DecoderConfig,
    data_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let session_dir = data_dir.join(&config.session);
    let mut rng = StdRng::seed_from_u64(config.seed);
    for (dir, count, dark, offset) in [
        (MEASUREMENTS_DIR, config.frames, false, config.dark_frames),
        (DARK_CURRENT_DIR, config.dark_frames, true, 0),
    ] {
        let target = session_dir.join(dir);
        fs::create_dir_all(&target).with_context(|| format!("creating {}", target.display()))?;
        for index in offset..offset + count {
            let bytes = build_record(config, decoder, index, dark, &mut rng)?;
            let path = target.join(format!("frame_{:04}.bin", index));
            fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(session_dir)
}
