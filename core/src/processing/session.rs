use crate::config::CorrectionConfig;
use crate::instrument::frame::RawFrame;
use crate::prelude::{AcquisitionPeriod, LidarError, LidarResult};
use crate::processing::correction::{CorrectedFrame, CorrectedProfile, CorrectionPipeline, DeadtimeStage};
use crate::telemetry::log::LogManager;

/// Frames of one date/period plus the dark-current frames recorded with them.
#[derive(Debug, Clone)]
pub struct MeasurementSession {
    id: String,
    period: Option<AcquisitionPeriod>,
    measurements: Vec<RawFrame>,
    dark_current: Vec<RawFrame>,
}

/// Per-channel mean of the deadtime-corrected dark-current frames.
#[derive(Debug, Clone)]
pub struct DarkCurrentMean {
    labels: Vec<String>,
    profiles: Vec<Vec<f64>>,
    frames: usize,
}

/// Session state assembled before any atmospheric frame is corrected.
pub struct SessionAggregate {
    session: MeasurementSession,
    dark: DarkCurrentMean,
    pipeline: CorrectionPipeline,
    logger: LogManager,
}

impl MeasurementSession {
    pub fn new(
        id: impl Into<String>,
        period: Option<AcquisitionPeriod>,
        mut measurements: Vec<RawFrame>,
        mut dark_current: Vec<RawFrame>,
    ) -> LidarResult<Self> {
        let id = id.into();
        let reference = measurements
            .first()
            .ok_or_else(|| LidarError::InvalidInput(format!("session {} has no measurements", id)))?;
        let labels = reference.labels();
        let bins = reference.bins();
        let resolution = reference.vertical_resolution();

        for frame in measurements.iter().chain(&dark_current) {
            let name = &frame.header().file_name;
            if frame.labels().len() != labels.len() {
                return Err(LidarError::mismatch(
                    format!("session {} channel count of {}", id, name),
                    labels.len(),
                    frame.labels().len(),
                ));
            }
            if frame.labels() != labels {
                return Err(LidarError::InvalidInput(format!(
                    "session {}: {} has channel layout {:?}, expected {:?}",
                    id,
                    name,
                    frame.labels(),
                    labels
                )));
            }
            if frame.bins() != bins {
                return Err(LidarError::mismatch(
                    format!("session {} bins of {}", id, name),
                    bins,
                    frame.bins(),
                ));
            }
            if (frame.vertical_resolution() - resolution).abs() > f64::EPSILON {
                return Err(LidarError::InvalidInput(format!(
                    "session {}: {} has vertical resolution {} m, expected {} m",
                    id,
                    name,
                    frame.vertical_resolution(),
                    resolution
                )));
            }
        }
        measurements.sort_by_key(|frame| frame.header().start);
        dark_current.sort_by_key(|frame| frame.header().start);
        Ok(Self {
            id,
            period,
            measurements,
            dark_current,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn period(&self) -> Option<AcquisitionPeriod> {
        self.period
    }

    pub fn measurements(&self) -> &[RawFrame] {
        &self.measurements
    }

    pub fn dark_current(&self) -> &[RawFrame] {
        &self.dark_current
    }
}

impl DarkCurrentMean {
    /// Averages the deadtime-corrected dark frames; a session without dark
    /// frames gets an all-zero mean shaped like `template`.
    pub fn from_frames(
        frames: &[RawFrame],
        deadtime: &DeadtimeStage,
        template: &RawFrame,
    ) -> LidarResult<Self> {
        let labels = template.labels();
        let bins = template.bins();
        let mut profiles = vec![vec![0.0; bins]; labels.len()];
        for frame in frames {
            for (sum, channel) in profiles.iter_mut().zip(deadtime.apply_frame(frame)?) {
                if channel.len() != sum.len() {
                    return Err(LidarError::mismatch(
                        format!("dark-current frame {}", frame.header().file_name),
                        sum.len(),
                        channel.len(),
                    ));
                }
                for (acc, value) in sum.iter_mut().zip(channel) {
                    *acc += value;
                }
            }
        }
        if !frames.is_empty() {
            let count = frames.len() as f64;
            for profile in &mut profiles {
                profile.iter_mut().for_each(|v| *v /= count);
            }
        }
        Ok(Self {
            labels,
            profiles,
            frames: frames.len(),
        })
    }

    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.profiles.get(index).map(Vec::as_slice)
    }

    pub fn channel_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }
}

impl SessionAggregate {
    pub fn build(session: MeasurementSession, config: &CorrectionConfig) -> LidarResult<Self> {
        let logger = LogManager::scoped(session.id());
        let pipeline = CorrectionPipeline::new(config);
        let template = session
            .measurements()
            .first()
            .ok_or_else(|| LidarError::InvalidInput(format!("session {} is empty", session.id())))?;
        let dark = DarkCurrentMean::from_frames(session.dark_current(), pipeline.deadtime(), template)?;
        if dark.frame_count() == 0 {
            logger.warn("no dark-current frames, dark subtraction is a no-op");
        } else {
            logger.record(&format!("dark-current mean over {} frames", dark.frame_count()));
        }
        Ok(Self {
            session,
            dark,
            pipeline,
            logger,
        })
    }

    pub fn session(&self) -> &MeasurementSession {
        &self.session
    }

    pub fn dark_current(&self) -> &DarkCurrentMean {
        &self.dark
    }

    /// Corrects every atmospheric frame; the first failing frame aborts the session.
    pub fn correct_all(&self) -> LidarResult<Vec<CorrectedFrame>> {
        let corrected = self
            .session
            .measurements()
            .iter()
            .map(|frame| {
                let corrected = self.pipeline.correct_frame(frame, &self.dark)?;
                let backgrounds: Vec<String> = corrected
                    .profiles
                    .iter()
                    .map(|p| format!("{}={:.4}", p.label, p.background))
                    .collect();
                self.logger
                    .scope(&frame.header().file_name)
                    .record(&format!("backgrounds {}", backgrounds.join(" ")));
                Ok(corrected)
            })
            .collect::<LidarResult<Vec<_>>>()?;
        self.logger
            .record(&format!("corrected {} frames", corrected.len()));
        Ok(corrected)
    }
}

/// Bin-wise mean of a session's corrected frames. The result spans the first
/// frame's start to the last frame's stop.
pub fn mean_corrected_profile(frames: &[CorrectedFrame]) -> LidarResult<CorrectedFrame> {
    let first = frames
        .first()
        .ok_or_else(|| LidarError::InvalidInput("no corrected frames to average".into()))?;
    let count = frames.len() as f64;
    let mut profiles = Vec::with_capacity(first.profiles.len());
    for (idx, template) in first.profiles.iter().enumerate() {
        let mut sum = vec![0.0; template.samples.len()];
        let mut background = 0.0;
        for frame in frames {
            let profile = frame.profiles.get(idx).ok_or_else(|| {
                LidarError::mismatch(
                    format!("channels of {}", frame.header.file_name),
                    first.profiles.len(),
                    frame.profiles.len(),
                )
            })?;
            if profile.samples.len() != sum.len() {
                return Err(LidarError::mismatch(
                    format!("{} of {}", profile.label, frame.header.file_name),
                    sum.len(),
                    profile.samples.len(),
                ));
            }
            for (acc, value) in sum.iter_mut().zip(&profile.samples) {
                *acc += value;
            }
            background += profile.background;
        }
        sum.iter_mut().for_each(|v| *v /= count);
        profiles.push(CorrectedProfile::new(
            template.label.clone(),
            template.channel,
            template.vertical_resolution,
            background / count,
            sum,
        ));
    }

    let mut header = first.header.clone();
    if let Some(last) = frames.last() {
        header.stop = last.header.stop;
    }
    Ok(CorrectedFrame {
        header,
        shots: first.shots,
        vertical_resolution: first.vertical_resolution,
        profiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderConfig, GlueConfig};
    use crate::instrument::decoder::FrameDecoder;
    use crate::instrument::encoder::{ChannelRecord, RecordBuilder};
    use crate::instrument::frame::{ChannelDescriptor, DetectionMode, FrameHeader};
    use crate::processing::glue::ChannelGluer;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use statrs::distribution::{ContinuousCDF, Normal};

    fn header(name: &str, minute: u32) -> FrameHeader {
        let start = NaiveDate::from_ymd_opt(2021, 6, 16)
            .unwrap()
            .and_hms_opt(21, minute, 0)
            .unwrap();
        FrameHeader {
            file_name: name.to_string(),
            site: "SaoPaulo".to_string(),
            latitude: -23.6,
            longitude: -46.7,
            station_altitude: 760.0,
            start,
            stop: start + chrono::Duration::seconds(59),
            laser_frequency: 10,
            laser_shots: 3000,
        }
    }

    fn descriptor(mode: DetectionMode, counts: Vec<f64>) -> ChannelDescriptor {
        ChannelDescriptor {
            label: mode.label(532),
            wavelength: 532,
            mode,
            bit_depth: 12,
            normalization: 500.0,
            bins: counts.len(),
            vertical_resolution: 1.0,
            shots: 3000,
            counts,
        }
    }

    fn frame(name: &str, minute: u32, analog: Vec<f64>, photon: Vec<f64>) -> RawFrame {
        RawFrame::new(
            header(name, minute),
            vec![
                descriptor(DetectionMode::Analog, analog),
                descriptor(DetectionMode::PhotonCounting, photon),
            ],
        )
    }

    fn two_channel_config() -> CorrectionConfig {
        CorrectionConfig {
            deadtime: vec![0.0, 0.0035],
            bin_shift: vec![1, -1],
            background_window_m: [29000.0, 29999.0],
            background_offset: vec![0.0, 0.002],
        }
    }

    #[test]
    fn session_rejects_mixed_bin_counts() {
        let a = frame("a", 0, vec![1.0; 10], vec![1.0; 10]);
        let b = frame("b", 1, vec![1.0; 12], vec![1.0; 12]);
        let err = MeasurementSession::new("s", None, vec![a, b], vec![]).unwrap_err();
        assert!(matches!(err, LidarError::ArrayLengthMismatch { .. }));
    }

    #[test]
    fn dark_mismatch_is_fatal_for_the_session() {
        let config = CorrectionConfig {
            background_window_m: [5.0, 9.0],
            ..two_channel_config()
        };
        let session = MeasurementSession::new(
            "s",
            None,
            vec![frame("a", 0, vec![1.0; 10], vec![1.0; 10])],
            vec![],
        )
        .unwrap();
        let aggregate = SessionAggregate::build(session, &config).unwrap();
        let short_dark = DarkCurrentMean {
            labels: vec!["532AN".into(), "532PC".into()],
            profiles: vec![vec![0.0; 8], vec![0.0; 8]],
            frames: 1,
        };
        let pipeline = CorrectionPipeline::new(&config);
        let err = pipeline
            .correct_frame(&aggregate.session().measurements()[0], &short_dark)
            .unwrap_err();
        assert!(matches!(err, LidarError::ArrayLengthMismatch { expected: 10, actual: 8, .. }));
    }

    #[test]
    fn dark_mean_is_taken_after_deadtime() {
        let config = CorrectionConfig {
            background_window_m: [5.0, 9.0],
            ..two_channel_config()
        };
        let darks = vec![
            frame("d1", 0, vec![2.0; 10], vec![4.0; 10]),
            frame("d2", 1, vec![4.0; 10], vec![8.0; 10]),
        ];
        let template = frame("a", 2, vec![0.0; 10], vec![0.0; 10]);
        let dark =
            DarkCurrentMean::from_frames(&darks, &DeadtimeStage::new(&config), &template).unwrap();
        assert_eq!(dark.frame_count(), 2);
        assert!((dark.channel(0).unwrap()[0] - 3.0).abs() < 1e-12);
        let expected = (4.0 / (1.0 - 4.0 * 0.0035) + 8.0 / (1.0 - 8.0 * 0.0035)) / 2.0;
        assert!((dark.channel(1).unwrap()[3] - expected).abs() < 1e-12);
    }

    #[test]
    fn mean_profile_spans_the_session() {
        let config = CorrectionConfig {
            background_window_m: [5.0, 9.0],
            bin_shift: vec![0, 0],
            ..two_channel_config()
        };
        let session = MeasurementSession::new(
            "s",
            None,
            vec![
                frame("b", 5, vec![3.0; 10], vec![1.0; 10]),
                frame("a", 0, vec![1.0; 10], vec![1.0; 10]),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(session.measurements()[0].header().file_name, "a");
        let aggregate = SessionAggregate::build(session, &config).unwrap();
        let corrected = aggregate.correct_all().unwrap();
        let mean = mean_corrected_profile(&corrected).unwrap();
        assert_eq!(mean.header.start, corrected[0].header.start);
        assert_eq!(mean.header.stop, corrected[1].header.stop);
        assert!((mean.require("532AN").unwrap().background - 2.0).abs() < 1e-12);
    }

    fn alternating(n: usize, even: f64, odd: f64) -> Vec<i32> {
        (0..n)
            .map(|i| if i % 2 == 0 { even } else { odd })
            .map(|value| value as i32)
            .collect()
    }

    #[test]
    fn decoded_two_channel_frame_matches_hand_computed_corrections() {
        let bins = 30000;
        let decoder_config = DecoderConfig::default();
        // analog: raw / 4096 * (500 / 3000), so 24576 raw units per count
        let analog = alternating(bins, 100.0 * 24576.0, 150.0 * 24576.0);
        // photon counting: round(raw / 65536) * (20 / 20 shots)
        let photon = alternating(bins, 5.0 * 65536.0, 8.0 * 65536.0);
        let channel = |mode, shots, raw| ChannelRecord {
            wavelength: 532,
            mode,
            vertical_resolution: 1.0,
            adc_bits: 12,
            shots,
            input_range: 0.5,
            raw,
        };
        let record = |name: &str, analog: Vec<i32>, photon: Vec<i32>| {
            RecordBuilder::new(&decoder_config, header(name, 0))
                .channel(channel(DetectionMode::Analog, 3000, analog))
                .channel(channel(DetectionMode::PhotonCounting, 20, photon))
                .build()
                .unwrap()
        };
        let decoder = FrameDecoder::new(decoder_config.clone()).unwrap();
        let measurement = decoder.decode(&record("m", analog, photon)).unwrap();
        let dark = decoder
            .decode(&record("d", vec![0; bins], vec![0; bins]))
            .unwrap();

        let session = MeasurementSession::new(
            "20210616nt",
            Some(AcquisitionPeriod::Night),
            vec![measurement],
            vec![dark],
        )
        .unwrap();
        let aggregate = SessionAggregate::build(session, &two_channel_config()).unwrap();
        let corrected = aggregate.correct_all().unwrap();
        let an = corrected[0].require("532AN").unwrap();
        let pc = corrected[0].require("532PC").unwrap();

        // shifted analog is 150/100 alternating; bin 29999 repeats 150
        assert!((an.background - 125.05).abs() < 1e-4);
        assert!((an.samples[0] - 24.95).abs() < 1e-4);
        assert!((an.samples[1] + 25.05).abs() < 1e-4);
        assert!((an.range_corrected[1] + 100.2).abs() < 1e-4);

        let d5 = 5.0 / (1.0 - 5.0 * 0.0035);
        let d8 = 8.0 / (1.0 - 8.0 * 0.0035);
        let background = (d5 + d8) / 2.0 - 0.002;
        assert!((pc.background - background).abs() < 1e-4);
        assert!((pc.samples[0] - (d5 - background)).abs() < 1e-4);
        assert!((pc.samples[1] - (d5 - background)).abs() < 1e-4);
        assert!((pc.samples[2] - (d8 - background)).abs() < 1e-4);
        assert!((pc.range_corrected[2] - 9.0 * (d8 - background)).abs() < 1e-4);
    }

    #[test]
    fn corrected_and_glued_profile_matches_designed_overlap() {
        let bins = 30000;
        let (region_start, region_end) = (600, 700);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(2021);
        let analog_target: Vec<f64> = (0..bins)
            .map(|i| if i < 29000 { 5000.0 * (-(i as f64) / 400.0).exp() } else { 0.0 })
            .collect();
        let photon_target: Vec<f64> = (0..bins)
            .map(|i| {
                if (region_start..region_end).contains(&i) {
                    let noise = normal.inverse_cdf(rng.gen_range(1e-9..1.0 - 1e-9));
                    0.5 * analog_target[i] + 0.3 * noise
                } else if i < 29000 {
                    40.0 + 10.0 * (2.3 * i as f64).sin()
                } else {
                    0.002
                }
            })
            .collect();

        // invert shift +1 for analog (no deadtime) and shift -1 plus deadtime for photon counting
        let analog_raw: Vec<f64> = (0..bins)
            .map(|j| if j == 0 { analog_target[0] } else { analog_target[j - 1] })
            .collect();
        let photon_raw: Vec<f64> = (0..bins)
            .map(|j| {
                let linear = if j + 1 < bins { photon_target[j + 1] - 0.002 } else { 0.0 };
                linear / (1.0 + 0.0035 * linear)
            })
            .collect();

        let session = MeasurementSession::new(
            "20210616nt",
            Some(AcquisitionPeriod::Night),
            vec![frame("m", 0, analog_raw, photon_raw)],
            vec![frame("d", 1, vec![0.0; bins], vec![0.0; bins])],
        )
        .unwrap();
        let aggregate = SessionAggregate::build(session, &two_channel_config()).unwrap();
        let mean = mean_corrected_profile(&aggregate.correct_all().unwrap()).unwrap();
        let an = &mean.require("532AN").unwrap().samples;
        let pc = &mean.require("532PC").unwrap().samples;
        for i in [1, 650, 28000] {
            assert!((an[i] - analog_target[i]).abs() < 1e-9);
            assert!((pc[i] - photon_target[i]).abs() < 1e-6);
        }

        let gluer = ChannelGluer::new(GlueConfig {
            min_idx: 400,
            max_idx: 1000,
            intercept_threshold: 2.0,
            ..GlueConfig::default()
        });
        let glued = gluer.glue_frame(&mean, 532).unwrap();
        let width = 50;
        assert!(glued.window_start >= region_start && glued.window_end <= region_end);
        assert_eq!(glued.window_center, glued.window_start + width / 2);
        assert!((glued.lower_constant - 0.5).abs() < 5e-3);
        assert_eq!(glued.upper_constant, 1.0);

        let s = glued.window_start;
        for i in [100, s - 1, s, s + 17, s + width - 1, s + width, 5000] {
            let weight = if i < s {
                1.0
            } else if i < s + width {
                1.0 - (i - s) as f64 / width as f64
            } else {
                0.0
            };
            let expected = weight * glued.lower_constant * analog_target[i]
                + (1.0 - weight) * photon_target[i];
            assert!((glued.samples[i] - expected).abs() < 1e-4, "bin {}", i);
        }
    }
}
