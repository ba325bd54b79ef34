use crate::config::CorrectionConfig;
use crate::instrument::frame::{altitude_grid, ChannelDescriptor, FrameHeader, RawFrame};
use crate::math::stats::StatsHelper;
use crate::prelude::{
    LidarError, LidarResult, ProcessingStage, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::processing::session::DarkCurrentMean;
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

/// Saturation linearization `x / (1 - x c)` with a per-channel coefficient.
pub struct DeadtimeStage {
    config: CorrectionConfig,
    logger: LogManager,
}

/// Removes the session's mean dark-current profile bin by bin.
pub struct DarkCurrentStage<'a> {
    dark: &'a DarkCurrentMean,
}

/// Aligns channels whose trigger delays differ by a whole number of bins.
pub struct BinShiftStage {
    config: CorrectionConfig,
}

/// Subtracts the mean of a far-range window, less an empirical offset.
pub struct BackgroundStage {
    config: CorrectionConfig,
    logger: LogManager,
}

/// One channel after the full correction chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectedProfile {
    pub label: String,
    pub channel: usize,
    pub vertical_resolution: f64,
    pub background: f64,
    pub samples: Vec<f64>,
    /// `samples * altitude^2`.
    pub range_corrected: Vec<f64>,
}

impl CorrectedProfile {
    pub fn new(
        label: String,
        channel: usize,
        vertical_resolution: f64,
        background: f64,
        samples: Vec<f64>,
    ) -> Self {
        let range_corrected = range_correct(&samples, vertical_resolution);
        Self {
            label,
            channel,
            vertical_resolution,
            background,
            samples,
            range_corrected,
        }
    }

    pub fn altitudes(&self) -> Vec<f64> {
        altitude_grid(self.samples.len(), self.vertical_resolution)
    }
}

/// Every channel of one frame after correction, with the frame's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectedFrame {
    pub header: FrameHeader,
    pub shots: u32,
    pub vertical_resolution: f64,
    pub profiles: Vec<CorrectedProfile>,
}

impl CorrectedFrame {
    pub fn profile(&self, label: &str) -> Option<&CorrectedProfile> {
        self.profiles.iter().find(|profile| profile.label == label)
    }

    pub fn require(&self, label: &str) -> LidarResult<&CorrectedProfile> {
        self.profile(label).ok_or_else(|| {
            LidarError::InvalidInput(format!(
                "{} has no channel {}",
                self.header.file_name, label
            ))
        })
    }

    pub fn bins(&self) -> usize {
        self.profiles.first().map(|p| p.samples.len()).unwrap_or(0)
    }

    pub fn labels(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.label.clone()).collect()
    }

    pub fn altitudes(&self) -> Vec<f64> {
        altitude_grid(self.bins(), self.vertical_resolution)
    }
}

pub fn range_correct(samples: &[f64], vertical_resolution: f64) -> Vec<f64> {
    samples
        .iter()
        .zip(altitude_grid(samples.len(), vertical_resolution))
        .map(|(value, altitude)| value * altitude * altitude)
        .collect()
}

/// Applied to every bin, including those past the saturation point `x c >= 1`.
pub fn deadtime_correct(samples: &[f64], coefficient: f64) -> Vec<f64> {
    samples
        .iter()
        .map(|&value| value / (1.0 - value * coefficient))
        .collect()
}

/// Bins whose count rate reaches the saturation point of `coefficient`.
pub fn saturated_bins(samples: &[f64], coefficient: f64) -> Vec<usize> {
    samples
        .iter()
        .enumerate()
        .filter(|&(_, &value)| coefficient > 0.0 && 1.0 - value * coefficient <= 0.0)
        .map(|(bin, _)| bin)
        .collect()
}

/// Positive `bins` moves samples toward lower range and repeats the last
/// original sample at the far end; negative moves them outward and repeats the first.
pub fn shift_bins(samples: &[f64], bins: i64) -> Vec<f64> {
    let n = samples.len();
    if n == 0 || bins == 0 {
        return samples.to_vec();
    }
    let k = bins.unsigned_abs() as usize;
    if bins > 0 {
        let fill = samples[n - 1];
        (0..n)
            .map(|i| if i + k < n { samples[i + k] } else { fill })
            .collect()
    } else {
        let fill = samples[0];
        (0..n)
            .map(|i| if i >= k { samples[i - k] } else { fill })
            .collect()
    }
}

impl DeadtimeStage {
    pub fn new(config: &CorrectionConfig) -> Self {
        Self {
            config: config.clone(),
            logger: LogManager::scoped("deadtime"),
        }
    }

    /// Channel-wise correction of a whole frame; dark-current frames take this path alone.
    pub fn apply_frame(&self, frame: &RawFrame) -> LidarResult<Vec<Vec<f64>>> {
        frame
            .channels()
            .iter()
            .enumerate()
            .map(|(idx, channel)| {
                let output = self.execute(stage_input(idx, channel, channel.counts.clone()))?;
                Ok(output.samples)
            })
            .collect()
    }
}

impl ProcessingStage for DeadtimeStage {
    fn name(&self) -> &'static str {
        "deadtime"
    }

    fn execute(&self, input: StageInput) -> StageResult<StageOutput> {
        let coefficient = self.config.deadtime_for(input.channel);
        let saturated = saturated_bins(&input.samples, coefficient);
        let mut notes = Vec::new();
        if let Some(first) = saturated.first() {
            let note = format!(
                "{} saturated bins from bin {} (coefficient {})",
                saturated.len(),
                first,
                coefficient
            );
            self.logger.scope(&input.label).warn(&note);
            notes.push(note);
        }
        Ok(StageOutput {
            samples: deadtime_correct(&input.samples, coefficient),
            metadata: StageMetadata {
                notes,
                ..Default::default()
            },
        })
    }
}

impl<'a> DarkCurrentStage<'a> {
    pub fn new(dark: &'a DarkCurrentMean) -> Self {
        Self { dark }
    }
}

impl ProcessingStage for DarkCurrentStage<'_> {
    fn name(&self) -> &'static str {
        "dark_current"
    }

    fn execute(&self, input: StageInput) -> StageResult<StageOutput> {
        let dark = self.dark.channel(input.channel).ok_or_else(|| {
            LidarError::mismatch(
                format!("dark-current channels for {}", input.label),
                input.channel + 1,
                self.dark.channel_count(),
            )
        })?;
        if dark.len() != input.samples.len() {
            return Err(LidarError::mismatch(
                format!("dark-current mean for {}", input.label),
                input.samples.len(),
                dark.len(),
            ));
        }
        let samples = input
            .samples
            .iter()
            .zip(dark)
            .map(|(value, offset)| value - offset)
            .collect();
        Ok(StageOutput {
            samples,
            metadata: StageMetadata::default(),
        })
    }
}

impl BinShiftStage {
    pub fn new(config: &CorrectionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl ProcessingStage for BinShiftStage {
    fn name(&self) -> &'static str {
        "bin_shift"
    }

    fn execute(&self, input: StageInput) -> StageResult<StageOutput> {
        let shift = self.config.bin_shift_for(input.channel);
        Ok(StageOutput {
            samples: shift_bins(&input.samples, shift),
            metadata: StageMetadata {
                notes: vec![format!("shift {}", shift)],
                ..Default::default()
            },
        })
    }
}

impl BackgroundStage {
    pub fn new(config: &CorrectionConfig) -> Self {
        Self {
            config: config.clone(),
            logger: LogManager::scoped("background"),
        }
    }

    /// Inclusive bin bounds of the reference window, clipped to the profile.
    fn window_bins(&self, bins: usize, vertical_resolution: f64) -> LidarResult<(usize, usize)> {
        if vertical_resolution <= 0.0 {
            return Err(LidarError::InvalidInput(format!(
                "vertical resolution {} m",
                vertical_resolution
            )));
        }
        let [low_m, high_m] = self.config.background_window_m;
        let low = (low_m / vertical_resolution).floor() as usize;
        let high = ((high_m / vertical_resolution).floor() as usize).min(bins.saturating_sub(1));
        if low > high || low >= bins {
            return Err(LidarError::InvalidInput(format!(
                "background window {}-{} m lies outside {} bins of {} m",
                low_m, high_m, bins, vertical_resolution
            )));
        }
        Ok((low, high))
    }
}

impl ProcessingStage for BackgroundStage {
    fn name(&self) -> &'static str {
        "background"
    }

    fn execute(&self, input: StageInput) -> StageResult<StageOutput> {
        let (low, high) = self.window_bins(input.samples.len(), input.vertical_resolution)?;
        let offset = self.config.background_offset_for(input.channel);
        let background = StatsHelper::mean(&input.samples[low..=high]) - offset;
        self.logger
            .record(&format!("{} background {:.6}", input.label, background));
        Ok(StageOutput {
            samples: input.samples.iter().map(|v| v - background).collect(),
            metadata: StageMetadata {
                background: Some(background),
                notes: vec![format!("window bins {}..={}", low, high)],
            },
        })
    }
}

/// The four corrections in their fixed order.
pub struct CorrectionPipeline {
    deadtime: DeadtimeStage,
    bin_shift: BinShiftStage,
    background: BackgroundStage,
}

impl CorrectionPipeline {
    pub fn new(config: &CorrectionConfig) -> Self {
        Self {
            deadtime: DeadtimeStage::new(config),
            bin_shift: BinShiftStage::new(config),
            background: BackgroundStage::new(config),
        }
    }

    pub fn deadtime(&self) -> &DeadtimeStage {
        &self.deadtime
    }

    pub fn correct_channel(
        &self,
        index: usize,
        channel: &ChannelDescriptor,
        dark: &DarkCurrentMean,
    ) -> LidarResult<CorrectedProfile> {
        let input = stage_input(index, channel, channel.counts.clone());
        let linear = self.deadtime.execute(input.clone())?;
        let dark_free = DarkCurrentStage::new(dark).execute(input.with_samples(linear.samples))?;
        let aligned = self.bin_shift.execute(input.with_samples(dark_free.samples))?;
        let output = self.background.execute(input.with_samples(aligned.samples))?;
        Ok(CorrectedProfile::new(
            channel.label.clone(),
            index,
            channel.vertical_resolution,
            output.metadata.background.unwrap_or(0.0),
            output.samples,
        ))
    }

    pub fn correct_frame(&self, frame: &RawFrame, dark: &DarkCurrentMean) -> LidarResult<CorrectedFrame> {
        let profiles = frame
            .channels()
            .iter()
            .enumerate()
            .map(|(idx, channel)| self.correct_channel(idx, channel, dark))
            .collect::<LidarResult<Vec<_>>>()?;
        Ok(CorrectedFrame {
            header: frame.header().clone(),
            shots: frame.declared_shots(),
            vertical_resolution: frame.vertical_resolution(),
            profiles,
        })
    }
}

fn stage_input(index: usize, channel: &ChannelDescriptor, samples: Vec<f64>) -> StageInput {
    StageInput {
        channel: index,
        label: channel.label.clone(),
        vertical_resolution: channel.vertical_resolution,
        samples,
    }
}
