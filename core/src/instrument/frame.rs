use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Acquisition mode of a detector channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DetectionMode {
    Analog,
    PhotonCounting,
}

impl DetectionMode {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Analog => "AN",
            Self::PhotonCounting => "PC",
        }
    }

    /// Channel label used throughout the level files, e.g. `532AN`.
    pub fn label(&self, wavelength: u32) -> String {
        format!("{}{}", wavelength, self.suffix())
    }
}

/// Per-channel block of one raw record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub label: String,
    pub wavelength: u32,
    pub mode: DetectionMode,
    pub bit_depth: u32,
    pub normalization: f64,
    pub bins: usize,
    pub vertical_resolution: f64,
    pub shots: u32,
    pub counts: Vec<f64>,
}

/// Station and timing fields shared by every channel of a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameHeader {
    pub file_name: String,
    pub site: String,
    pub latitude: f64,
    pub longitude: f64,
    pub station_altitude: f64,
    pub start: NaiveDateTime,
    pub stop: NaiveDateTime,
    pub laser_frequency: u32,
    pub laser_shots: u32,
}

/// One decoded instrument acquisition. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    header: FrameHeader,
    channels: Vec<ChannelDescriptor>,
}

impl RawFrame {
    pub fn new(header: FrameHeader, channels: Vec<ChannelDescriptor>) -> Self {
        Self { header, channels }
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn channel(&self, label: &str) -> Option<&ChannelDescriptor> {
        self.channels.iter().find(|channel| channel.label == label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.label.clone()).collect()
    }

    pub fn bins(&self) -> usize {
        self.channels.first().map(|c| c.bins).unwrap_or(0)
    }

    pub fn vertical_resolution(&self) -> f64 {
        self.channels
            .first()
            .map(|c| c.vertical_resolution)
            .unwrap_or(0.0)
    }

    /// Declared shot count of the first channel, written into the level-file header.
    pub fn declared_shots(&self) -> u32 {
        self.channels.first().map(|c| c.shots).unwrap_or(0)
    }

    /// Range grid in metres above the station, one entry per bin.
    pub fn altitudes(&self) -> Vec<f64> {
        altitude_grid(self.bins(), self.vertical_resolution())
    }
}

/// `altitude[i] = (i + 1) * vertical_resolution`.
pub fn altitude_grid(bins: usize, vertical_resolution: f64) -> Vec<f64> {
    (0..bins)
        .map(|idx| (idx as f64 + 1.0) * vertical_resolution)
        .collect()
}
