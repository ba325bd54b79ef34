//! Declarative description of the instrument's text header.
//!
//! Every field is addressed by a character span within a known header line, so
//! firmware variants are expressed as a different table rather than new code.

use crate::prelude::{LidarError, LidarResult};
use serde::{Deserialize, Serialize};

/// Half-open character range `[start, end)` within one header line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpan {
    pub start: usize,
    pub end: usize,
}

impl FieldSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        line.get(self.start..self.end)
    }

    fn overlaps(&self, other: &FieldSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Fields of the location/timing line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationFields {
    pub site: FieldSpan,
    pub start_date: FieldSpan,
    pub start_time: FieldSpan,
    pub stop_date: FieldSpan,
    pub stop_time: FieldSpan,
    pub altitude: FieldSpan,
    pub longitude: FieldSpan,
    pub latitude: FieldSpan,
}

/// Fields of the laser line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaserFields {
    pub shots: FieldSpan,
    pub frequency: FieldSpan,
    pub channel_count: FieldSpan,
}

/// Fields repeated on every channel line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelFields {
    pub mode: FieldSpan,
    pub bins: FieldSpan,
    pub bin_width: FieldSpan,
    pub wavelength: FieldSpan,
    pub adc_bits: FieldSpan,
    pub shots: FieldSpan,
    pub input_range: FieldSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeaderLayout {
    /// Zero-based line indices within the header.
    pub location_line: usize,
    pub laser_line: usize,
    pub first_channel_line: usize,
    /// Blank lines between the last channel line and the binary payload.
    pub separator_lines: usize,
    pub date_format: String,
    pub time_format: String,
    pub location: LocationFields,
    pub laser: LaserFields,
    pub channel: ChannelFields,
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self {
            location_line: 1,
            laser_line: 2,
            first_channel_line: 3,
            separator_lines: 1,
            date_format: "%d/%m/%Y".to_string(),
            time_format: "%H:%M:%S".to_string(),
            location: LocationFields {
                site: FieldSpan::new(1, 10),
                start_date: FieldSpan::new(10, 20),
                start_time: FieldSpan::new(21, 29),
                stop_date: FieldSpan::new(30, 40),
                stop_time: FieldSpan::new(41, 49),
                altitude: FieldSpan::new(50, 54),
                longitude: FieldSpan::new(55, 61),
                latitude: FieldSpan::new(62, 68),
            },
            laser: LaserFields {
                shots: FieldSpan::new(14, 21),
                frequency: FieldSpan::new(9, 13),
                channel_count: FieldSpan::new(27, 29),
            },
            channel: ChannelFields {
                mode: FieldSpan::new(3, 4),
                bins: FieldSpan::new(7, 12),
                bin_width: FieldSpan::new(20, 24),
                wavelength: FieldSpan::new(25, 30),
                adc_bits: FieldSpan::new(44, 46),
                shots: FieldSpan::new(47, 53),
                input_range: FieldSpan::new(54, 59),
            },
        }
    }
}

impl LocationFields {
    pub fn named(&self) -> Vec<(&'static str, FieldSpan)> {
        vec![
            ("site", self.site),
            ("start_date", self.start_date),
            ("start_time", self.start_time),
            ("stop_date", self.stop_date),
            ("stop_time", self.stop_time),
            ("altitude", self.altitude),
            ("longitude", self.longitude),
            ("latitude", self.latitude),
        ]
    }
}

impl LaserFields {
    pub fn named(&self) -> Vec<(&'static str, FieldSpan)> {
        vec![
            ("laser_shots", self.shots),
            ("laser_frequency", self.frequency),
            ("channel_count", self.channel_count),
        ]
    }
}

impl ChannelFields {
    pub fn named(&self) -> Vec<(&'static str, FieldSpan)> {
        vec![
            ("mode", self.mode),
            ("bins", self.bins),
            ("bin_width", self.bin_width),
            ("wavelength", self.wavelength),
            ("adc_bits", self.adc_bits),
            ("shots", self.shots),
            ("input_range", self.input_range),
        ]
    }
}

impl HeaderLayout {
    /// Checks the table once, before any record is decoded.
    pub fn validate(&self) -> LidarResult<()> {
        if !(self.location_line < self.laser_line && self.laser_line < self.first_channel_line) {
            return Err(LidarError::InvalidInput(format!(
                "header lines out of order: location {}, laser {}, first channel {}",
                self.location_line, self.laser_line, self.first_channel_line
            )));
        }
        check_group("location", &self.location.named())?;
        check_group("laser", &self.laser.named())?;
        check_group("channel", &self.channel.named())?;
        Ok(())
    }

    /// Number of text lines preceding the payload for a record with `channels` channels.
    pub fn header_line_count(&self, channels: usize) -> usize {
        self.first_channel_line + channels + self.separator_lines
    }

    /// Minimum line length needed to hold every field of a group.
    pub fn line_width(spans: &[(&'static str, FieldSpan)]) -> usize {
        spans.iter().map(|(_, span)| span.end).max().unwrap_or(0)
    }
}

fn check_group(group: &str, spans: &[(&'static str, FieldSpan)]) -> LidarResult<()> {
    for (idx, (name, span)) in spans.iter().enumerate() {
        if span.width() == 0 {
            return Err(LidarError::InvalidInput(format!(
                "{} field {} has an empty span",
                group, name
            )));
        }
        for (other_name, other) in &spans[idx + 1..] {
            if span.overlaps(other) {
                return Err(LidarError::InvalidInput(format!(
                    "{} fields {} and {} overlap",
                    group, name, other_name
                )));
            }
        }
    }
    Ok(())
}
