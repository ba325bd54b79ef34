//! Writes records in the instrument layout; used by the synthetic generator and tests.

use crate::config::DecoderConfig;
use crate::instrument::frame::{DetectionMode, FrameHeader};
use crate::instrument::layout::{FieldSpan, HeaderLayout};
use crate::prelude::{LidarError, LidarResult};
use byteorder::{LittleEndian, WriteBytesExt};

/// One channel line plus its raw digitizer words.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub wavelength: u32,
    pub mode: DetectionMode,
    pub vertical_resolution: f64,
    pub adc_bits: u32,
    pub shots: u32,
    /// Analog input range in volts; ignored by photon-counting channels.
    pub input_range: f64,
    pub raw: Vec<i32>,
}

pub struct RecordBuilder {
    layout: HeaderLayout,
    trailer_words: usize,
    header: FrameHeader,
    channels: Vec<ChannelRecord>,
}

impl RecordBuilder {
    pub fn new(config: &DecoderConfig, header: FrameHeader) -> Self {
        Self {
            layout: config.layout.clone(),
            trailer_words: config.pair_trailer_words,
            header,
            channels: Vec::new(),
        }
    }

    pub fn channel(mut self, channel: ChannelRecord) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn build(&self) -> LidarResult<Vec<u8>> {
        if self.channels.is_empty() || self.channels.len() % 2 != 0 {
            return Err(LidarError::InvalidInput(format!(
                "records carry analog/photon-counting pairs, got {} channels",
                self.channels.len()
            )));
        }
        let bins = self.channels[0].raw.len();
        if let Some(other) = self.channels.iter().find(|c| c.raw.len() != bins) {
            return Err(LidarError::mismatch(
                format!("record channel {}{}", other.wavelength, other.mode.suffix()),
                bins,
                other.raw.len(),
            ));
        }

        let layout = &self.layout;
        let mut lines = vec![String::new(); layout.header_line_count(self.channels.len())];
        lines[0] = self.header.file_name.clone();
        lines[layout.location_line] = self.location_line()?;
        lines[layout.laser_line] = self.laser_line()?;
        for (idx, channel) in self.channels.iter().enumerate() {
            lines[layout.first_channel_line + idx] = self.channel_line(channel, bins)?;
        }

        let mut bytes = Vec::new();
        for line in &lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        for pair in self.channels.chunks(2) {
            for channel in pair {
                for &word in &channel.raw {
                    bytes.write_i32::<LittleEndian>(word)?;
                }
            }
            for _ in 0..self.trailer_words {
                bytes.write_i32::<LittleEndian>(0)?;
            }
        }
        Ok(bytes)
    }

    fn location_line(&self) -> LidarResult<String> {
        let fields = &self.layout.location;
        let header = &self.header;
        let date = &self.layout.date_format;
        let time = &self.layout.time_format;
        let mut line = LineBuffer::for_spans(&fields.named());
        line.put("site", fields.site, &header.site)?;
        line.put("start_date", fields.start_date, &header.start.format(date).to_string())?;
        line.put("start_time", fields.start_time, &header.start.format(time).to_string())?;
        line.put("stop_date", fields.stop_date, &header.stop.format(date).to_string())?;
        line.put("stop_time", fields.stop_time, &header.stop.format(time).to_string())?;
        line.put(
            "altitude",
            fields.altitude,
            &format!("{:0w$.0}", header.station_altitude, w = fields.altitude.width()),
        )?;
        line.put(
            "longitude",
            fields.longitude,
            &format!("{:0w$.1}", header.longitude, w = fields.longitude.width()),
        )?;
        line.put(
            "latitude",
            fields.latitude,
            &format!("{:0w$.1}", header.latitude, w = fields.latitude.width()),
        )?;
        Ok(line.finish())
    }

    fn laser_line(&self) -> LidarResult<String> {
        let fields = &self.layout.laser;
        let mut line = LineBuffer::for_spans(&fields.named());
        line.put(
            "laser_shots",
            fields.shots,
            &format!("{:0w$}", self.header.laser_shots, w = fields.shots.width()),
        )?;
        line.put(
            "laser_frequency",
            fields.frequency,
            &format!("{:0w$}", self.header.laser_frequency, w = fields.frequency.width()),
        )?;
        line.put(
            "channel_count",
            fields.channel_count,
            &format!("{:0w$}", self.channels.len(), w = fields.channel_count.width()),
        )?;
        Ok(line.finish())
    }

    fn channel_line(&self, channel: &ChannelRecord, bins: usize) -> LidarResult<String> {
        let fields = &self.layout.channel;
        let mut line = LineBuffer::for_spans(&fields.named());
        let flag = match channel.mode {
            DetectionMode::Analog => "0",
            DetectionMode::PhotonCounting => "1",
        };
        line.put("mode", fields.mode, flag)?;
        line.put("bins", fields.bins, &format!("{:0w$}", bins, w = fields.bins.width()))?;
        line.put(
            "bin_width",
            fields.bin_width,
            &format!("{:.2}", channel.vertical_resolution),
        )?;
        line.put(
            "wavelength",
            fields.wavelength,
            &format!("{:0w$}", channel.wavelength, w = fields.wavelength.width()),
        )?;
        line.put(
            "adc_bits",
            fields.adc_bits,
            &format!("{:0w$}", channel.adc_bits, w = fields.adc_bits.width()),
        )?;
        line.put(
            "shots",
            fields.shots,
            &format!("{:0w$}", channel.shots, w = fields.shots.width()),
        )?;
        line.put("input_range", fields.input_range, &format!("{:.3}", channel.input_range))?;
        Ok(line.finish())
    }
}

struct LineBuffer {
    chars: Vec<u8>,
}

impl LineBuffer {
    fn for_spans(spans: &[(&'static str, FieldSpan)]) -> Self {
        Self {
            chars: vec![b' '; HeaderLayout::line_width(spans)],
        }
    }

    /// Right-aligns `text` inside `span`.
    fn put(&mut self, name: &str, span: FieldSpan, text: &str) -> LidarResult<()> {
        if !text.is_ascii() || text.len() > span.width() {
            return Err(LidarError::InvalidInput(format!(
                "value {:?} does not fit field {} ({} characters)",
                text,
                name,
                span.width()
            )));
        }
        let start = span.end - text.len();
        self.chars[start..span.end].copy_from_slice(text.as_bytes());
        Ok(())
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.chars).into_owned()
    }
}
