use crate::config::DecoderConfig;
use crate::instrument::frame::{ChannelDescriptor, DetectionMode, FrameHeader, RawFrame};
use crate::instrument::layout::FieldSpan;
use crate::prelude::{LidarError, LidarResult};
use crate::telemetry::log::LogManager;
use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const WORD_BYTES: usize = 4;

/// Decodes one binary instrument record into a [`RawFrame`].
pub struct FrameDecoder {
    config: DecoderConfig,
    logger: LogManager,
}

/// Outcome of decoding a batch of files.
#[derive(Debug, Default)]
pub struct TriageReport {
    pub accepted: Vec<(PathBuf, RawFrame)>,
    /// Shot count outside the accepted band; to be moved aside by the caller.
    pub quarantined: Vec<(PathBuf, LidarError)>,
    /// Unreadable or malformed records.
    pub rejected: Vec<(PathBuf, LidarError)>,
}

struct ChannelLine {
    wavelength: u32,
    mode: DetectionMode,
    bins: usize,
    vertical_resolution: f64,
    adc_bits: u32,
    shots: u32,
    input_range: f64,
}

struct LineReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LineReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next_line(&mut self, index: usize) -> LidarResult<String> {
        let rest = &self.bytes[self.pos..];
        let end = rest
            .iter()
            .position(|&byte| byte == b'\n')
            .ok_or_else(|| LidarError::malformed(index, "line", "header ends early"))?;
        let mut line = &rest[..end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(line).into_owned())
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

impl FrameDecoder {
    pub fn new(config: DecoderConfig) -> LidarResult<Self> {
        config.layout.validate()?;
        if config.min_shots > config.max_shots {
            return Err(LidarError::InvalidInput(format!(
                "shot band [{}, {}] is empty",
                config.min_shots, config.max_shots
            )));
        }
        Ok(Self {
            config,
            logger: LogManager::scoped("decoder"),
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn decode(&self, bytes: &[u8]) -> LidarResult<RawFrame> {
        let layout = &self.config.layout;
        let mut reader = LineReader::new(bytes);
        let mut lines = Vec::with_capacity(layout.first_channel_line + 16);
        for idx in 0..layout.first_channel_line {
            lines.push(reader.next_line(idx)?);
        }

        let channel_count: usize = parse_field(
            &lines,
            layout.laser_line,
            layout.laser.channel_count,
            "channel_count",
        )?;
        if channel_count == 0 || channel_count % 2 != 0 {
            return Err(LidarError::malformed(
                layout.laser_line,
                "channel_count",
                format!("expected analog/photon-counting pairs, found {}", channel_count),
            ));
        }
        for idx in layout.first_channel_line..layout.header_line_count(channel_count) {
            lines.push(reader.next_line(idx)?);
        }

        let header = self.parse_header(&lines)?;
        if header.laser_shots < self.config.min_shots || header.laser_shots > self.config.max_shots
        {
            return Err(LidarError::ShotCountOutOfRange {
                shots: header.laser_shots,
                min: self.config.min_shots,
                max: self.config.max_shots,
            });
        }

        let channel_lines = (0..channel_count)
            .map(|ch| self.parse_channel(&lines, layout.first_channel_line + ch))
            .collect::<LidarResult<Vec<_>>>()?;
        self.check_pairs(&channel_lines)?;

        let channels = self.deinterleave(
            reader.remaining(),
            &channel_lines,
            layout.header_line_count(channel_count),
        )?;
        Ok(RawFrame::new(header, channels))
    }

    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> LidarResult<RawFrame> {
        let bytes = fs::read(path.as_ref())?;
        self.decode(&bytes)
    }

    /// Decodes every file, separating quarantine candidates from broken records.
    pub fn triage(&self, paths: &[PathBuf]) -> TriageReport {
        let mut report = TriageReport::default();
        for path in paths {
            match self.decode_file(path) {
                Ok(frame) => report.accepted.push((path.clone(), frame)),
                Err(err) if err.is_quarantine() => {
                    self.logger
                        .warn(&format!("quarantine {}: {}", path.display(), err));
                    report.quarantined.push((path.clone(), err));
                }
                Err(err) => {
                    self.logger
                        .warn(&format!("rejected {}: {}", path.display(), err));
                    report.rejected.push((path.clone(), err));
                }
            }
        }
        self.logger.record(&format!(
            "triage accepted {} quarantined {} rejected {}",
            report.accepted.len(),
            report.quarantined.len(),
            report.rejected.len()
        ));
        report
    }

    fn parse_header(&self, lines: &[String]) -> LidarResult<FrameHeader> {
        let layout = &self.config.layout;
        let loc = layout.location_line;
        let fields = &layout.location;

        let file_name = lines.first().map(|l| l.trim().to_string()).unwrap_or_default();
        let site = extract(lines, loc, fields.site, "site")?.to_string();
        let start = self.parse_timestamp(lines, loc, fields.start_date, fields.start_time, "start")?;
        let stop = self.parse_timestamp(lines, loc, fields.stop_date, fields.stop_time, "stop")?;

        Ok(FrameHeader {
            file_name,
            site,
            latitude: parse_field(lines, loc, fields.latitude, "latitude")?,
            longitude: parse_field(lines, loc, fields.longitude, "longitude")?,
            station_altitude: parse_field(lines, loc, fields.altitude, "altitude")?,
            start,
            stop,
            laser_frequency: parse_field(
                lines,
                layout.laser_line,
                layout.laser.frequency,
                "laser_frequency",
            )?,
            laser_shots: parse_field(lines, layout.laser_line, layout.laser.shots, "laser_shots")?,
        })
    }

    fn parse_timestamp(
        &self,
        lines: &[String],
        line: usize,
        date: FieldSpan,
        time: FieldSpan,
        name: &str,
    ) -> LidarResult<NaiveDateTime> {
        let layout = &self.config.layout;
        let date_text = extract(lines, line, date, name)?;
        let time_text = extract(lines, line, time, name)?;
        let date = NaiveDate::parse_from_str(date_text, &layout.date_format).map_err(|err| {
            LidarError::malformed(line, name, format!("date {:?}: {}", date_text, err))
        })?;
        let time = NaiveTime::parse_from_str(time_text, &layout.time_format).map_err(|err| {
            LidarError::malformed(line, name, format!("time {:?}: {}", time_text, err))
        })?;
        Ok(NaiveDateTime::new(date, time))
    }

    fn parse_channel(&self, lines: &[String], line: usize) -> LidarResult<ChannelLine> {
        let fields = &self.config.layout.channel;
        let mode = match extract(lines, line, fields.mode, "mode")? {
            "0" => DetectionMode::Analog,
            "1" => DetectionMode::PhotonCounting,
            other => {
                return Err(LidarError::malformed(
                    line,
                    "mode",
                    format!("unknown detection mode flag {:?}", other),
                ))
            }
        };
        let shots: u32 = parse_field(lines, line, fields.shots, "shots")?;
        if shots == 0 {
            return Err(LidarError::malformed(line, "shots", "channel declares zero shots"));
        }
        let bins: usize = parse_field(lines, line, fields.bins, "bins")?;
        if bins == 0 {
            return Err(LidarError::malformed(line, "bins", "channel declares zero bins"));
        }
        Ok(ChannelLine {
            wavelength: parse_field(lines, line, fields.wavelength, "wavelength")?,
            mode,
            bins,
            vertical_resolution: parse_field(lines, line, fields.bin_width, "bin_width")?,
            adc_bits: parse_field(lines, line, fields.adc_bits, "adc_bits")?,
            shots,
            input_range: parse_field(lines, line, fields.input_range, "input_range")?,
        })
    }

    fn check_pairs(&self, channels: &[ChannelLine]) -> LidarResult<()> {
        let first_line = self.config.layout.first_channel_line;
        let (bins, vres) = (channels[0].bins, channels[0].vertical_resolution);
        for (idx, channel) in channels.iter().enumerate() {
            let line = first_line + idx;
            if channel.bins != bins {
                return Err(LidarError::malformed(
                    line,
                    "bins",
                    format!("{} bins differs from first channel's {}", channel.bins, bins),
                ));
            }
            if (channel.vertical_resolution - vres).abs() > f64::EPSILON {
                return Err(LidarError::malformed(
                    line,
                    "bin_width",
                    format!(
                        "{} m differs from first channel's {} m",
                        channel.vertical_resolution, vres
                    ),
                ));
            }
            let expected = if idx % 2 == 0 {
                DetectionMode::Analog
            } else {
                DetectionMode::PhotonCounting
            };
            if channel.mode != expected {
                return Err(LidarError::malformed(
                    line,
                    "mode",
                    format!("expected {} channel in pair position", expected.suffix()),
                ));
            }
            if idx % 2 == 1 && channel.wavelength != channels[idx - 1].wavelength {
                return Err(LidarError::malformed(
                    line,
                    "wavelength",
                    format!(
                        "pair mixes {} nm and {} nm",
                        channels[idx - 1].wavelength,
                        channel.wavelength
                    ),
                ));
            }
        }
        Ok(())
    }

    fn deinterleave(
        &self,
        payload: &[u8],
        channels: &[ChannelLine],
        payload_line: usize,
    ) -> LidarResult<Vec<ChannelDescriptor>> {
        let bins = channels[0].bins;
        let pair_words = 2 * bins + self.config.pair_trailer_words;
        let total_words = pair_words * channels.len() / 2;
        if payload.len() < total_words * WORD_BYTES {
            return Err(LidarError::malformed(
                payload_line,
                "payload",
                format!(
                    "expected {} bytes, found {}",
                    total_words * WORD_BYTES,
                    payload.len()
                ),
            ));
        }
        let mut words = vec![0i32; total_words];
        LittleEndian::read_i32_into(&payload[..total_words * WORD_BYTES], &mut words);

        let mut decoded = Vec::with_capacity(channels.len());
        for (pair_idx, pair) in channels.chunks(2).enumerate() {
            let offset = pair_idx * pair_words;
            for (slot, channel) in pair.iter().enumerate() {
                let start = offset + slot * bins;
                let raw = &words[start..start + bins];
                decoded.push(self.scale_channel(channel, raw));
            }
        }
        Ok(decoded)
    }

    fn scale_channel(&self, channel: &ChannelLine, raw: &[i32]) -> ChannelDescriptor {
        let shots = f64::from(channel.shots);
        let (bit_depth, normalization, counts) = match channel.mode {
            DetectionMode::Analog => {
                let full_scale = 2f64.powi(channel.adc_bits as i32);
                let normalization = (channel.input_range * 1e3).trunc();
                let counts = raw
                    .iter()
                    .map(|&value| f64::from(value) / full_scale * (normalization / shots))
                    .collect();
                (channel.adc_bits, normalization, counts)
            }
            DetectionMode::PhotonCounting => {
                let bit_depth = self.config.photon_counting_bit_depth;
                let full_scale = 2f64.powi(bit_depth as i32);
                let normalization = self.config.photon_counting_normalization;
                let counts = raw
                    .iter()
                    .map(|&value| (f64::from(value) / full_scale).round() * (normalization / shots))
                    .collect();
                (bit_depth, normalization, counts)
            }
        };
        ChannelDescriptor {
            label: channel.mode.label(channel.wavelength),
            wavelength: channel.wavelength,
            mode: channel.mode,
            bit_depth,
            normalization,
            bins: channel.bins,
            vertical_resolution: channel.vertical_resolution,
            shots: channel.shots,
            counts,
        }
    }
}

fn extract<'a>(lines: &'a [String], line: usize, span: FieldSpan, name: &str) -> LidarResult<&'a str> {
    let text = lines
        .get(line)
        .ok_or_else(|| LidarError::malformed(line, name, "line missing"))?;
    span.extract(text).map(str::trim).ok_or_else(|| {
        LidarError::malformed(
            line,
            name,
            format!(
                "line has {} characters, field spans {}..{}",
                text.len(),
                span.start,
                span.end
            ),
        )
    })
}

fn parse_field<T: FromStr>(
    lines: &[String],
    line: usize,
    span: FieldSpan,
    name: &str,
) -> LidarResult<T> {
    let text = extract(lines, line, span, name)?;
    text.parse::<T>()
        .map_err(|_| LidarError::malformed(line, name, format!("cannot parse {:?}", text)))
}
