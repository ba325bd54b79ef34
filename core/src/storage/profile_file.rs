use crate::instrument::frame::{FrameHeader, RawFrame};
use crate::prelude::{LidarError, LidarResult};
use crate::processing::correction::{CorrectedFrame, CorrectedProfile};
use crate::processing::session::DarkCurrentMean;
use chrono::NaiveDateTime;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const TIME_FORMAT: &str = "%d/%m/%Y-%H:%M:%S";
const HEADER_KEYS: [&str; 10] = [
    "station",
    "altitude",
    "lat",
    "long",
    "starttime",
    "stoptime",
    "bins",
    "vert_res",
    "shotnumber",
    "laser_freq",
];

/// The ten `key value` lines preceding every level-file table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileHeader {
    pub station: String,
    pub altitude: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub start: NaiveDateTime,
    pub stop: NaiveDateTime,
    pub bins: usize,
    pub vertical_resolution: f64,
    pub shots: u32,
    pub laser_frequency: u32,
}

impl ProfileHeader {
    pub fn from_frame(header: &FrameHeader, bins: usize, vertical_resolution: f64, shots: u32) -> Self {
        Self {
            station: header.site.clone(),
            altitude: header.station_altitude,
            latitude: header.latitude,
            longitude: header.longitude,
            start: header.start,
            stop: header.stop,
            bins,
            vertical_resolution,
            shots,
            laser_frequency: header.laser_frequency,
        }
    }

    fn lines(&self) -> [String; 10] {
        let values = [
            self.station.clone(),
            self.altitude.to_string(),
            self.latitude.to_string(),
            self.longitude.to_string(),
            self.start.format(TIME_FORMAT).to_string(),
            self.stop.format(TIME_FORMAT).to_string(),
            self.bins.to_string(),
            self.vertical_resolution.to_string(),
            self.shots.to_string(),
            self.laser_frequency.to_string(),
        ];
        let mut lines: [String; 10] = Default::default();
        for (line, (key, value)) in lines.iter_mut().zip(HEADER_KEYS.iter().zip(values)) {
            *line = format!("{} {}", key, value);
        }
        lines
    }

    fn parse(lines: &[String]) -> LidarResult<Self> {
        let mut values = Vec::with_capacity(HEADER_KEYS.len());
        for (idx, key) in HEADER_KEYS.iter().enumerate() {
            let line = lines
                .get(idx)
                .ok_or_else(|| LidarError::malformed(idx, key, "file ends inside the header"))?;
            let value = line
                .strip_prefix(key)
                .and_then(|rest| rest.strip_prefix(' '))
                .ok_or_else(|| LidarError::malformed(idx, key, format!("expected `{} <value>`", key)))?;
            values.push(value.trim().to_string());
        }
        let number = |idx: usize| -> LidarResult<f64> {
            values[idx]
                .parse()
                .map_err(|_| LidarError::malformed(idx, HEADER_KEYS[idx], format!("not a number: {:?}", values[idx])))
        };
        let time = |idx: usize| -> LidarResult<NaiveDateTime> {
            NaiveDateTime::parse_from_str(&values[idx], TIME_FORMAT)
                .map_err(|err| LidarError::malformed(idx, HEADER_KEYS[idx], err.to_string()))
        };
        Ok(Self {
            station: values[0].clone(),
            altitude: number(1)?,
            latitude: number(2)?,
            longitude: number(3)?,
            start: time(4)?,
            stop: time(5)?,
            bins: parse_count(&values, 6)?,
            vertical_resolution: number(7)?,
            shots: parse_count(&values, 8)?,
            laser_frequency: parse_count(&values, 9)?,
        })
    }
}

/// Unsigned header count; values that overflow `T` are malformed, not truncated.
fn parse_count<T: FromStr>(values: &[String], idx: usize) -> LidarResult<T> {
    values[idx]
        .parse()
        .map_err(|_| LidarError::malformed(idx, HEADER_KEYS[idx], format!("not a count: {:?}", values[idx])))
}

/// Header plus one column per channel label.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    pub header: ProfileHeader,
    pub labels: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl ProfileTable {
    /// Level 0: decoded counts, no corrections.
    pub fn raw(frame: &RawFrame) -> Self {
        Self {
            header: ProfileHeader::from_frame(
                frame.header(),
                frame.bins(),
                frame.vertical_resolution(),
                frame.declared_shots(),
            ),
            labels: frame.labels(),
            columns: frame.channels().iter().map(|c| c.counts.clone()).collect(),
        }
    }

    /// Level 1 preprocessed signal.
    pub fn corrected(frame: &CorrectedFrame) -> Self {
        Self::from_corrected(frame, |p| p.samples.clone())
    }

    /// Level 1 range-corrected signal.
    pub fn range_corrected(frame: &CorrectedFrame) -> Self {
        Self::from_corrected(frame, |p| p.range_corrected.clone())
    }

    /// Session mean dark current, stamped with the header of the session's first frame.
    pub fn dark_current(dark: &DarkCurrentMean, template: &RawFrame) -> Self {
        let columns: Vec<Vec<f64>> = (0..dark.channel_count())
            .filter_map(|idx| dark.channel(idx).map(<[f64]>::to_vec))
            .collect();
        Self {
            header: ProfileHeader::from_frame(
                template.header(),
                template.bins(),
                template.vertical_resolution(),
                template.declared_shots(),
            ),
            labels: dark.labels().to_vec(),
            columns,
        }
    }

    fn from_corrected(
        frame: &CorrectedFrame,
        select: impl Fn(&CorrectedProfile) -> Vec<f64>,
    ) -> Self {
        Self {
            header: ProfileHeader::from_frame(
                &frame.header,
                frame.bins(),
                frame.vertical_resolution,
                frame.shots,
            ),
            labels: frame.labels(),
            columns: frame.profiles.iter().map(select).collect(),
        }
    }

    pub fn column(&self, label: &str) -> Option<&[f64]> {
        self.labels
            .iter()
            .position(|l| l == label)
            .and_then(|idx| self.columns.get(idx))
            .map(Vec::as_slice)
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }
}

pub fn write_profile_file(path: &Path, table: &ProfileTable) -> LidarResult<()> {
    if table.labels.len() != table.columns.len() {
        return Err(LidarError::mismatch(
            format!("columns of {}", path.display()),
            table.labels.len(),
            table.columns.len(),
        ));
    }
    let rows = table.rows();
    if let Some(bad) = table.columns.iter().position(|c| c.len() != rows) {
        return Err(LidarError::mismatch(
            format!("column {} of {}", table.labels[bad], path.display()),
            rows,
            table.columns[bad].len(),
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(File::create(path)?);
    for line in table.header.lines() {
        writeln!(out, "{}", line)?;
    }
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&table.labels)?;
    for row in 0..rows {
        writer.write_record(table.columns.iter().map(|c| format!("{:.4}", c[row])))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_profile_file(path: &Path) -> LidarResult<ProfileTable> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::with_capacity(HEADER_KEYS.len());
    for _ in 0..HEADER_KEYS.len() {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }
    let header = ProfileHeader::parse(&lines)?;

    let mut body = String::new();
    reader.read_to_string(&mut body)?;
    let mut table = csv::Reader::from_reader(body.as_bytes());
    let labels: Vec<String> = table.headers()?.iter().map(str::to_string).collect();
    let mut columns = vec![Vec::new(); labels.len()];
    for (row, record) in table.records().enumerate() {
        let record = record?;
        for (column, field) in columns.iter_mut().zip(record.iter()) {
            let value = field.trim().parse().map_err(|_| {
                LidarError::InvalidInput(format!(
                    "{} row {}: {:?} is not a number",
                    path.display(),
                    row,
                    field
                ))
            })?;
            column.push(value);
        }
    }
    Ok(ProfileTable {
        header,
        labels,
        columns,
    })
}

/// Output tree of one session: `level0/`, `level1/corrected/`, `level1/rcs/` and
/// the mean dark-current file.
#[derive(Debug, Clone)]
pub struct LevelFiles {
    root: PathBuf,
}

impl LevelFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write_raw(&self, frame: &RawFrame) -> LidarResult<PathBuf> {
        let path = self
            .root
            .join("level0")
            .join(format!("{}_raw.csv", stem(&frame.header().file_name)));
        write_profile_file(&path, &ProfileTable::raw(frame))?;
        Ok(path)
    }

    /// Writes the preprocessed and range-corrected files of one frame.
    pub fn write_corrected(&self, frame: &CorrectedFrame) -> LidarResult<(PathBuf, PathBuf)> {
        let name = stem(&frame.header.file_name);
        let corrected = self
            .root
            .join("level1")
            .join("corrected")
            .join(format!("{}_corrected.csv", name));
        let rcs = self
            .root
            .join("level1")
            .join("rcs")
            .join(format!("{}_rcs.csv", name));
        write_profile_file(&corrected, &ProfileTable::corrected(frame))?;
        write_profile_file(&rcs, &ProfileTable::range_corrected(frame))?;
        Ok((corrected, rcs))
    }

    pub fn write_dark_current(&self, dark: &DarkCurrentMean, template: &RawFrame) -> LidarResult<PathBuf> {
        let path = self.root.join("dark_current_mean.csv");
        write_profile_file(&path, &ProfileTable::dark_current(dark, template))?;
        Ok(path)
    }
}

/// Record names carry a dotted sequence number; keep it, drop path separators.
fn stem(file_name: &str) -> String {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .replace('.', "_")
}
