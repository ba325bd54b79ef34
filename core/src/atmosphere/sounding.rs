use crate::atmosphere::rayleigh::RayleighScattering;
use crate::atmosphere::AtmosphereProfile;
use crate::math::grid::interpolate;
use crate::prelude::{LidarError, LidarResult};
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const COLUMN_WIDTH: usize = 7;
const NAMES_ROW: usize = 2;
const FIRST_DATA_ROW: usize = 6;
const CELSIUS_OFFSET: f64 = 273.15;

/// Radiosonde levels ordered by increasing height (m ASL, hPa, K).
#[derive(Debug, Clone)]
pub struct SoundingTable {
    pub height: Vec<f64>,
    pub pressure: Vec<f64>,
    pub temperature: Vec<f64>,
}

/// Launch time of the sounding used for a measurement starting at `start`.
pub fn launch_for(start: NaiveDateTime) -> NaiveDateTime {
    let date = start.date();
    match start.hour() {
        0..=8 => date.and_time(NaiveTime::MIN),
        9..=20 => date.and_time(NaiveTime::MIN) + Duration::hours(12),
        _ => date.and_time(NaiveTime::MIN) + Duration::days(1),
    }
}

pub fn sounding_path(dir: &Path, station: &str, start: NaiveDateTime) -> PathBuf {
    let launch = launch_for(start);
    dir.join(station).join(format!(
        "{}_{}_{:02}Z.csv",
        station,
        launch.format("%Y_%m_%d"),
        launch.hour()
    ))
}

pub fn read_sounding(path: &Path) -> LidarResult<SoundingTable> {
    let text = fs::read_to_string(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => LidarError::MissingSounding {
            path: path.to_path_buf(),
        },
        _ => LidarError::Io(err),
    })?;
    parse_sounding(&text).map_err(|err| match err {
        LidarError::InvalidInput(reason) => {
            LidarError::InvalidInput(format!("{}: {}", path.display(), reason))
        }
        other => other,
    })
}

fn cell(line: &str, column: usize) -> Option<&str> {
    let start = column * COLUMN_WIDTH;
    let end = (start + COLUMN_WIDTH).min(line.len());
    line.get(start..end).map(str::trim).filter(|value| !value.is_empty())
}

pub fn parse_sounding(text: &str) -> LidarResult<SoundingTable> {
    let lines: Vec<&str> = text.lines().collect();
    let names = lines
        .get(NAMES_ROW)
        .ok_or_else(|| LidarError::InvalidInput("sounding has no column names".into()))?;
    let columns: Vec<&str> = (0..names.len().div_ceil(COLUMN_WIDTH))
        .map(|column| cell(names, column).unwrap_or(""))
        .collect();
    let find = |name: &str| {
        columns
            .iter()
            .position(|column| *column == name)
            .ok_or_else(|| LidarError::InvalidInput(format!("sounding lacks column {}", name)))
    };
    let (pres, hght, temp) = (find("PRES")?, find("HGHT")?, find("TEMP")?);

    let mut table = SoundingTable {
        height: Vec::new(),
        pressure: Vec::new(),
        temperature: Vec::new(),
    };
    for line in lines.iter().skip(FIRST_DATA_ROW) {
        let parsed = (cell(line, pres), cell(line, hght), cell(line, temp));
        let (Some(p), Some(h), Some(t)) = parsed else {
            continue;
        };
        let (Ok(p), Ok(h), Ok(t)) = (p.parse::<f64>(), h.parse::<f64>(), t.parse::<f64>()) else {
            continue;
        };
        if table.height.last().is_some_and(|&last| h <= last) {
            continue;
        }
        table.height.push(h);
        table.pressure.push(p);
        table.temperature.push(t + CELSIUS_OFFSET);
    }
    if table.height.len() < 2 {
        return Err(LidarError::InvalidInput(format!(
            "sounding has {} usable levels",
            table.height.len()
        )));
    }
    Ok(table)
}

impl SoundingTable {
    /// Temperature and pressure interpolated linearly onto `altitudes_asl`.
    pub fn atmosphere(&self, altitudes_asl: &[f64]) -> LidarResult<AtmosphereProfile> {
        Ok(AtmosphereProfile {
            altitudes: altitudes_asl.to_vec(),
            temperature: interpolate(&self.height, &self.temperature, altitudes_asl)?,
            pressure: interpolate(&self.height, &self.pressure, altitudes_asl)?,
        })
    }

    /// Extinction and backscatter evaluated at the sounding levels, then
    /// interpolated onto `altitudes_asl` in log space.
    pub fn coefficients(
        &self,
        scattering: &RayleighScattering,
        altitudes_asl: &[f64],
    ) -> LidarResult<(Vec<f64>, Vec<f64>)> {
        let (log_alpha, log_beta): (Vec<f64>, Vec<f64>) = self
            .temperature
            .iter()
            .zip(&self.pressure)
            .map(|(&t, &p)| {
                let (alpha, beta) = scattering.coefficients(t, p);
                (alpha.ln(), beta.ln())
            })
            .unzip();
        let alpha = interpolate(&self.height, &log_alpha, altitudes_asl)?;
        let beta = interpolate(&self.height, &log_beta, altitudes_asl)?;
        Ok((
            alpha.into_iter().map(f64::exp).collect(),
            beta.into_iter().map(f64::exp).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
83779 SBMT Marte Civ Observations at 00Z 17 Jun 2021
-----------------------------------------------------------------------------
   PRES   HGHT   TEMP   DWPT   RELH   MIXR   DRCT   SKNT   THTA   THTE   THTV
    hPa     m      C      C      %    g/kg    deg   knot     K      K      K
-----------------------------------------------------------------------------

  925.0    722   18.4   12.4     68   9.77    330      4  297.6  325.8  299.3
  920.0    770
  850.0   1479   15.2    3.2     44   5.68    320     12  301.4  318.6  302.4
  700.0   3113    6.0   -9.0     33   2.71    300     25  308.9  317.6  309.4
  500.0   5790  -10.1  -31.1     16   0.44    280     33  320.2  321.9  320.3
";

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, day)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap()
    }

    #[test]
    fn launch_bucketing_by_hour() {
        assert_eq!(launch_for(at(16, 3)), at(16, 0) - Duration::minutes(30));
        assert_eq!(launch_for(at(16, 9)).hour(), 12);
        assert_eq!(launch_for(at(16, 20)).hour(), 12);
        assert_eq!(launch_for(at(16, 21)), at(17, 0) - Duration::minutes(30));
    }

    #[test]
    fn path_follows_station_and_launch() {
        let path = sounding_path(Path::new("soundings"), "83779_SBMT", at(16, 22));
        assert_eq!(
            path,
            Path::new("soundings/83779_SBMT/83779_SBMT_2021_06_17_00Z.csv")
        );
        let path = sounding_path(Path::new("soundings"), "83779_SBMT", at(16, 14));
        assert!(path.ends_with("83779_SBMT_2021_06_16_12Z.csv"));
    }

    #[test]
    fn parses_fixed_width_columns_and_drops_incomplete_rows() {
        let table = parse_sounding(SAMPLE).unwrap();
        assert_eq!(table.height, vec![722.0, 1479.0, 3113.0, 5790.0]);
        assert_eq!(table.pressure[1], 850.0);
        assert!((table.temperature[3] - 263.05).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_reported_explicitly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        match read_sounding(&path).unwrap_err() {
            LidarError::MissingSounding { path: reported } => assert_eq!(reported, path),
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn log_interpolation_stays_between_levels() {
        let table = parse_sounding(SAMPLE).unwrap();
        let scattering = RayleighScattering::new(532.0);
        let (alpha, beta) = table.coefficients(&scattering, &[1000.0, 2000.0]).unwrap();
        let (low, _) = scattering.coefficients(table.temperature[0], table.pressure[0]);
        let (high, _) = scattering.coefficients(table.temperature[1], table.pressure[1]);
        assert!(alpha[0] < low && alpha[0] > high);
        assert!(beta[1] < beta[0]);

        let atmosphere = table.atmosphere(&[1479.0]).unwrap();
        assert_eq!(atmosphere.pressure[0], 850.0);
    }
}
