use crate::handoff::model::{PlotPayload, PlotProfile};
use anyhow::Context;
use lidarcore::instrument::FrameHeader;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes finished profiles under `{output}/{session}/profiles/` for the plotting collaborator.
#[derive(Debug, Clone)]
pub struct PlotHandoff {
    root: PathBuf,
}

impl PlotHandoff {
    pub fn new(output_dir: &Path, session: &str) -> Self {
        Self {
            root: output_dir.join(session).join("profiles"),
        }
    }

    pub fn publish(
        &self,
        session: &str,
        header: &FrameHeader,
        profile: PlotProfile,
    ) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let path = self
            .root
            .join(format!("{}_{}.json", profile.wavelength(), profile.method()));
        let payload = PlotPayload {
            session: session.to_string(),
            station: header.site.clone(),
            station_altitude: header.station_altitude,
            start: header.start,
            stop: header.stop,
            profile,
        };
        let body = serde_json::to_vec_pretty(&payload)
            .with_context(|| format!("serializing {}", path.display()))?;
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        log::info!("[{}] hand-off {}", session, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use lidarcore::retrieval::{AerosolProfile, InversionMethod};
    use tempfile::tempdir;

    fn header() -> FrameHeader {
        let start = NaiveDate::from_ymd_opt(2021, 6, 16)
            .unwrap()
            .and_hms_opt(21, 0, 0)
            .unwrap();
        FrameHeader {
            file_name: "RM2161621.000000".into(),
            site: "SaoPaulo".into(),
            latitude: -23.6,
            longitude: -46.7,
            station_altitude: 760.0,
            start,
            stop: start,
            laser_frequency: 10,
            laser_shots: 3000,
        }
    }

    #[test]
    fn aerosol_profile_lands_at_wavelength_method_path() {
        let out = tempdir().unwrap();
        let handoff = PlotHandoff::new(out.path(), "20210616nt");
        let profile = AerosolProfile {
            method: InversionMethod::Raman,
            wavelength: 355,
            altitudes: vec![7.5, 15.0],
            backscatter: None,
            extinction: vec![1e-5, f64::NAN],
            lidar_ratio: None,
            reference_bins: None,
        };
        let path = handoff
            .publish("20210616nt", &header(), PlotProfile::Aerosol(profile))
            .unwrap();
        assert_eq!(
            path,
            out.path().join("20210616nt").join("profiles").join("355_raman.json")
        );

        let payload: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(payload["station"], "SaoPaulo");
        assert_eq!(payload["profile"]["kind"], "aerosol");
        assert_eq!(payload["profile"]["method"], "raman");
        assert_eq!(payload["profile"]["extinction"][0], 1e-5);
        // rejected bins reach the plotting side as null
        assert!(payload["profile"]["extinction"][1].is_null());
        assert!(payload["profile"]["backscatter"].is_null());
    }
}
