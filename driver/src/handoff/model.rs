use chrono::NaiveDateTime;
use lidarcore::atmosphere::MolecularProfile;
use lidarcore::retrieval::AerosolProfile;
use serde::{Deserialize, Serialize};

/// Finished arrays for one session and wavelength, as the plotting side reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotPayload {
    pub session: String,
    pub station: String,
    pub station_altitude: f64,
    pub start: NaiveDateTime,
    pub stop: NaiveDateTime,
    pub profile: PlotProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlotProfile {
    Molecular(MolecularProfile),
    Aerosol(AerosolProfile),
}

impl PlotProfile {
    pub fn wavelength(&self) -> u32 {
        match self {
            Self::Molecular(profile) => profile.wavelength,
            Self::Aerosol(profile) => profile.wavelength,
        }
    }

    /// Method part of the hand-off file name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Molecular(_) => "molecular",
            Self::Aerosol(profile) => profile.method.as_str(),
        }
    }
}
