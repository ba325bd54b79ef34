pub mod kfs;
pub mod raman;

use serde::{Deserialize, Serialize};

pub use kfs::{KfsInversion, KfsReference};
pub use raman::RamanRetrieval;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InversionMethod {
    Kfs,
    Raman,
}

impl InversionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kfs => "kfs",
            Self::Raman => "raman",
        }
    }
}

/// Final aerosol optical profile on the lidar grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AerosolProfile {
    pub method: InversionMethod,
    pub wavelength: u32,
    pub altitudes: Vec<f64>,
    /// Not retrieved by the Raman method.
    pub backscatter: Option<Vec<f64>>,
    pub extinction: Vec<f64>,
    /// Assumed for KFS; derived methods leave it unset.
    pub lidar_ratio: Option<f64>,
    /// Reference window as bin indices `[start, end)`.
    pub reference_bins: Option<(usize, usize)>,
}
