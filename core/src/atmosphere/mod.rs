pub mod molecular;
pub mod rayleigh;
pub mod sounding;
pub mod standard;

use serde::{Deserialize, Serialize};

pub use molecular::{MolecularModel, MolecularProfile};
pub use rayleigh::RayleighScattering;
pub use sounding::{launch_for, read_sounding, sounding_path, SoundingTable};
pub use standard::StandardAtmosphere;

/// Temperature (K) and pressure (hPa) on an altitude grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtmosphereProfile {
    pub altitudes: Vec<f64>,
    pub temperature: Vec<f64>,
    pub pressure: Vec<f64>,
}
