//! US-1976 standard atmosphere below 86 km.

use crate::atmosphere::AtmosphereProfile;

const EARTH_RADIUS_M: f64 = 6_356_766.0;
/// `g0 * M / R` in K/m.
const HYDROSTATIC: f64 = 0.034_163;
const LAYER_BASES_M: [f64; 8] = [0.0, 11000.0, 20000.0, 32000.0, 47000.0, 51000.0, 71000.0, 84852.0];
const LAPSE_RATES: [f64; 7] = [-6.5e-3, 0.0, 1.0e-3, 2.8e-3, 0.0, -2.8e-3, -2.0e-3];

#[derive(Debug, Clone)]
pub struct StandardAtmosphere {
    /// Temperature (K) and pressure (hPa) at the start of each layer.
    base_temperature: [f64; 7],
    base_pressure: [f64; 7],
}

impl StandardAtmosphere {
    pub fn new(surface_temperature: f64, surface_pressure: f64) -> Self {
        let mut base_temperature = [0.0; 7];
        let mut base_pressure = [0.0; 7];
        base_temperature[0] = surface_temperature;
        base_pressure[0] = surface_pressure;
        for layer in 1..7 {
            let thickness = LAYER_BASES_M[layer] - LAYER_BASES_M[layer - 1];
            let (t, p) = layer_state(
                base_temperature[layer - 1],
                base_pressure[layer - 1],
                LAPSE_RATES[layer - 1],
                thickness,
            );
            base_temperature[layer] = t;
            base_pressure[layer] = p;
        }
        Self {
            base_temperature,
            base_pressure,
        }
    }

    /// Temperature (K) and pressure (hPa) at a geometric altitude above sea level.
    pub fn at(&self, altitude_m: f64) -> (f64, f64) {
        let geopotential = EARTH_RADIUS_M * altitude_m / (EARTH_RADIUS_M + altitude_m);
        let layer = LAYER_BASES_M[1..7]
            .iter()
            .take_while(|&&base| geopotential >= base)
            .count();
        layer_state(
            self.base_temperature[layer],
            self.base_pressure[layer],
            LAPSE_RATES[layer],
            geopotential - LAYER_BASES_M[layer],
        )
    }

    pub fn profile(&self, altitudes_asl: &[f64]) -> AtmosphereProfile {
        let (temperature, pressure) = altitudes_asl.iter().map(|&z| self.at(z)).unzip();
        AtmosphereProfile {
            altitudes: altitudes_asl.to_vec(),
            temperature,
            pressure,
        }
    }
}

impl Default for StandardAtmosphere {
    fn default() -> Self {
        Self::new(288.15, 1013.25)
    }
}

fn layer_state(base_t: f64, base_p: f64, lapse: f64, dh: f64) -> (f64, f64) {
    if lapse == 0.0 {
        (base_t, base_p * (-HYDROSTATIC * dh / base_t).exp())
    } else {
        let t = base_t + lapse * dh;
        (t, base_p * (base_t / t).powf(HYDROSTATIC / lapse))
    }
}
