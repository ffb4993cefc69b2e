//! ISA troposphere model (valid below 11 km).

/// g0 * M / (R * L) for the standard troposphere.
const PRESSURE_EXPONENT: f64 = 5.255_88;

const KELVIN_OFFSET: f64 = 273.15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardAtmosphere {
    /// Pressure at mean sea level in pascal.
    pub pressure_msl_pa: f64,
    /// Temperature at mean sea level in kelvin.
    pub temperature_msl_k: f64,
    /// Temperature lapse rate in K/m.
    pub lapse_rate: f64,
}

impl Default for StandardAtmosphere {
    fn default() -> Self {
        Self {
            pressure_msl_pa: 101_325.0,
            temperature_msl_k: 288.15,
            lapse_rate: 0.0065,
        }
    }
}

impl StandardAtmosphere {
    /// Altitude above mean sea level for a static pressure.
    pub fn pressure_altitude(&self, pressure_pa: f64) -> f64 {
        let ratio = (pressure_pa / self.pressure_msl_pa).max(0.0);
        self.temperature_msl_k / self.lapse_rate * (1.0 - ratio.powf(1.0 / PRESSURE_EXPONENT))
    }

    /// Static pressure at an altitude above mean sea level.
    pub fn pressure_at(&self, altitude_m: f64) -> f64 {
        let t = self.temperature_at(altitude_m);
        self.pressure_msl_pa * (t / self.temperature_msl_k).powf(PRESSURE_EXPONENT)
    }

    /// Air temperature in kelvin at an altitude above mean sea level.
    pub fn temperature_at(&self, altitude_m: f64) -> f64 {
        self.temperature_msl_k - self.lapse_rate * altitude_m
    }

    /// Air temperature in °C at the altitude implied by `pressure_pa`.
    pub fn temperature_celsius_for_pressure(&self, pressure_pa: f64) -> f64 {
        self.temperature_at(self.pressure_altitude(pressure_pa)) - KELVIN_OFFSET
    }
}
