//! Theoretical clear-sky solar irradiance on a horizontal surface.
//!
//! Two published models are provided: Bras (turbidity based) and
//! Ryan-Stolz (transmission coefficient with an altitude-corrected pressure
//! ratio). Both return zero when the sun is below the horizon.

use super::angle::sin_deg;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Solar constant (W/m²)
pub const SOLAR_CONSTANT: f64 = 1_367.0;

/// Day of year of the June solstice, peak of the seasonal factor curve.
pub const JUNE_SOLSTICE_DAY: u32 = 172;

const DAYS_PER_YEAR: f64 = 365.25;

/// Which clear-sky formula to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearSkyModel {
    /// Turbidity-attenuated model (factor is the Linke-style turbidity, 2 clear .. 5 smoggy)
    Bras,
    /// Transmission-coefficient model (factor is the atmospheric transmission, ~0.8)
    #[default]
    RyanStolz,
}

/// Optical air mass for a solar elevation in degrees.
fn air_mass(elevation_deg: f64) -> f64 {
    1.0 / (sin_deg(elevation_deg) + 0.15 * (elevation_deg + 3.885).powf(-1.253))
}

/// Bras clear-sky irradiance (W/m²).
///
/// * `elevation_deg` - solar elevation above the horizon
/// * `distance_au` - earth-sun distance
/// * `turbidity` - atmospheric turbidity factor
pub fn bras(elevation_deg: f64, distance_au: f64, turbidity: f64) -> f64 {
    if !(elevation_deg >= 0.0) {
        return 0.0;
    }
    // Irradiance on a horizontal surface at the top of the atmosphere
    let top = SOLAR_CONSTANT / (distance_au * distance_au) * sin_deg(elevation_deg);
    let m = air_mass(elevation_deg);
    // Molecular scattering coefficient
    let scattering = 0.128 - 0.054 * m.log10();
    top * (-turbidity * scattering * m).exp()
}

/// Ryan-Stolz clear-sky irradiance (W/m²).
///
/// * `transmission` - atmospheric transmission coefficient
/// * `altitude_m` - station altitude above sea level
pub fn ryan_stolz(elevation_deg: f64, distance_au: f64, transmission: f64, altitude_m: f64) -> f64 {
    if !(elevation_deg >= 0.0) {
        return 0.0;
    }
    let pressure_ratio = ((288.0 - 0.0065 * altitude_m) / 288.0).powf(5.256);
    let relative_mass = pressure_ratio * air_mass(elevation_deg);
    let top = SOLAR_CONSTANT * sin_deg(elevation_deg) / (distance_au * distance_au);
    top * transmission.powf(relative_mass)
}

/// Seasonal turbidity/transmission factor for a day of year.
///
/// Cosine interpolation that peaks at `june` on day 172 and bottoms out at
/// `december` half a year later.
pub fn seasonal_factor(day_of_year: u32, june: f64, december: f64) -> f64 {
    let offset = f64::from(day_of_year) - f64::from(JUNE_SOLSTICE_DAY);
    let weight = (1.0 + (2.0 * PI * offset / DAYS_PER_YEAR).cos()) / 2.0;
    december + (june - december) * weight
}

/// Clear-sky irradiance rounded to whole W/m² and clamped at zero.
pub fn estimate(
    elevation_deg: f64,
    distance_au: f64,
    factor: f64,
    altitude_m: f64,
    model: ClearSkyModel,
) -> i32 {
    let irradiance = match model {
        ClearSkyModel::Bras => bras(elevation_deg, distance_au, factor),
        ClearSkyModel::RyanStolz => ryan_stolz(elevation_deg, distance_au, factor, altitude_m),
    };
    if irradiance.is_finite() && irradiance > 0.0 {
        irradiance.round() as i32
    } else {
        0
    }
}

/// Rule for deciding whether a measured irradiance counts as sunshine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunshineCriteria {
    /// Percentage of the clear-sky maximum that must be exceeded
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
    /// Absolute floor below which it is never sunny (W/m²)
    #[serde(default)]
    pub minimum_wm2: f64,
}

fn default_threshold_percent() -> f64 {
    75.0
}

impl Default for SunshineCriteria {
    fn default() -> Self {
        Self {
            threshold_percent: default_threshold_percent(),
            minimum_wm2: 0.0,
        }
    }
}

impl SunshineCriteria {
    pub fn is_sunny(&self, measured_wm2: f64, clear_sky_wm2: i32) -> bool {
        clear_sky_wm2 > 0
            && measured_wm2.is_finite()
            && measured_wm2 >= self.minimum_wm2
            && measured_wm2 > f64::from(clear_sky_wm2) * self.threshold_percent / 100.0
    }
}
