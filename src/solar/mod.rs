//! Solar position and clear-sky irradiance.
//!
//! Everything here is pure and reentrant. [`SolarCalculator`] binds the
//! station location and model options so callers only pass a timestamp.

pub mod angle;
pub mod clear_sky;
pub mod ephemeris;

pub use clear_sky::{ClearSkyModel, SunshineCriteria};
pub use ephemeris::SolarPosition;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Clear-sky model selection and its seasonal factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarOptions {
    #[serde(default)]
    pub model: ClearSkyModel,

    /// Bras turbidity at the June solstice
    #[serde(default = "default_turbidity")]
    pub bras_turbidity_june: f64,

    /// Bras turbidity at the December solstice
    #[serde(default = "default_turbidity")]
    pub bras_turbidity_december: f64,

    /// Ryan-Stolz transmission coefficient at the June solstice
    #[serde(default = "default_transmission")]
    pub transmission_june: f64,

    /// Ryan-Stolz transmission coefficient at the December solstice
    #[serde(default = "default_transmission")]
    pub transmission_december: f64,
}

fn default_turbidity() -> f64 {
    2.0
}

fn default_transmission() -> f64 {
    0.8
}

impl Default for SolarOptions {
    fn default() -> Self {
        Self {
            model: ClearSkyModel::default(),
            bras_turbidity_june: default_turbidity(),
            bras_turbidity_december: default_turbidity(),
            transmission_june: default_transmission(),
            transmission_december: default_transmission(),
        }
    }
}

impl SolarOptions {
    /// Seasonal factor for the selected model on the given day.
    pub fn factor_for(&self, day_of_year: u32) -> f64 {
        match self.model {
            ClearSkyModel::Bras => clear_sky::seasonal_factor(
                day_of_year,
                self.bras_turbidity_june,
                self.bras_turbidity_december,
            ),
            ClearSkyModel::RyanStolz => clear_sky::seasonal_factor(
                day_of_year,
                self.transmission_june,
                self.transmission_december,
            ),
        }
    }
}

/// Result of [`SolarCalculator::solar_max`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolarMaxReading {
    pub timestamp: DateTime<Utc>,
    pub position: SolarPosition,
    pub factor: f64,
    /// Clear-sky irradiance (W/m²), zero at night
    pub irradiance_wm2: i32,
}

/// Station-bound clear-sky calculator.
#[derive(Debug, Clone)]
pub struct SolarCalculator {
    latitude_deg: f64,
    longitude_deg: f64,
    altitude_m: f64,
    options: SolarOptions,
}

impl SolarCalculator {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64, options: SolarOptions) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
            options,
        }
    }

    pub fn options(&self) -> &SolarOptions {
        &self.options
    }

    pub fn position(&self, timestamp: DateTime<Utc>) -> SolarPosition {
        ephemeris::compute(timestamp, self.latitude_deg, self.longitude_deg)
    }

    /// Theoretical maximum irradiance at the station for `timestamp`.
    pub fn solar_max(&self, timestamp: DateTime<Utc>) -> SolarMaxReading {
        let position = self.position(timestamp);
        let factor = self.options.factor_for(timestamp.ordinal());
        let irradiance_wm2 = clear_sky::estimate(
            position.elevation_deg,
            position.earth_sun_distance_au,
            factor,
            self.altitude_m,
            self.options.model,
        );
        SolarMaxReading {
            timestamp,
            position,
            factor,
            irradiance_wm2,
        }
    }
}
