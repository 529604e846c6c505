//! Solar ephemeris: sun elevation, azimuth and earth-sun distance.
//!
//! Position follows the NOAA solar calculator pipeline (Julian century,
//! geometric mean longitude/anomaly, equation of centre, apparent longitude,
//! corrected obliquity, declination, equation of time, hour angle, zenith,
//! refraction). Distance solves Kepler's equation against the 1990.0 orbital
//! elements of the sun.

use super::angle::{
    acos_deg, asin_deg, cos_deg, deg_to_rad, normalize_degrees, polynomial, rad_to_deg, sin_deg, tan_deg,
};
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tracing::warn;

/// Julian day of the Unix epoch
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Julian day of J2000.0
const J2000_JD: f64 = 2_451_545.0;

/// Julian day of epoch 1990 January 0.0
const EPOCH_1990_JD: f64 = 2_447_891.5;

/// Sun's mean ecliptic longitude at epoch 1990.0 (degrees)
const SUN_MEAN_LONGITUDE_1990: f64 = 279.403_303;

/// Sun's ecliptic longitude at perigee at epoch 1990.0 (degrees)
const SUN_PERIGEE_LONGITUDE_1990: f64 = 282.768_422;

/// Eccentricity of the sun-earth orbit at epoch 1990.0
const ORBIT_ECCENTRICITY_1990: f64 = 0.016_713;

const TROPICAL_YEAR_DAYS: f64 = 365.242_191;

/// Default convergence tolerance for the eccentric anomaly (radians).
pub const DEFAULT_KEPLER_TOLERANCE: f64 = 1e-7;

/// Iteration cap for the eccentric anomaly solver.
pub const MAX_KEPLER_ITERATIONS: u32 = 30;

/// Sun position for one instant and location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolarPosition {
    /// Refraction-corrected elevation above the horizon (degrees)
    pub elevation_deg: f64,
    /// Azimuth clockwise from north (degrees, [0, 360))
    pub azimuth_deg: f64,
    /// Earth-sun distance (astronomical units)
    pub earth_sun_distance_au: f64,
}

/// Outcome of [`solve_kepler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeplerSolution {
    /// Eccentric anomaly (radians); the last approximation if not converged
    pub eccentric_anomaly: f64,
    pub iterations: u32,
    pub converged: bool,
}

/// Converts a UTC timestamp to a Julian day number.
pub fn julian_day(timestamp: DateTime<Utc>) -> f64 {
    let seconds = timestamp.timestamp() as f64 + f64::from(timestamp.timestamp_subsec_nanos()) * 1e-9;
    seconds / 86_400.0 + UNIX_EPOCH_JD
}

/// Computes sun elevation, azimuth and earth-sun distance.
///
/// Pure function of its inputs; safe to call from any thread.
pub fn compute(timestamp: DateTime<Utc>, latitude_deg: f64, longitude_deg: f64) -> SolarPosition {
    let jd = julian_day(timestamp);
    let jc = (jd - J2000_JD) / 36_525.0;

    // Sun coordinates
    let mean_longitude = normalize_degrees(280.466_46 + jc * (36_000.769_83 + jc * 0.000_303_2));
    let mean_anomaly = 357.529_11 + jc * (35_999.050_29 - 0.000_153_7 * jc);
    let eccentricity = 0.016_708_634 - jc * (0.000_042_037 + 0.000_000_126_7 * jc);

    let equation_of_centre = sin_deg(mean_anomaly) * (1.914_602 - jc * (0.004_817 + 0.000_014 * jc))
        + sin_deg(2.0 * mean_anomaly) * (0.019_993 - 0.000_101 * jc)
        + sin_deg(3.0 * mean_anomaly) * 0.000_289;

    let true_longitude = mean_longitude + equation_of_centre;
    let omega = 125.04 - 1_934.136 * jc;
    let apparent_longitude = true_longitude - 0.005_69 - 0.004_78 * sin_deg(omega);

    let mean_obliquity =
        23.0 + (26.0 + (21.448 - jc * (46.815 + jc * (0.000_59 - jc * 0.001_813))) / 60.0) / 60.0;
    let obliquity = mean_obliquity + 0.002_56 * cos_deg(omega);

    let declination = asin_deg(sin_deg(obliquity) * sin_deg(apparent_longitude));

    // Equation of time (minutes)
    let y = tan_deg(obliquity / 2.0).powi(2);
    let l0 = deg_to_rad(mean_longitude);
    let m = deg_to_rad(mean_anomaly);
    let equation_of_time = 4.0
        * rad_to_deg(
            y * (2.0 * l0).sin() - 2.0 * eccentricity * m.sin()
                + 4.0 * eccentricity * y * m.sin() * (2.0 * l0).cos()
                - 0.5 * y * y * (4.0 * l0).sin()
                - 1.25 * eccentricity * eccentricity * (2.0 * m).sin(),
        );

    // Hour angle from true solar time, UTC so no zone offset
    let minutes_of_day = f64::from(timestamp.hour()) * 60.0
        + f64::from(timestamp.minute())
        + f64::from(timestamp.second()) / 60.0
        + f64::from(timestamp.nanosecond() % 1_000_000_000) / 60e9;
    let true_solar_time = (minutes_of_day + equation_of_time + 4.0 * longitude_deg).rem_euclid(1_440.0);
    let hour_angle = true_solar_time / 4.0 - 180.0;

    let zenith = acos_deg(
        sin_deg(latitude_deg) * sin_deg(declination)
            + cos_deg(latitude_deg) * cos_deg(declination) * cos_deg(hour_angle),
    );
    let elevation = 90.0 - zenith;

    SolarPosition {
        elevation_deg: elevation + atmospheric_refraction(elevation),
        azimuth_deg: azimuth(latitude_deg, declination, zenith, hour_angle),
        earth_sun_distance_au: earth_sun_distance(timestamp),
    }
}

/// Approximate atmospheric refraction (degrees) for a geometric elevation.
pub fn atmospheric_refraction(elevation_deg: f64) -> f64 {
    let arc_seconds = if elevation_deg > 85.0 {
        0.0
    } else if elevation_deg > 5.0 {
        let te = tan_deg(elevation_deg);
        58.1 / te - 0.07 / te.powi(3) + 0.000_086 / te.powi(5)
    } else if elevation_deg > -0.575 {
        polynomial(&[1_735.0, -518.2, 103.4, -12.79, 0.711], elevation_deg)
    } else {
        -20.772 / tan_deg(elevation_deg)
    };
    arc_seconds / 3_600.0
}

fn azimuth(latitude_deg: f64, declination_deg: f64, zenith_deg: f64, hour_angle_deg: f64) -> f64 {
    let denominator = cos_deg(latitude_deg) * sin_deg(zenith_deg);
    // Sun at the zenith or observer at a pole: azimuth is undefined
    let cos_azimuth = if denominator.abs() < 1e-12 {
        1.0
    } else {
        (sin_deg(latitude_deg) * cos_deg(zenith_deg) - sin_deg(declination_deg)) / denominator
    };
    if hour_angle_deg > 0.0 {
        normalize_degrees(acos_deg(cos_azimuth) + 180.0)
    } else {
        normalize_degrees(540.0 - acos_deg(cos_azimuth))
    }
}

/// Earth-sun distance in AU using the default tolerance.
pub fn earth_sun_distance(timestamp: DateTime<Utc>) -> f64 {
    earth_sun_distance_with_tolerance(timestamp, DEFAULT_KEPLER_TOLERANCE)
}

/// Earth-sun distance in AU, solving Kepler's equation to `tolerance` radians.
pub fn earth_sun_distance_with_tolerance(timestamp: DateTime<Utc>, tolerance: f64) -> f64 {
    let days = julian_day(timestamp) - EPOCH_1990_JD;
    let mean_longitude = normalize_degrees(360.0 / TROPICAL_YEAR_DAYS * days);
    let mean_anomaly = deg_to_rad(normalize_degrees(
        mean_longitude + SUN_MEAN_LONGITUDE_1990 - SUN_PERIGEE_LONGITUDE_1990,
    ));

    let e = ORBIT_ECCENTRICITY_1990;
    let solution = solve_kepler(mean_anomaly, e, tolerance, MAX_KEPLER_ITERATIONS);

    let tan_half_true = ((1.0 + e) / (1.0 - e)).sqrt() * (solution.eccentric_anomaly / 2.0).tan();
    let true_anomaly = 2.0 * tan_half_true.atan();
    (1.0 - e * e) / (1.0 + e * true_anomaly.cos())
}

/// Solves `E - e·sin(E) = M` for the eccentric anomaly by Newton iteration.
///
/// Stops after `max_iterations` steps; a non-converged result logs a
/// warning and returns the last approximation.
pub fn solve_kepler(
    mean_anomaly: f64,
    eccentricity: f64,
    tolerance: f64,
    max_iterations: u32,
) -> KeplerSolution {
    let mut estimate = mean_anomaly;
    let mut iterations = 0;

    loop {
        let residual = estimate - eccentricity * estimate.sin() - mean_anomaly;
        if residual.abs() <= tolerance {
            return KeplerSolution {
                eccentric_anomaly: estimate,
                iterations,
                converged: true,
            };
        }
        if iterations >= max_iterations {
            break;
        }
        estimate -= residual / (1.0 - eccentricity * estimate.cos());
        iterations += 1;
    }

    warn!(
        "Eccentric anomaly did not converge after {} iterations (M={}, e={}, tol={}); using last approximation {}",
        iterations, mean_anomaly, eccentricity, tolerance, estimate
    );
    KeplerSolution {
        eccentric_anomaly: estimate,
        iterations,
        converged: false,
    }
}
