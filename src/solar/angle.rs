//! Degree-based trigonometry and angle normalisation.
//!
//! The ephemeris formulas are published in degrees, so every helper here
//! takes or returns degrees and hides the radian conversion.

#![allow(clippy::many_single_char_names)]

/// Converts degrees to radians.
#[inline]
pub fn deg_to_rad(degrees: f64) -> f64 {
    degrees.to_radians()
}

/// Converts radians to degrees.
#[inline]
pub fn rad_to_deg(radians: f64) -> f64 {
    radians.to_degrees()
}

#[inline]
pub fn sin_deg(degrees: f64) -> f64 {
    deg_to_rad(degrees).sin()
}

#[inline]
pub fn cos_deg(degrees: f64) -> f64 {
    deg_to_rad(degrees).cos()
}

#[inline]
pub fn tan_deg(degrees: f64) -> f64 {
    deg_to_rad(degrees).tan()
}

/// Inverse sine returning degrees. The argument is clamped to [-1, 1] so
/// rounding noise at the poles cannot produce NaN.
#[inline]
pub fn asin_deg(x: f64) -> f64 {
    rad_to_deg(x.clamp(-1.0, 1.0).asin())
}

/// Inverse cosine returning degrees, clamped like [`asin_deg`].
#[inline]
pub fn acos_deg(x: f64) -> f64 {
    rad_to_deg(x.clamp(-1.0, 1.0).acos())
}

#[inline]
pub fn atan2_deg(y: f64, x: f64) -> f64 {
    rad_to_deg(y.atan2(x))
}

/// Normalizes an angle in degrees to the range [0, 360).
pub fn normalize_degrees(degrees: f64) -> f64 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Normalizes an angle in degrees to the range (-180, 180].
pub fn normalize_signed_degrees(degrees: f64) -> f64 {
    let normalized = normalize_degrees(degrees);
    if normalized > 180.0 {
        normalized - 360.0
    } else {
        normalized
    }
}

/// Evaluates `c[0] + c[1]x + c[2]x² + ...` using Horner's method.
pub fn polynomial(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}
