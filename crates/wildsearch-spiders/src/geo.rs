//! Geodesic distance on the WGS-84 ellipsoid.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1. / 298.257_223_563;
const MAX_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-12;

/// A (latitude, longitude) pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
}

impl Coords {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl FromStr for Coords {
    type Err = anyhow::Error;

    /// Parses `"lat, lon"`, spaces are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.replace(' ', "");
        let (lat, lon) = cleaned
            .split_once(',')
            .ok_or_else(|| anyhow!("Expected `lat, lon` coordinates, got: {s}"))?;
        let lat: f64 = lat.parse().with_context(|| format!("Invalid latitude in {s}"))?;
        let lon: f64 = lon.parse().with_context(|| format!("Invalid longitude in {s}"))?;
        if !(-90. ..=90.).contains(&lat) || !(-180. ..=180.).contains(&lon) {
            anyhow::bail!("Coordinates out of range: {s}");
        }
        Ok(Self { lat, lon })
    }
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.lat, self.lon)
    }
}

/// Distance in kilometers rounded to 2 decimals.
pub fn distance_km(from: Coords, to: Coords) -> f64 {
    (vincenty_km(from, to) * 100.).round() / 100.
}

/// Vincenty's inverse formula.
///
/// Nearly antipodal points may not converge, the last iterate is used then.
pub fn vincenty_km(from: Coords, to: Coords) -> f64 {
    let a = WGS84_A;
    let f = WGS84_F;
    let b = (1. - f) * a;

    let l = (to.lon - from.lon).to_radians();
    let u1 = ((1. - f) * from.lat.to_radians().tan()).atan();
    let u2 = ((1. - f) * to.lat.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut sin_sigma = 0.;
    let mut cos_sigma = 0.;
    let mut sigma = 0.;
    let mut cos_sq_alpha = 0.;
    let mut cos_2sigma_m = 0.;

    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0. {
            // coincident points
            return 0.;
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1. - sin_alpha.powi(2);
        cos_2sigma_m = if cos_sq_alpha != 0. {
            cos_sigma - 2. * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            // equatorial line
            0.
        };
        let c = f / 16. * cos_sq_alpha * (4. + f * (4. - 3. * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1. - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1. + 2. * cos_2sigma_m.powi(2))));
        if (lambda - previous).abs() < CONVERGENCE {
            break;
        }
    }

    let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
    let big_a = 1. + u_sq / 16384. * (4096. + u_sq * (-768. + u_sq * (320. - 175. * u_sq)));
    let big_b = u_sq / 1024. * (256. + u_sq * (-128. + u_sq * (74. - 47. * u_sq)));
    let delta_sigma = big_b
        * sin_sigma
        * (cos_2sigma_m
            + big_b / 4.
                * (cos_sigma * (-1. + 2. * cos_2sigma_m.powi(2))
                    - big_b / 6.
                        * cos_2sigma_m
                        * (-3. + 4. * sin_sigma.powi(2))
                        * (-3. + 4. * cos_2sigma_m.powi(2))));

    b * big_a * (sigma - delta_sigma) / 1000.
}
