//! Spherical-earth helpers and the geomagnetic model seam.

use crate::types::{Fix, GeomagneticField};

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters (haversine).
pub fn distance_m(from: &Fix, to: &Fix) -> f64 {
    let (lat1, lat2) = (from.latitude.to_radians(), to.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (to.longitude - from.longitude).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing in degrees, clockwise from true north, in `(-180, 180]`.
pub fn bearing_deg(from: &Fix, to: &Fix) -> f64 {
    bearing_between(from.latitude, from.longitude, to.latitude, to.longitude)
}

fn bearing_between(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).to_degrees()
}

/// Source of declination data for a location and time.
///
/// Returning `None` marks the model as failed for that fix.
pub trait GeomagneticModel: Send + Sync {
    fn field_at(
        &self,
        latitude: f64,
        longitude: f64,
        altitude_m: f64,
        time_ms: u64,
    ) -> Option<GeomagneticField>;
}

/// Centred tilted-dipole approximation of the main field.
///
/// Uses the first-degree Gauss coefficients only, so declination errors of a
/// few degrees are expected away from the dipole axis. Secular variation is
/// not modelled; `time_ms` is ignored.
#[derive(Debug, Clone, Copy)]
pub struct DipoleModel {
    g10: f64,
    g11: f64,
    h11: f64,
}

impl DipoleModel {
    /// IGRF-13, epoch 2020.0 (nT).
    pub const IGRF_2020: DipoleModel = DipoleModel {
        g10: -29404.8,
        g11: -1450.9,
        h11: 4652.5,
    };

    pub fn new(g10: f64, g11: f64, h11: f64) -> Self {
        Self { g10, g11, h11 }
    }

    /// Reference field strength at the equator, nT.
    pub fn reference_intensity(&self) -> f64 {
        (self.g10 * self.g10 + self.g11 * self.g11 + self.h11 * self.h11).sqrt()
    }

    /// Latitude and longitude of the boreal geomagnetic pole, degrees.
    pub fn north_pole(&self) -> (f64, f64) {
        let b0 = self.reference_intensity();
        let colatitude = (-self.g10 / b0).acos();
        let longitude = (-self.h11).atan2(-self.g11);
        (90.0 - colatitude.to_degrees(), longitude.to_degrees())
    }
}

impl Default for DipoleModel {
    fn default() -> Self {
        Self::IGRF_2020
    }
}

impl GeomagneticModel for DipoleModel {
    fn field_at(
        &self,
        latitude: f64,
        longitude: f64,
        altitude_m: f64,
        _time_ms: u64,
    ) -> Option<GeomagneticField> {
        if !(latitude.is_finite() && longitude.is_finite() && altitude_m.is_finite()) {
            return None;
        }
        let (pole_lat, pole_lon) = self.north_pole();
        let (lat, plat) = (latitude.to_radians(), pole_lat.to_radians());
        let dlon = (longitude - pole_lon).to_radians();

        let sin_mlat = lat.sin() * plat.sin() + lat.cos() * plat.cos() * dlon.cos();
        let mlat = sin_mlat.clamp(-1.0, 1.0).asin();

        let r = EARTH_RADIUS_M / (EARTH_RADIUS_M + altitude_m.max(-EARTH_RADIUS_M / 2.0));
        let intensity = self.reference_intensity() * r.powi(3) * (1.0 + 3.0 * sin_mlat * sin_mlat).sqrt();

        Some(GeomagneticField {
            declination_deg: bearing_between(latitude, longitude, pole_lat, pole_lon),
            inclination_deg: (2.0 * mlat.tan()).atan().to_degrees(),
            intensity_nt: intensity,
        })
    }
}
