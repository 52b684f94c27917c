use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres per degree of latitude, used to turn degree margins into distances.
pub const METERS_PER_DEG: f64 = 111_320.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.lat.abs() <= 90.0 && self.lon.abs() <= 180.0
    }

    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self, other)
    }

    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        bearing_deg(self, other)
    }
}

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Forward azimuth from `from` to `to`, compass degrees in [0, 360).
pub fn bearing_deg(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let p1 = from.lat.to_radians();
    let p2 = to.lat.to_radians();
    let dl = (to.lon - from.lon).to_radians();
    let y = dl.sin() * p2.cos();
    let x = p1.cos() * p2.sin() - p1.sin() * p2.cos() * dl.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Signed turn from `current` to `target`, normalized to (-180, 180].
/// Positive means turn clockwise (starboard).
pub fn angle_error_deg(target: f64, current: f64) -> f64 {
    let e = (target - current).rem_euclid(360.0);
    if e > 180.0 { e - 360.0 } else { e }
}

/// Point reached by travelling `dist_m` from `p` along `bearing` (great circle).
pub fn destination(p: &GeoPoint, bearing: f64, dist_m: f64) -> GeoPoint {
    let d = dist_m / EARTH_RADIUS_M;
    let th = bearing.to_radians();
    let p1 = p.lat.to_radians();
    let l1 = p.lon.to_radians();
    let p2 = (p1.sin() * d.cos() + p1.cos() * d.sin() * th.cos()).asin();
    let l2 = l1 + (th.sin() * d.sin() * p1.cos()).atan2(d.cos() - p1.sin() * p2.sin());
    GeoPoint {
        lat: p2.to_degrees(),
        lon: (l2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0,
    }
}

// Equirectangular projection around (lat0, lon0); fine for the few hundred
// metres a fence edge spans.
pub(crate) fn to_xy(p: &GeoPoint, origin: &GeoPoint) -> (f64, f64) {
    let x = (p.lon - origin.lon).to_radians() * EARTH_RADIUS_M * origin.lat.to_radians().cos();
    let y = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (x, y)
}

pub(crate) fn dist_point_to_segment_m(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (x, y) = to_xy(p, a);
    let (bx, by) = to_xy(b, a);

    let c1 = x * bx + y * by;
    if c1 <= 0.0 {
        return (x * x + y * y).sqrt();
    }
    let c2 = bx * bx + by * by;
    if c2 <= c1 {
        return ((x - bx).powi(2) + (y - by).powi(2)).sqrt();
    }
    let t = c1 / c2;
    ((x - t * bx).powi(2) + (y - t * by).powi(2)).sqrt()
}
