use serde::{Deserialize, Serialize};

use crate::geo::{dist_point_to_segment_m, GeoPoint, METERS_PER_DEG};

/// ~5.5 m at the reference latitude.
pub const DEFAULT_BUFFER_DEG: f64 = 0.00005;

/// A no-go area. The boat must stay out of it and out of its buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Zone {
    Box { south: f64, north: f64, west: f64, east: f64 },
    Polygon { points: Vec<GeoPoint> },
}

impl Zone {
    fn is_near(&self, p: &GeoPoint, buffer_deg: f64) -> bool {
        match self {
            Zone::Box { south, north, west, east } => {
                p.lat >= south - buffer_deg
                    && p.lat <= north + buffer_deg
                    && p.lon >= west - buffer_deg
                    && p.lon <= east + buffer_deg
            }
            Zone::Polygon { points } => {
                if points.len() < 3 {
                    return false;
                }
                if point_in_polygon(points, p) {
                    return true;
                }
                let buffer_m = buffer_deg * METERS_PER_DEG;
                let n = points.len();
                (0..n).any(|i| dist_point_to_segment_m(p, &points[i], &points[(i + 1) % n]) <= buffer_m)
            }
        }
    }

    /// Closed outline for the render surface.
    pub fn outline(&self) -> Vec<GeoPoint> {
        match self {
            Zone::Box { south, north, west, east } => vec![
                GeoPoint::new(*south, *west),
                GeoPoint::new(*north, *west),
                GeoPoint::new(*north, *east),
                GeoPoint::new(*south, *east),
            ],
            Zone::Polygon { points } => points.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FenceConfig {
    #[serde(default = "default_buffer_deg")]
    pub buffer_deg: f64,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

fn default_buffer_deg() -> f64 {
    DEFAULT_BUFFER_DEG
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self { buffer_deg: DEFAULT_BUFFER_DEG, zones: Vec::new() }
    }
}

/// Static, read-only set of no-go zones.
#[derive(Debug, Clone, Default)]
pub struct Geofence {
    zones: Vec<Zone>,
    buffer_deg: f64,
}

impl Geofence {
    pub fn new(cfg: FenceConfig) -> Self {
        Self { zones: cfg.zones, buffer_deg: cfg.buffer_deg }
    }

    /// Shared by the reactive (telemetry) and predictive (projected) checks.
    pub fn is_near_boundary(&self, p: &GeoPoint) -> bool {
        self.zones.iter().any(|z| z.is_near(p, self.buffer_deg))
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn buffer_deg(&self) -> f64 {
        self.buffer_deg
    }

    pub fn outlines(&self) -> Vec<Vec<GeoPoint>> {
        self.zones.iter().map(Zone::outline).collect()
    }
}

// Ray casting polygon test
fn point_in_polygon(poly: &[GeoPoint], p: &GeoPoint) -> bool {
    let mut inside = false;
    let n = poly.len();
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (poly[i].lon, poly[i].lat);
        let (xj, yj) = (poly[j].lon, poly[j].lat);
        let intersect = ((yi > p.lat) != (yj > p.lat))
            && (p.lon < (xj - xi) * (p.lat - yi) / (yj - yi + 1e-12) + xi);
        if intersect {
            inside = !inside;
        }
        j = i;
    }
    inside
}
