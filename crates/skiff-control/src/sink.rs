use tracing::{debug, info};

use skiff_nav::{BoatPose, GeoPoint};

/// Render surface for map and status output. Calls arrive on whatever task
/// produced the change and must not block.
pub trait MapSink: Send + Sync {
    fn update_boat(&self, pose: &BoatPose);
    fn draw_breadcrumbs(&self, trail: &[GeoPoint]);
    fn draw_geofence(&self, outlines: &[Vec<GeoPoint>]);
    /// Remaining return path; empty clears it.
    fn draw_return_path(&self, path: &[GeoPoint]);
    fn notify(&self, status: &str);
}

/// Writes everything to the log. Boat updates are at debug level since they
/// arrive with every fix.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MapSink for LogSink {
    fn update_boat(&self, pose: &BoatPose) {
        debug!("boat at {:.6},{:.6} hdg {:.0}", pose.point.lat, pose.point.lon, pose.heading);
    }

    fn draw_breadcrumbs(&self, trail: &[GeoPoint]) {
        debug!("trail: {} breadcrumb(s)", trail.len());
    }

    fn draw_geofence(&self, outlines: &[Vec<GeoPoint>]) {
        info!("geofence: {} zone(s)", outlines.len());
    }

    fn draw_return_path(&self, path: &[GeoPoint]) {
        match path.first() {
            Some(next) => info!("return path: {} left, next {:.6},{:.6}", path.len(), next.lat, next.lon),
            None => info!("return path cleared"),
        }
    }

    fn notify(&self, status: &str) {
        info!("status: {}", status);
    }
}
