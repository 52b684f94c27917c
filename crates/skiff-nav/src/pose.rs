use std::time::{Duration, Instant};
use time::OffsetDateTime;

use crate::geo::GeoPoint;

/// Fixes closer than this are too noisy to derive a course from.
const COG_MIN_M: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct BoatPose {
    pub point: GeoPoint,
    /// Compass degrees, 0 = North.
    pub heading: f64,
    pub updated: Instant,
    pub ts: OffsetDateTime,
}

impl BoatPose {
    /// Wall-clock time of the fix as `HH:MM:SSZ`.
    pub fn clock(&self) -> String {
        format!("{:02}:{:02}:{:02}Z", self.ts.hour(), self.ts.minute(), self.ts.second())
    }
}

/// Last-writer-wins store for the boat position. Staleness is left to the
/// caller; [`PoseTracker::age`] exposes it.
#[derive(Debug, Default, Clone)]
pub struct PoseTracker {
    latest: Option<BoatPose>,
}

impl PoseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, point: GeoPoint, heading: Option<f64>) -> &BoatPose {
        self.update_at(point, heading, Instant::now())
    }

    pub fn update_at(&mut self, point: GeoPoint, heading: Option<f64>, at: Instant) -> &BoatPose {
        let heading = match (heading, &self.latest) {
            (Some(h), _) => h.rem_euclid(360.0),
            (None, Some(prev)) if prev.point.distance_m(&point) >= COG_MIN_M => prev.point.bearing_to(&point),
            (None, Some(prev)) => prev.heading,
            (None, None) => 0.0,
        };
        self.latest.insert(BoatPose { point, heading, updated: at, ts: OffsetDateTime::now_utc() })
    }

    pub fn latest(&self) -> Option<&BoatPose> {
        self.latest.as_ref()
    }

    pub fn age(&self) -> Option<Duration> {
        self.latest.as_ref().map(|p| p.updated.elapsed())
    }

    pub fn clear(&mut self) {
        self.latest = None;
    }
}
