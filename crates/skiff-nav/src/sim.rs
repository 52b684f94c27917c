use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::geo::{destination, GeoPoint};
use crate::navigator::AxisTarget;

/// Simple planar boat model: throttle sets speed, steering sets turn rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub max_speed_mps: f64,
    pub max_turn_rate_dps: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self { max_speed_mps: 2.0, max_turn_rate_dps: 45.0 }
    }
}

/// Position after holding `axis` for `dt` from (`point`, `heading`).
pub fn project(cfg: &MotionConfig, point: &GeoPoint, heading: f64, axis: AxisTarget, dt: Duration) -> (GeoPoint, f64) {
    let dt = dt.as_secs_f64();
    let steering = axis.steering.clamp(-1.0, 1.0);
    let throttle = axis.throttle.clamp(-1.0, 1.0);
    let heading = (heading + steering * cfg.max_turn_rate_dps * dt).rem_euclid(360.0);
    let dist = throttle * cfg.max_speed_mps * dt;
    if dist == 0.0 {
        return (*point, heading);
    }
    let next = if dist > 0.0 {
        destination(point, heading, dist)
    } else {
        destination(point, heading + 180.0, -dist)
    };
    (next, heading)
}

/// Stand-in for live GPS when no boat is attached.
#[derive(Debug, Clone)]
pub struct MotionSim {
    cfg: MotionConfig,
    point: GeoPoint,
    heading: f64,
    axis: AxisTarget,
}

impl MotionSim {
    pub fn new(cfg: MotionConfig, start: GeoPoint, heading: f64) -> Self {
        Self { cfg, point: start, heading, axis: AxisTarget::ZERO }
    }

    pub fn set_axis(&mut self, axis: AxisTarget) {
        self.axis = axis;
    }

    pub fn advance(&mut self, dt: Duration) -> (GeoPoint, f64) {
        let (p, h) = project(&self.cfg, &self.point, self.heading, self.axis, dt);
        self.point = p;
        self.heading = h;
        (p, h)
    }

    pub fn position(&self) -> (GeoPoint, f64) {
        (self.point, self.heading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_throttle_north() {
        let mut s = MotionSim::new(MotionConfig::default(), GeoPoint::new(0.0, 0.0), 0.0);
        s.set_axis(AxisTarget { steering: 0.0, throttle: 1.0 });
        let (p, h) = s.advance(Duration::from_secs(5));
        assert_eq!(h, 0.0);
        assert!((GeoPoint::new(0.0, 0.0).distance_m(&p) - 10.0).abs() < 1e-6);
        assert!(p.lat > 0.0);
    }

    #[test]
    fn reverse_moves_astern() {
        let cfg = MotionConfig::default();
        let (p, _) = project(&cfg, &GeoPoint::new(0.0, 0.0), 90.0, AxisTarget { steering: 0.0, throttle: -0.5 }, Duration::from_secs(2));
        assert!(p.lon < 0.0);
    }

    #[test]
    fn steering_turns_heading() {
        let cfg = MotionConfig::default();
        let (_, h) = project(&cfg, &GeoPoint::new(0.0, 0.0), 350.0, AxisTarget { steering: 1.0, throttle: 0.0 }, Duration::from_secs(1));
        assert!((h - 35.0).abs() < 1e-9);
    }
}
