use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fence::Geofence;
use crate::geo::{angle_error_deg, GeoPoint};
use crate::pose::BoatPose;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// Minimum spacing between consecutive breadcrumbs.
    pub breadcrumb_min_m: f64,
    /// A waypoint counts as reached inside this radius.
    pub arrival_m: f64,
    /// Heading error at which steering saturates.
    pub steer_saturation_deg: f64,
    pub cruise_throttle: f64,
    pub control_period_ms: u64,
    /// How far ahead the predictive geofence check looks. 0 disables it.
    pub lookahead_s: f64,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            breadcrumb_min_m: 3.0,
            arrival_m: 3.0,
            steer_saturation_deg: 60.0,
            cruise_throttle: 0.75,
            control_period_ms: 250,
            lookahead_s: 0.0,
        }
    }
}

impl NavConfig {
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavState {
    Idle,
    Tracking,
    Returning,
}

/// Steering/throttle pair handed to the command loop setters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisTarget {
    pub steering: f64,
    pub throttle: f64,
}

impl AxisTarget {
    pub const ZERO: AxisTarget = AxisTarget { steering: 0.0, throttle: 0.0 };
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavEvent {
    TrailUpdated(Vec<GeoPoint>),
    ReturnStarted(Vec<GeoPoint>),
    /// Remaining return path after a waypoint was reached.
    ReturnPath(Vec<GeoPoint>),
    ReturnComplete,
    GeofenceStop(GeoPoint),
    Cancelled,
    NoPath { points: usize },
}

/// Outcome of one navigator operation. `axis` is `Some` whenever the
/// shared steering/throttle targets must be overwritten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavStep {
    pub axis: Option<AxisTarget>,
    pub events: Vec<NavEvent>,
}

impl NavStep {
    fn halt(events: Vec<NavEvent>) -> Self {
        Self { axis: Some(AxisTarget::ZERO), events }
    }
}

pub struct ReturnNavigator {
    cfg: NavConfig,
    fence: Geofence,
    state: NavState,
    trail: Vec<GeoPoint>,
    queue: VecDeque<GeoPoint>,
}

impl ReturnNavigator {
    pub fn new(cfg: NavConfig, fence: Geofence) -> Self {
        Self { cfg, fence, state: NavState::Idle, trail: Vec::new(), queue: VecDeque::new() }
    }

    pub fn config(&self) -> &NavConfig {
        &self.cfg
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn trail(&self) -> &[GeoPoint] {
        &self.trail
    }

    pub fn queue(&self) -> &VecDeque<GeoPoint> {
        &self.queue
    }

    pub fn target(&self) -> Option<GeoPoint> {
        self.queue.front().copied()
    }

    pub fn set_autonomous(&mut self, on: bool) -> NavStep {
        match (on, self.state) {
            (true, NavState::Idle) => {
                info!("nav: autonomous on, tracking breadcrumbs");
                self.reset(NavState::Tracking);
                NavStep::default()
            }
            (true, _) => NavStep::default(),
            (false, NavState::Idle) => NavStep::default(),
            (false, prev) => {
                info!("nav: autonomous off (was {:?})", prev);
                self.reset(NavState::Idle);
                let mut step = NavStep { axis: None, events: vec![NavEvent::TrailUpdated(Vec::new())] };
                if prev == NavState::Returning {
                    step.axis = Some(AxisTarget::ZERO);
                    step.events.push(NavEvent::Cancelled);
                }
                step
            }
        }
    }

    /// Feed a received position. Only has an effect while tracking.
    pub fn on_position(&mut self, p: GeoPoint) -> Vec<NavEvent> {
        if self.state != NavState::Tracking || !p.is_valid() {
            return Vec::new();
        }
        if self.fence.is_near_boundary(&p) {
            debug!("nav: fix {:?} inside fence buffer, not recorded", p);
            return Vec::new();
        }
        let far_enough = self
            .trail
            .last()
            .map_or(true, |last| last.distance_m(&p) >= self.cfg.breadcrumb_min_m);
        if !far_enough {
            return Vec::new();
        }
        self.trail.push(p);
        vec![NavEvent::TrailUpdated(self.trail.clone())]
    }

    pub fn request_return(&mut self) -> NavStep {
        match self.state {
            NavState::Returning => NavStep::default(),
            NavState::Idle => {
                info!("nav: return requested while autonomous mode is off; ignored");
                NavStep::default()
            }
            NavState::Tracking if self.trail.len() < 2 => {
                info!("nav: return requested with {} breadcrumb(s); nothing to retrace", self.trail.len());
                NavStep { axis: None, events: vec![NavEvent::NoPath { points: self.trail.len() }] }
            }
            NavState::Tracking => {
                self.queue = self.trail.iter().rev().copied().collect();
                self.state = NavState::Returning;
                info!("nav: returning home over {} waypoints", self.queue.len());
                NavStep { axis: None, events: vec![NavEvent::ReturnStarted(self.queue.iter().copied().collect())] }
            }
        }
    }

    pub fn cancel_return(&mut self) -> NavStep {
        if self.state != NavState::Returning {
            return NavStep::default();
        }
        info!("nav: return cancelled");
        self.reset(NavState::Idle);
        NavStep::halt(vec![NavEvent::Cancelled, NavEvent::TrailUpdated(Vec::new())])
    }

    /// One control tick while returning. `predicted` is an optional projected
    /// next position; it gets the same fence test as the live fix.
    pub fn step(&mut self, pose: Option<&BoatPose>, predicted: Option<GeoPoint>) -> NavStep {
        if self.state != NavState::Returning {
            return NavStep::default();
        }
        let Some(pose) = pose else {
            debug!("nav: no position fix, holding");
            return NavStep::halt(Vec::new());
        };

        let violation = if self.fence.is_near_boundary(&pose.point) {
            Some(pose.point)
        } else {
            predicted.filter(|p| self.fence.is_near_boundary(p))
        };
        if let Some(at) = violation {
            warn!("nav: geofence buffer reached at {:?}, stopping return", at);
            self.reset(NavState::Idle);
            return NavStep::halt(vec![NavEvent::GeofenceStop(at), NavEvent::TrailUpdated(Vec::new())]);
        }

        let mut events = Vec::new();
        let Some(mut target) = self.target() else {
            self.reset(NavState::Idle);
            return NavStep::halt(vec![NavEvent::ReturnComplete]);
        };
        if pose.point.distance_m(&target) < self.cfg.arrival_m {
            self.queue.pop_front();
            events.push(NavEvent::ReturnPath(self.queue.iter().copied().collect()));
            match self.target() {
                Some(next) => {
                    debug!("nav: waypoint reached, {} remaining", self.queue.len());
                    target = next;
                }
                None => {
                    info!("nav: return complete");
                    self.reset(NavState::Idle);
                    events.push(NavEvent::ReturnComplete);
                    events.push(NavEvent::TrailUpdated(Vec::new()));
                    return NavStep::halt(events);
                }
            }
        }

        let error = angle_error_deg(pose.point.bearing_to(&target), pose.heading);
        let steering = (error / self.cfg.steer_saturation_deg).clamp(-1.0, 1.0);
        NavStep { axis: Some(AxisTarget { steering, throttle: self.cfg.cruise_throttle }), events }
    }

    fn reset(&mut self, state: NavState) {
        self.state = state;
        self.trail.clear();
        self.queue.clear();
    }
}
