pub mod doctor;
pub mod fence;
pub mod geo;
pub mod navigator;
pub mod pose;
pub mod sim;

pub use fence::{FenceConfig, Geofence, Zone};
pub use geo::GeoPoint;
pub use navigator::{AxisTarget, NavConfig, NavEvent, NavState, NavStep, ReturnNavigator};
pub use pose::{BoatPose, PoseTracker};
