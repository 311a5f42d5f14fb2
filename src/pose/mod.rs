pub mod detector;
pub mod keypoint;
pub mod preprocess;

pub use detector::PoseDetector;
pub use keypoint::{Keypoint, KeypointIndex, Pose, TorsoLandmarks};
