//! # End-effector trajectory messages

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A pose in some frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position.
    ///
    /// Units: meters
    pub position_m: [f64; 3],

    /// Orientation quaternion, ordered `[x, y, z, w]`.
    pub orientation_q: [f64; 4],
}

/// A sequence of poses sharing a frame, one per control iteration of a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseArray {
    /// Time at which the array was published.
    pub stamp: DateTime<Utc>,

    /// Frame tag, the gripper frame that was controlled.
    pub frame_id: String,

    /// The poses
    pub poses: Vec<Pose>,
}

impl PoseArray {
    /// Create a new pose array stamped now.
    pub fn new(frame_id: &str, poses: Vec<Pose>) -> Self {
        Self {
            stamp: Utc::now(),
            frame_id: frame_id.to_string(),
            poses,
        }
    }
}
