//! # Simulation interface
//!
//! Messages exchanged with the (naive kinematics) simulator or actuation layer: the joint state
//! stream it publishes, and the velocity commands and clock pulses it consumes.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State of a set of named joints.
///
/// The same message is used both for the measured joint state and for velocity commands. Arrays
/// are aligned with `names`, but consumers must match by name since publishers give no ordering
/// guarantee, and may omit trailing arrays they don't populate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    /// Time at which the state was sampled or the command issued.
    #[serde(default = "chrono::Utc::now")]
    pub stamp: DateTime<Utc>,

    /// Joint names.
    pub names: Vec<String>,

    /// Joint positions.
    ///
    /// Units: radians for revolute joints, meters for prismatic joints
    #[serde(default)]
    pub positions: Vec<f64>,

    /// Joint velocities.
    ///
    /// Units: radians/second for revolute joints, meters/second for prismatic joints
    #[serde(default)]
    pub velocities: Vec<f64>,

    /// Joint efforts.
    #[serde(default)]
    pub efforts: Vec<f64>,
}

/// A simulation clock pulse, instructing the simulator to advance by `period_s`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionClock {
    /// Wall time at which the pulse was issued.
    pub now: DateTime<Utc>,

    /// Period to project the commanded velocities over.
    ///
    /// Units: seconds
    pub period_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Messages sent to the simulator on the command socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimCommand {
    /// Joint velocity command
    Velocity(JointState),

    /// Clock pulse, sent after each velocity command
    Clock(ProjectionClock),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JointState {
    /// Build a measured joint state from names and positions.
    pub fn from_positions(names: Vec<String>, positions: Vec<f64>) -> Self {
        Self {
            stamp: Utc::now(),
            names,
            positions,
            velocities: Vec::new(),
            efforts: Vec::new(),
        }
    }

    /// Build a velocity command, the positions and efforts are zero filled.
    pub fn velocity_command(names: Vec<String>, velocities: Vec<f64>) -> Self {
        let zeros = vec![0.0; names.len()];

        Self {
            stamp: Utc::now(),
            names,
            positions: zeros.clone(),
            velocities,
            efforts: zeros,
        }
    }

    /// Get the position of the named joint, if present.
    pub fn position_of(&self, name: &str) -> Option<f64> {
        self.index_of(name).and_then(|i| self.positions.get(i).copied())
    }

    /// Get the velocity of the named joint, if present.
    pub fn velocity_of(&self, name: &str) -> Option<f64> {
        self.index_of(name).and_then(|i| self.velocities.get(i).copied())
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl ProjectionClock {
    /// Create a new pulse stamped now.
    pub fn new(period_s: f64) -> Self {
        Self {
            now: Utc::now(),
            period_s,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_velocity_command_is_zero_filled() {
        let cmd = JointState::velocity_command(
            vec!["a".into(), "b".into()],
            vec![0.5, -0.25]
        );

        assert_eq!(cmd.positions, vec![0.0, 0.0]);
        assert_eq!(cmd.efforts, vec![0.0, 0.0]);
        assert_eq!(cmd.velocity_of("b"), Some(-0.25));
        assert_eq!(cmd.velocity_of("c"), None);
    }

    #[test]
    fn test_joint_state_partial_json() {
        // Publishers may omit the velocity, effort and stamp fields
        let js: JointState = serde_json::from_str(
            r#"{"names": ["odom_x_joint", "odom_y_joint"], "positions": [1.0, 2.0]}"#
        ).unwrap();

        assert_eq!(js.position_of("odom_y_joint"), Some(2.0));
        assert!(js.velocities.is_empty());
    }
}
