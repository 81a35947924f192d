//! # Trajectory Executable Parameters
//!
//! This module provides parameters for the trajectory executable which are shared between the
//! state tracker, goal manager and the control loop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::goal::Arm;
use serde::{Deserialize, Serialize};

use crate::kin_chain::LimitDefaults;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajExecParams {
    /// Path to the URDF robot description, relative paths are resolved against the software root
    pub urdf_path: String,

    /// Frame the kinematic chains start from and goals are expressed in
    pub base_frame: String,

    /// End-effector frame of the left arm
    pub left_gripper_frame: String,

    /// End-effector frame of the right arm
    pub right_gripper_frame: String,

    /// Names of the joints with special roles in the controller
    pub roles: JointRoleNames,

    /// Limits for joints which don't declare their own
    pub limits: LimitDefaults,

    /// Maximum change in commanded velocity between iterations, by joint role.
    ///
    /// Units: radians/second or meters/second, per iteration
    pub max_accel: RoleAccels,

    /// Period of the executable's main loop, which polls for new goals.
    ///
    /// Units: seconds
    pub tick_period_s: f64,

    /// Minimum duration of one control iteration, zero to run as fast as the solver allows.
    ///
    /// Units: seconds
    pub min_iter_period_s: f64,
}

/// Joint names of the mobile base and torso.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointRoleNames {
    pub base_x: String,
    pub base_y: String,
    pub base_rot: String,
    pub torso: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoleAccels {
    pub base: f64,
    pub base_rot: f64,
    pub torso: f64,
    pub arm: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajExecParams {
    /// The end-effector frame of the given arm.
    pub fn gripper_frame(&self, arm: Arm) -> &str {
        match arm {
            Arm::Left => &self.left_gripper_frame,
            Arm::Right => &self.right_gripper_frame,
        }
    }
}

impl Default for TrajExecParams {
    fn default() -> Self {
        Self {
            urdf_path: "traj_exec/res/dual_arm.urdf".into(),
            base_frame: "odom".into(),
            left_gripper_frame: "left_gripper_tool_frame".into(),
            right_gripper_frame: "right_gripper_tool_frame".into(),
            roles: JointRoleNames {
                base_x: "odom_x_joint".into(),
                base_y: "odom_y_joint".into(),
                base_rot: "odom_z_joint".into(),
                torso: "triangle_base_joint".into(),
            },
            limits: LimitDefaults {
                default_pos_limit: 0.07,
                default_vel_limit: 0.5,
            },
            max_accel: RoleAccels {
                base: 0.1,
                base_rot: 0.1,
                torso: 0.05,
                arm: 0.02,
            },
            tick_period_s: 0.1,
            min_iter_period_s: 0.0,
        }
    }
}
