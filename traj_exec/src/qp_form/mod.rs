//! # QP formulation module
//!
//! Each control iteration the formulator builds a QP over the joint velocities and one slack
//! variable per task space degree of freedom:
//!
//! ```text
//! z = [qdot_0 .. qdot_n-1, s_0 .. s_5]
//!
//! min  z' H z,  H = diag(joint weights, slack weights)
//! s.t. J qdot + s = [gain * position error, orientation error]
//!      lower - q            <= qdot <= upper - q
//!      k qdot_prev - a_max  <= qdot <= k qdot_prev + a_max,   k = (v_max - a_max) / v_max
//!      -v_max <= qdot <= v_max,  -slack_limit <= s <= slack_limit
//! ```
//!
//! The weights are adapted to the remaining planar distance to the goal, see [`Weights`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod state;
mod weights;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Quaternion, Vector3};
use serde::Serialize;
use util::maths::{quat_to_euler, slerp, wrap_pi};

use crate::{goal_mgr::ActiveGoal, kin_chain::FkError};

pub use params::*;
pub use state::*;
pub use weights::*;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of task space degrees of freedom, and so of slack variables.
pub const NUM_TASK_DOF: usize = 6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The goal pose prepared for the controller.
#[derive(Debug, Clone)]
pub struct GoalTarget {
    pub position: Vector3<f64>,

    /// Unit quaternion
    pub orientation: Quaternion<f64>,

    /// Euler angles of the goal orientation
    pub euler: Vector3<f64>,
}

/// Task space error between the end-effector and the goal.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TaskError {
    /// Position error multiplied by the proportional gain
    pub position_scaled: Vector3<f64>,

    /// Position error.
    ///
    /// Units: meters
    pub position: Vector3<f64>,

    /// Orientation error used in the task constraint, zero while suppressed.
    ///
    /// Units: radians
    pub orientation: Vector3<f64>,

    /// Per axis absolute difference between the end-effector and goal Euler angles, used for the
    /// convergence test.
    ///
    /// Units: radians
    pub orientation_dist: Vector3<f64>,

    /// True if the orientation error was suppressed because of a large depth error
    pub orientation_suppressed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum QpFormError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Could not compute the Jacobian: {0}")]
    Jacobian(FkError),

    #[error("Previous velocity has {actual} elements but the chain has {expected} joints")]
    PrevVelocityLength { expected: usize, actual: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalTarget {
    /// Prepare the target for the given goal.
    ///
    /// Angles are compared with [`wrap_pi`] so the yaw distance is always measured the short way
    /// round, whichever side of pi the goal yaw lies on.
    pub fn new(goal: &ActiveGoal) -> Self {
        let orientation = goal.orientation.normalize();

        Self {
            position: goal.position,
            euler: quat_to_euler(&orientation),
            orientation,
        }
    }
}

impl TaskError {
    /// Returns true if all position axes are within `pos_tol` and all orientation axes are
    /// within `orient_tol`.
    pub fn converged(&self, pos_tol: f64, orient_tol: f64) -> bool {
        self.position.iter().all(|e| e.abs() <= pos_tol)
            && self.orientation_dist.iter().all(|e| *e <= orient_tol)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compute the task error of the end-effector pose against the target.
pub fn task_error(
    params: &Params,
    eef_position: &Vector3<f64>,
    eef_orientation: &Quaternion<f64>,
    target: &GoalTarget
) -> TaskError {
    let position = target.position - eef_position;
    let position_scaled = position * params.prop_gain;

    let eef_euler = quat_to_euler(&eef_orientation.normalize());

    // Small step towards the goal along the shortest arc, as an Euler delta
    let orientation_suppressed = position.z.abs() >= params.orient_suppress_dist_m;
    let orientation = if orientation_suppressed {
        Vector3::zeros()
    }
    else {
        let interp = slerp(eef_orientation, &target.orientation, params.slerp_factor);
        (quat_to_euler(&interp) - eef_euler).map(wrap_pi)
    };

    let orientation_dist = (eef_euler - target.euler).map(|d| wrap_pi(d).abs());

    TaskError {
        position_scaled,
        position,
        orientation,
        orientation_dist,
        orientation_suppressed,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
