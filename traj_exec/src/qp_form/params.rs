//! Parameters structure for QpForm

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for the QP formulation and adaptive weighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    // ---- TASK ----
    /// Proportional gain applied to the position error
    pub prop_gain: f64,

    /// Magnitude bound on the slack variables
    pub slack_limit: f64,

    /// Fraction of the way from the current to the goal orientation used as the orientation
    /// error each iteration
    pub slerp_factor: f64,

    /// Orientation error is suppressed while the depth (z) position error is at least this.
    ///
    /// Units: meters
    pub orient_suppress_dist_m: f64,

    // ---- WEIGHTING ----
    /// Scaled planar distance at or below which the near zone weights apply (`a`)
    pub zone_near_dist: f64,

    /// Scaled planar distance at or above which the far zone weights apply (`b`)
    pub zone_far_dist: f64,

    /// Weight of a joint the optimiser should use
    pub active_weight: f64,

    /// Weight of a joint the optimiser should avoid
    pub inactive_weight: f64,

    /// Fixed weight of the base rotation joint
    pub base_rot_weight: f64,

    /// Scaled depth error at which the torso becomes fully active in the near zone
    pub torso_depth_norm: f64,

    /// Slack weight in the near zone
    pub slack_weight_near: f64,

    /// Slack weight in the far zone
    pub slack_weight_far: f64,

    /// Scale of the base joint Jacobian columns in the near zone
    pub base_jac_scale_near: f64,

    /// Scale of the base joint Jacobian columns in the far zone
    pub base_jac_scale_far: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            prop_gain: 3.0,
            slack_limit: 300.0,
            slerp_factor: 0.1,
            orient_suppress_dist_m: 0.10,
            zone_near_dist: 0.55,
            zone_far_dist: 0.9,
            active_weight: 1e-3,
            inactive_weight: 10.0,
            base_rot_weight: 100.0,
            torso_depth_norm: 0.6,
            slack_weight_near: 20.0,
            slack_weight_far: 4.0,
            base_jac_scale_near: 0.1,
            base_jac_scale_far: 1.0,
        }
    }
}
