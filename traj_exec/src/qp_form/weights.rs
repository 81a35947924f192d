//! Adaptive joint and slack weighting
//!
//! The weights depend on the remaining planar distance to the goal, `dist = max(|ex|, |ey|)` of
//! the scaled position error. Below `a` (near) the arm does the work and the base is held still,
//! above `b` (far) the arm is held still and the base drives towards the goal, in between every
//! weight is blended linearly so that there is no jump at either threshold.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{DVector, Vector3};
use serde::Serialize;
use util::maths::{clamp, lerp};

use crate::state_tracker::JointRoles;
use super::{Params, NUM_TASK_DOF};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The weights for one control iteration.
#[derive(Debug, Clone)]
pub struct Weights {
    /// Diagonal of the joint velocity weight matrix, in chain order
    pub joint: DVector<f64>,

    /// Diagonal of the slack weight matrix, in task order (x, y, z, roll, pitch, yaw)
    pub slack: DVector<f64>,

    /// Scale applied to the planar base joint columns of the Jacobian
    pub base_jac_scale: f64,

    pub zone: Zone,

    /// Planar distance the weights were computed from
    pub dist: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Approach phase, used for reporting only, the weights themselves are continuous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Zone {
    Near,
    Mid,
    Far,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Weights {
    /// Compute the weights from the scaled position error.
    pub fn compute(
        params: &Params,
        roles: &JointRoles,
        num_joints: usize,
        position_scaled: &Vector3<f64>
    ) -> Self {
        let ex = position_scaled.x.abs();
        let ey = position_scaled.y.abs();
        let dist = ex.max(ey);

        // 0 in the near zone, 1 in the far zone
        let blend = |d: f64| clamp(
            &((d - params.zone_near_dist) / (params.zone_far_dist - params.zone_near_dist)),
            &0.0,
            &1.0
        );
        let t = blend(dist);
        let (tx, ty) = (blend(ex), blend(ey));

        let zone = if dist <= params.zone_near_dist {
            Zone::Near
        }
        else if dist >= params.zone_far_dist {
            Zone::Far
        }
        else {
            Zone::Mid
        };

        let active = params.active_weight;
        let inactive = params.inactive_weight;

        // In the near zone the torso is brought in as the depth error grows
        let depth = clamp(
            &(position_scaled.z.abs() / params.torso_depth_norm),
            &0.0,
            &1.0
        );
        let torso_near = lerp(inactive, active, depth);

        let arm_weight = lerp(active, inactive, t);
        let mut joint = DVector::from_element(num_joints, arm_weight);
        if let Some(i) = roles.base_x {
            joint[i] = lerp(inactive, active, tx);
        }
        if let Some(i) = roles.base_y {
            joint[i] = lerp(inactive, active, ty);
        }
        if let Some(i) = roles.torso {
            joint[i] = lerp(torso_near, inactive, t);
        }
        if let Some(i) = roles.base_rot {
            joint[i] = params.base_rot_weight;
        }

        // A planar axis the base is driving along gives up its slack so the base can't stall
        // behind it
        let slack_z = lerp(params.slack_weight_near, params.slack_weight_far, t);
        let mut slack = DVector::from_element(NUM_TASK_DOF, slack_z);
        slack[0] = lerp(slack_z, inactive, tx);
        slack[1] = lerp(slack_z, inactive, ty);

        Self {
            joint,
            slack,
            base_jac_scale: lerp(params.base_jac_scale_near, params.base_jac_scale_far, t),
            zone,
            dist,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const EPS: f64 = 1e-9;

    /// Roles as resolved on the left arm chain: base x, y, rotation, torso then 7 arm joints.
    fn roles() -> JointRoles {
        JointRoles {
            base_x: Some(0),
            base_y: Some(1),
            base_rot: Some(2),
            torso: Some(3),
            arm: (4..11).collect(),
        }
    }

    fn weights(ex: f64, ey: f64, ez: f64) -> Weights {
        Weights::compute(&Params::default(), &roles(), 11, &Vector3::new(ex, ey, ez))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    fn assert_close(a: f64, b: f64) {
        assert!(close(a, b), "{} != {}", a, b);
    }

    fn max_diff(a: &Weights, b: &Weights) -> f64 {
        let j = (&a.joint - &b.joint).amax();
        let s = (&a.slack - &b.slack).amax();
        j.max(s).max((a.base_jac_scale - b.base_jac_scale).abs())
    }

    #[test]
    fn test_near_zone() {
        let p = Params::default();
        let w = weights(0.1, -0.2, 0.0);

        assert_eq!(w.zone, Zone::Near);
        assert_close(w.joint[0], p.inactive_weight);
        assert_close(w.joint[1], p.inactive_weight);
        assert_close(w.joint[2], p.base_rot_weight);
        // No depth error, torso stays out
        assert_close(w.joint[3], p.inactive_weight);
        assert!(w.joint.rows(4, 7).iter().all(|&j| close(j, p.active_weight)));
        assert!(w.slack.iter().all(|&s| close(s, p.slack_weight_near)));
        assert_close(w.base_jac_scale, p.base_jac_scale_near);

        // Full depth error brings the torso in
        let w = weights(0.1, 0.1, -0.9);
        assert_close(w.joint[3], p.active_weight);
    }

    #[test]
    fn test_far_zone() {
        let p = Params::default();
        let w = weights(1.5, 3.6, 0.0);

        assert_eq!(w.zone, Zone::Far);
        assert_close(w.joint[0], p.active_weight);
        assert_close(w.joint[1], p.active_weight);
        assert_close(w.joint[2], p.base_rot_weight);
        assert!(w.joint.rows(3, 8).iter().all(|&j| close(j, p.inactive_weight)));
        assert_close(w.slack[0], p.inactive_weight);
        assert_close(w.slack[1], p.inactive_weight);
        assert!(w.slack.rows(2, 4).iter().all(|&s| close(s, p.slack_weight_far)));
        assert_close(w.base_jac_scale, p.base_jac_scale_far);

        // Only the far axis of the base is driven
        let w = weights(0.2, 3.6, 0.0);
        assert_eq!(w.zone, Zone::Far);
        assert_close(w.joint[0], p.inactive_weight);
        assert_close(w.joint[1], p.active_weight);
    }

    #[test]
    fn test_mid_zone_blends() {
        let p = Params::default();
        let mid = 0.5 * (p.zone_near_dist + p.zone_far_dist);
        let w = weights(0.0, mid, 0.0);

        assert_eq!(w.zone, Zone::Mid);
        let half = 0.5 * (p.active_weight + p.inactive_weight);
        assert!((w.joint[1] - half).abs() < EPS);
        assert!((w.joint[5] - half).abs() < EPS);
        assert_close(w.joint[0], p.inactive_weight);
    }

    #[test]
    fn test_continuous_at_zone_boundaries() {
        let p = Params::default();
        let eps = 1e-6;

        for &edge in [p.zone_near_dist, p.zone_far_dist].iter() {
            for &ez in [0.0, 0.3, 1.0].iter() {
                let below = weights(0.1, edge - eps, ez);
                let above = weights(0.1, edge + eps, ez);
                assert!(max_diff(&below, &above) < 1e-3, "jump at {}", edge);

                let below = weights(-(edge - eps), edge - eps, ez);
                let above = weights(-(edge + eps), edge + eps, ez);
                assert!(max_diff(&below, &above) < 1e-3, "jump at {}", edge);
            }
        }
    }

    #[test]
    fn test_missing_roles_are_arm_joints() {
        let p = Params::default();
        let roles = JointRoles {
            base_x: None,
            base_y: None,
            base_rot: None,
            torso: None,
            arm: (0..7).collect(),
        };
        let w = Weights::compute(&p, &roles, 7, &Vector3::new(0.0, 0.0, 0.0));
        assert!(w.joint.iter().all(|&j| close(j, p.active_weight)));
    }
}
