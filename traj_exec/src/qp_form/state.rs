//! QP formulation module state

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use util::module::State;

use super::*;
use crate::{qp_solver::QpProblem, state_tracker::RobotSnapshot};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Builds the QP for each control iteration.
#[derive(Debug, Default)]
pub struct QpForm {
    params: Params,

    /// Zone of the previous iteration
    zone: Option<Zone>,
}

/// Everything one formulation step depends on.
#[derive(Debug, Clone)]
pub struct ControllerContext {
    pub snapshot: RobotSnapshot,
    pub target: GoalTarget,
    pub error: TaskError,

    /// Velocity commanded in the previous iteration, in chain order
    pub prev_velocity: DVector<f64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusReport {
    pub zone: Zone,

    /// Scaled planar distance to the goal
    pub dist: f64,

    pub base_jac_scale: f64,

    pub orientation_suppressed: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl State for QpForm {
    type InitData = Params;
    type InitError = QpFormError;

    type InputData = ControllerContext;
    type OutputData = QpProblem;
    type StatusReport = StatusReport;
    type ProcError = QpFormError;

    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        validate(&init_data)?;

        self.params = init_data;
        self.zone = None;

        Ok(())
    }

    /// Build the QP for this iteration.
    ///
    /// Decision variables are the joint velocities in chain order followed by the six slacks.
    /// Constraint rows are the task rows, the joint position limit rows and the acceleration
    /// limit rows, in that order.
    fn proc(
        &mut self,
        input_data: &Self::InputData
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let snap = &input_data.snapshot;
        let chain = &snap.chain;
        let n = chain.dof();
        let nz = n + NUM_TASK_DOF;
        let m = NUM_TASK_DOF + 2 * n;

        if input_data.prev_velocity.len() != n {
            return Err(QpFormError::PrevVelocityLength {
                expected: n,
                actual: input_data.prev_velocity.len(),
            })
        }

        let weights = Weights::compute(
            &self.params,
            &snap.roles,
            n,
            &input_data.error.position_scaled
        );

        if self.zone != Some(weights.zone) {
            debug!(
                "Weighting zone {:?} -> {:?} at distance {:.3}",
                self.zone, weights.zone, weights.dist
            );
            self.zone = Some(weights.zone);
        }

        // ---- OBJECTIVE ----

        let mut h = DMatrix::zeros(nz, nz);
        h.view_mut((0, 0), (n, n)).set_diagonal(&weights.joint);
        h.view_mut((n, n), (NUM_TASK_DOF, NUM_TASK_DOF)).set_diagonal(&weights.slack);

        // ---- CONSTRAINT MATRIX ----

        let jac = task_jacobian(snap, weights.base_jac_scale)?;

        let mut a = DMatrix::zeros(m, nz);
        a.view_mut((0, 0), (NUM_TASK_DOF, n)).copy_from(&jac);
        a.view_mut((0, n), (NUM_TASK_DOF, NUM_TASK_DOF)).fill_with_identity();
        a.view_mut((NUM_TASK_DOF, 0), (n, n)).fill_with_identity();
        a.view_mut((NUM_TASK_DOF + n, 0), (n, n)).fill_with_identity();

        // ---- CONSTRAINT BOUNDS ----

        let err = &input_data.error;
        let task = DVector::from_iterator(
            NUM_TASK_DOF,
            err.position_scaled.iter().chain(err.orientation.iter()).copied()
        );

        // A joint outside its limits may always stop or move back inside
        let q = &snap.positions;
        let lower_pos = (chain.lower_limits() - q).map(|v| v.min(0.0));
        let upper_pos = (chain.upper_limits() - q).map(|v| v.max(0.0));

        let (lower_acc, upper_acc) = accel_bounds(
            &chain.velocity_limits(),
            &snap.accel_max,
            &input_data.prev_velocity
        );

        let mut lba = DVector::zeros(m);
        let mut uba = DVector::zeros(m);
        lba.rows_mut(0, NUM_TASK_DOF).copy_from(&task);
        uba.rows_mut(0, NUM_TASK_DOF).copy_from(&task);
        lba.rows_mut(NUM_TASK_DOF, n).copy_from(&lower_pos);
        uba.rows_mut(NUM_TASK_DOF, n).copy_from(&upper_pos);
        lba.rows_mut(NUM_TASK_DOF + n, n).copy_from(&lower_acc);
        uba.rows_mut(NUM_TASK_DOF + n, n).copy_from(&upper_acc);

        // ---- VARIABLE BOUNDS ----

        let vel = chain.velocity_limits();
        let mut lb = DVector::from_element(nz, -self.params.slack_limit);
        let mut ub = DVector::from_element(nz, self.params.slack_limit);
        lb.rows_mut(0, n).copy_from(&(-&vel));
        ub.rows_mut(0, n).copy_from(&vel);

        let problem = QpProblem {
            h,
            g: DVector::zeros(nz),
            a,
            lb,
            ub,
            lba,
            uba,
        };

        let report = StatusReport {
            zone: weights.zone,
            dist: weights.dist,
            base_jac_scale: weights.base_jac_scale,
            orientation_suppressed: err.orientation_suppressed,
        };

        Ok((problem, report))
    }
}

impl QpForm {
    pub fn params(&self) -> &Params {
        &self.params
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Acceleration limit bounds on the joint velocity.
///
/// `k qdot_prev - a_max <= qdot <= k qdot_prev + a_max` with `k = max((v_max - a_max) / v_max, 0)`.
pub fn accel_bounds(
    vel_limits: &DVector<f64>,
    accel_max: &DVector<f64>,
    prev_velocity: &DVector<f64>
) -> (DVector<f64>, DVector<f64>) {
    let centre = DVector::from_fn(vel_limits.len(), |i, _| {
        let v = vel_limits[i];
        let k = if v > 0.0 {
            ((v - accel_max[i]) / v).max(0.0)
        }
        else {
            0.0
        };
        k * prev_velocity[i]
    });

    (&centre - accel_max, &centre + accel_max)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// The chain Jacobian modified for the base joints.
///
/// The planar base columns are scaled by `base_jac_scale` and the base rotation is removed from
/// the linear rows, so that rotating the base is never used to translate the end-effector.
fn task_jacobian(snap: &RobotSnapshot, base_jac_scale: f64) -> Result<DMatrix<f64>, QpFormError> {
    let mut jac = snap.chain.jacobian(snap.positions.as_slice())
        .map_err(QpFormError::Jacobian)?;

    for i in [snap.roles.base_x, snap.roles.base_y].iter().flatten() {
        jac.column_mut(*i).scale_mut(base_jac_scale);
    }

    if let Some(i) = snap.roles.base_rot {
        jac[(0, i)] = 0.0;
        jac[(1, i)] = 0.0;
    }

    Ok(jac)
}

fn validate(params: &Params) -> Result<(), QpFormError> {
    let invalid = |msg: &str| Err(QpFormError::InvalidParams(msg.into()));

    if !(params.zone_far_dist > params.zone_near_dist) || params.zone_near_dist < 0.0 {
        return invalid("zone distances must satisfy 0 <= near < far")
    }
    if !(params.slerp_factor > 0.0 && params.slerp_factor <= 1.0) {
        return invalid("slerp factor must be in (0, 1]")
    }
    if !(params.slack_limit > 0.0) || !(params.prop_gain > 0.0) {
        return invalid("slack limit and gain must be positive")
    }
    if !(params.torso_depth_norm > 0.0) {
        return invalid("torso depth normaliser must be positive")
    }

    let weights = [
        params.active_weight,
        params.inactive_weight,
        params.base_rot_weight,
        params.slack_weight_near,
        params.slack_weight_far,
    ];
    if weights.iter().any(|w| !(*w > 0.0)) {
        return invalid("weights must be positive")
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        goal_mgr::ActiveGoal,
        params::TrajExecParams,
        sim::DUAL_ARM_URDF,
        state_tracker::{DescriptionSource, StateTracker},
    };
    use approx::assert_abs_diff_eq;
    use comms_if::{goal::Arm, sim::JointState};
    use nalgebra::{Quaternion, Vector3};

    fn snapshot(names: &[&str], positions: &[f64]) -> RobotSnapshot {
        let t = StateTracker::with_source(
            TrajExecParams::default(),
            DescriptionSource::Xml(DUAL_ARM_URDF.into())
        );
        t.select_arm(Arm::Left).unwrap();
        t.on_joint_state(&JointState::from_positions(
            names.iter().map(|s| s.to_string()).collect(),
            positions.to_vec()
        ));
        t.snapshot().unwrap()
    }

    fn context(snapshot: RobotSnapshot, goal: Vector3<f64>) -> ControllerContext {
        let target = GoalTarget::new(
            &ActiveGoal {
                goal_id: "g".into(),
                arm: Arm::Left,
                position: goal,
                orientation: Quaternion::identity(),
            }
        );
        let error = task_error(
            &Params::default(),
            &snapshot.eef_position,
            &snapshot.eef_orientation,
            &target
        );
        let n = snapshot.chain.dof();

        ControllerContext {
            snapshot,
            target,
            error,
            prev_velocity: DVector::zeros(n),
        }
    }

    fn form() -> QpForm {
        let mut form = QpForm::default();
        form.init(Params::default()).unwrap();
        form
    }

    #[test]
    fn test_problem_layout() {
        let ctx = context(snapshot(&["odom_x_joint"], &[0.0]), Vector3::new(0.5, 1.2, 0.0));
        let (p, report) = form().proc(&ctx).unwrap();

        let n = 11;
        assert_eq!(p.num_vars(), n + 6);
        assert_eq!(p.num_constraints(), 6 + 2 * n);
        assert!(p.check_dims().is_ok());
        assert_eq!(report.zone, Zone::Far);

        // Task rows are equalities on the scaled error
        assert_abs_diff_eq!(p.lba[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p.uba[1], 3.6, epsilon = 1e-12);
        for i in 0..6 {
            assert_eq!(p.lba[i], p.uba[i]);
            assert_eq!(p.a[(i, n + i)], 1.0);
        }

        // Base rotation doesn't translate the end-effector
        assert_eq!(p.a[(0, 2)], 0.0);
        assert_eq!(p.a[(1, 2)], 0.0);
        // Far zone leaves the base columns unscaled
        assert_abs_diff_eq!(p.a[(0, 0)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.a[(1, 1)], 1.0, epsilon = 1e-12);

        // Identity blocks for the limit rows
        assert_eq!(p.a[(6 + 4, 4)], 1.0);
        assert_eq!(p.a[(6 + n + 4, 4)], 1.0);
        assert_eq!(p.a[(6 + n + 4, n)], 0.0);

        // Position limits of the torso, at zero
        assert_abs_diff_eq!(p.lba[6 + 3], -0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(p.uba[6 + 3], 0.3, epsilon = 1e-12);

        // Acceleration limits with no previous command
        assert_abs_diff_eq!(p.lba[6 + n], -0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(p.uba[6 + n + 10], 0.02, epsilon = 1e-12);

        // Variable bounds
        assert_eq!(p.ub[0], 4.0);
        assert_eq!(p.lb[4], -2.0);
        assert_eq!(p.ub[n + 5], 300.0);
        assert_eq!(p.lb[n], -300.0);

        // Objective
        assert_eq!(p.h[(2, 2)], 100.0);
        assert_eq!(p.h[(0, 1)], 0.0);
        assert!(p.g.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_near_zone_scales_base_columns() {
        let ctx = context(snapshot(&["odom_x_joint"], &[0.0]), Vector3::new(0.05, 0.05, 0.0));
        let (p, report) = form().proc(&ctx).unwrap();

        assert_eq!(report.zone, Zone::Near);
        assert_abs_diff_eq!(p.a[(0, 0)], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(p.a[(1, 1)], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_accel_bounds() {
        let vel = DVector::from_vec(vec![4.0, 2.0, 0.5]);
        let acc = DVector::from_vec(vec![0.1, 0.02, 1.0]);
        let prev = DVector::from_vec(vec![1.0, -2.0, 0.5]);

        let (lo, hi) = accel_bounds(&vel, &acc, &prev);

        // k = (4 - 0.1) / 4
        assert_abs_diff_eq!(lo[0], 0.975 - 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(hi[0], 0.975 + 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(hi[1], -1.98 + 0.02, epsilon = 1e-12);
        // Acceleration larger than the velocity limit gives k = 0
        assert_abs_diff_eq!(lo[2], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(hi[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_position_rows_keep_stopping_feasible() {
        // Torso driven past its upper limit
        let ctx = context(
            snapshot(&["odom_x_joint", "triangle_base_joint"], &[0.0, 0.4]),
            Vector3::new(0.0, 0.0, 0.0)
        );
        let (p, _) = form().proc(&ctx).unwrap();

        assert_abs_diff_eq!(p.lba[6 + 3], -0.7, epsilon = 1e-12);
        assert_eq!(p.uba[6 + 3], 0.0);
    }

    #[test]
    fn test_errors() {
        let mut ctx = context(snapshot(&["odom_x_joint"], &[0.0]), Vector3::zeros());
        ctx.prev_velocity = DVector::zeros(3);
        assert!(matches!(
            form().proc(&ctx),
            Err(QpFormError::PrevVelocityLength { expected: 11, actual: 3 })
        ));

        let mut params = Params::default();
        params.zone_far_dist = 0.2;
        assert!(matches!(QpForm::default().init(params), Err(QpFormError::InvalidParams(_))));
    }
}
