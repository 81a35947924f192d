//! # Robot state tracker
//!
//! Keeps the kinematic chain of the selected arm and the current joint positions and end-effector
//! pose, fed by the joint state stream. The tracker is shared between the joint state client
//! thread, the goal manager (which selects the arm) and the control loop (which takes snapshots).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{path::PathBuf, sync::{Arc, Mutex}};

use comms_if::{goal::Arm, sim::JointState, traj::Pose};
use log::{debug, info, warn};
use nalgebra::{DVector, Isometry3, Quaternion, Vector3};
use util::{host, maths::rot_to_quat};

use crate::{
    kin_chain::{load_robot, parse_robot, ChainBuildError, KinematicChain},
    params::TrajExecParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct StateTracker {
    params: TrajExecParams,
    source: DescriptionSource,
    inner: Mutex<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    active: Option<ActiveChain>,

    /// Latest joint state message, kept while no chain is selected
    latest: Option<JointState>,

    /// Number of joint state messages received
    seq: u64,
}

/// The selected arm's chain and the state of its joints.
struct ActiveChain {
    arm: Arm,
    chain: Arc<KinematicChain>,
    roles: JointRoles,
    accel_max: DVector<f64>,
    state: RobotState,
}

/// Chain indices of the joints with special roles.
#[derive(Debug, Clone, PartialEq)]
pub struct JointRoles {
    pub base_x: Option<usize>,
    pub base_y: Option<usize>,
    pub base_rot: Option<usize>,
    pub torso: Option<usize>,

    /// All other joints, in chain order
    pub arm: Vec<usize>,
}

/// Positions of the chain joints and the resulting end-effector pose.
#[derive(Debug, Clone)]
pub struct RobotState {
    /// Chain ordered joint positions
    pub positions: DVector<f64>,

    /// Which chain joints have been present in at least one joint state message
    pub observed: Vec<bool>,

    /// End-effector pose in the base frame, `None` until forward kinematics first succeeds
    pub eef: Option<Isometry3<f64>>,
}

/// An owned copy of the tracker's state for use by the control loop.
#[derive(Debug, Clone)]
pub struct RobotSnapshot {
    pub arm: Arm,
    pub chain: Arc<KinematicChain>,
    pub roles: JointRoles,

    /// Maximum change in velocity per iteration, chain ordered
    pub accel_max: DVector<f64>,

    pub positions: DVector<f64>,
    pub eef_position: Vector3<f64>,
    pub eef_orientation: Quaternion<f64>,

    /// The joint state message the positions were last updated from
    pub raw: JointState,

    pub seq: u64,

    /// Names of chain joints never seen in a joint state message
    pub unobserved: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Where the robot description is read from when an arm is selected.
#[derive(Debug, Clone)]
pub enum DescriptionSource {
    File(PathBuf),
    Xml(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StateTracker {
    /// Create a tracker reading the description from the URDF file named in the parameters.
    pub fn new(params: TrajExecParams) -> Result<Self, ChainBuildError> {
        let path = host::resolve_in_sw_root(&params.urdf_path)
            .map_err(|e| ChainBuildError::Description(format!(
                "cannot resolve {}: {}", params.urdf_path, e
            )))?;

        Ok(Self::with_source(params, DescriptionSource::File(path)))
    }

    pub fn with_source(params: TrajExecParams, source: DescriptionSource) -> Self {
        Self {
            params,
            source,
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    pub fn params(&self) -> &TrajExecParams {
        &self.params
    }

    /// Rebuild the kinematic chain for the given arm.
    ///
    /// The robot description is fetched again on every call. On failure no arm is selected and
    /// snapshots are unavailable until a later call succeeds.
    pub fn select_arm(&self, arm: Arm) -> Result<(), ChainBuildError> {
        match self.build_chain(arm) {
            Ok(chain) => {
                self.install_chain(arm, chain);
                Ok(())
            },
            Err(e) => {
                self.deselect();
                Err(e)
            }
        }
    }

    /// Build the chain for the given arm from the robot description without changing the
    /// selection.
    pub fn build_chain(&self, arm: Arm) -> Result<KinematicChain, ChainBuildError> {
        let robot = match self.source {
            DescriptionSource::File(ref path) => load_robot(path)?,
            DescriptionSource::Xml(ref xml) => parse_robot(xml)?,
        };

        KinematicChain::from_urdf(
            &robot,
            &self.params.base_frame,
            self.params.gripper_frame(arm),
            &self.params.limits
        )
    }

    /// Select the arm with a chain from [`StateTracker::build_chain`].
    pub fn install_chain(&self, arm: Arm, chain: KinematicChain) {
        let roles = JointRoles::resolve(&chain, &self.params);
        let accel_max = roles.accel_max(&chain, &self.params);

        let mut active = ActiveChain {
            arm,
            state: RobotState::new(chain.dof()),
            chain: Arc::new(chain),
            roles,
            accel_max,
        };

        let mut inner = self.inner.lock()
            .expect("StateTracker: inner mutex poisoned");

        // Seed from the latest message so the pose is available before the next one arrives
        if let Some(ref js) = inner.latest {
            active.update(js);
        }

        info!(
            "Selected {} arm, chain {} -> {} with {} joints",
            arm, active.chain.base_frame(), active.chain.tip_frame(), active.chain.dof()
        );

        inner.active = Some(active);
    }

    /// Drop the selected chain.
    pub fn deselect(&self) {
        self.inner.lock()
            .expect("StateTracker: inner mutex poisoned")
            .active = None;
    }

    /// Arm currently selected, if any.
    pub fn selected_arm(&self) -> Option<Arm> {
        self.inner.lock()
            .expect("StateTracker: inner mutex poisoned")
            .active.as_ref()
            .map(|a| a.arm)
    }

    /// Update the state from a joint state message.
    ///
    /// Joints are matched by name, names not in the chain are ignored and chain joints missing
    /// from the message keep their previous positions.
    pub fn on_joint_state(&self, js: &JointState) {
        let mut inner = self.inner.lock()
            .expect("StateTracker: inner mutex poisoned");

        inner.seq += 1;
        inner.latest = Some(js.clone());

        if let Some(ref mut active) = inner.active {
            active.update(js);
        }
    }

    /// Take a copy of the current state.
    ///
    /// Returns `None` if no arm is selected, no joint state has been received, or the
    /// end-effector pose has never been computed.
    pub fn snapshot(&self) -> Option<RobotSnapshot> {
        let inner = self.inner.lock()
            .expect("StateTracker: inner mutex poisoned");

        let active = inner.active.as_ref()?;
        let raw = inner.latest.as_ref()?;
        let eef = active.state.eef?;

        let unobserved = active.chain.joints().iter()
            .zip(active.state.observed.iter())
            .filter(|&(_, &o)| !o)
            .map(|(j, _)| j.name.clone())
            .collect();

        Some(RobotSnapshot {
            arm: active.arm,
            chain: active.chain.clone(),
            roles: active.roles.clone(),
            accel_max: active.accel_max.clone(),
            positions: active.state.positions.clone(),
            eef_position: eef.translation.vector,
            eef_orientation: rot_to_quat(eef.rotation.to_rotation_matrix().matrix()),
            raw: raw.clone(),
            seq: inner.seq,
            unobserved,
        })
    }
}

impl ActiveChain {
    /// Apply the chain joints in the message.
    ///
    /// Non-finite positions are skipped. The new positions are only kept if forward kinematics
    /// succeeds with them.
    fn update(&mut self, js: &JointState) {
        let mut positions = self.state.positions.clone();
        let mut updated = Vec::new();

        for (name, &pos) in js.names.iter().zip(js.positions.iter()) {
            let i = match self.chain.index_of(name) {
                Some(i) => i,
                None => continue
            };

            if !pos.is_finite() {
                warn!("Ignoring non-finite position {} for joint {}", pos, name);
                continue
            }

            positions[i] = pos;
            updated.push(i);
        }

        if updated.is_empty() {
            return
        }

        match self.chain.forward_kinematics(positions.as_slice()) {
            Ok(pose) => {
                self.state.positions = positions;
                for i in updated {
                    self.state.observed[i] = true;
                }
                self.state.eef = Some(pose);
            },
            Err(e) => warn!("Forward kinematics failed, keeping previous state: {}", e),
        }
    }
}

impl RobotState {
    fn new(dof: usize) -> Self {
        Self {
            positions: DVector::zeros(dof),
            observed: vec![false; dof],
            eef: None,
        }
    }
}

impl JointRoles {
    /// Find the role joints in the chain by name.
    pub fn resolve(chain: &KinematicChain, params: &TrajExecParams) -> Self {
        let find = |name: &str| {
            let idx = chain.index_of(name);
            if idx.is_none() {
                debug!("Role joint {} is not in the chain to {}", name, chain.tip_frame());
            }
            idx
        };

        let base_x = find(&params.roles.base_x);
        let base_y = find(&params.roles.base_y);
        let base_rot = find(&params.roles.base_rot);
        let torso = find(&params.roles.torso);

        let special = [base_x, base_y, base_rot, torso];
        let arm = (0..chain.dof())
            .filter(|i| !special.contains(&Some(*i)))
            .collect();

        Self {
            base_x,
            base_y,
            base_rot,
            torso,
            arm,
        }
    }

    /// Per joint maximum acceleration from the role of each joint.
    pub fn accel_max(&self, chain: &KinematicChain, params: &TrajExecParams) -> DVector<f64> {
        let accels = &params.max_accel;

        DVector::from_fn(chain.dof(), |i, _| {
            let i = Some(i);
            if i == self.base_x || i == self.base_y {
                accels.base
            }
            else if i == self.base_rot {
                accels.base_rot
            }
            else if i == self.torso {
                accels.torso
            }
            else {
                accels.arm
            }
        })
    }

    /// Whether the joint at chain index `i` belongs to the mobile base.
    pub fn is_base(&self, i: usize) -> bool {
        let i = Some(i);
        i == self.base_x || i == self.base_y || i == self.base_rot
    }
}

impl RobotSnapshot {
    /// End-effector pose as a wire message.
    pub fn eef_pose(&self) -> Pose {
        let q = &self.eef_orientation;

        Pose {
            position_m: [self.eef_position.x, self.eef_position.y, self.eef_position.z],
            orientation_q: [q.i, q.j, q.k, q.w],
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::DUAL_ARM_URDF;
    use approx::assert_abs_diff_eq;

    fn tracker() -> StateTracker {
        StateTracker::with_source(
            TrajExecParams::default(),
            DescriptionSource::Xml(DUAL_ARM_URDF.into())
        )
    }

    fn js(names: &[&str], positions: &[f64]) -> JointState {
        JointState::from_positions(
            names.iter().map(|s| s.to_string()).collect(),
            positions.to_vec()
        )
    }

    #[test]
    fn test_no_snapshot_without_state() {
        let t = tracker();
        assert!(t.snapshot().is_none());

        t.select_arm(Arm::Left).unwrap();
        assert!(t.snapshot().is_none());

        t.on_joint_state(&js(&["odom_x_joint"], &[0.0]));
        assert!(t.snapshot().is_some());
    }

    #[test]
    fn test_roles() {
        let t = tracker();
        t.select_arm(Arm::Right).unwrap();
        t.on_joint_state(&js(&[], &[]));
        t.on_joint_state(&js(&["odom_x_joint"], &[0.0]));

        let snap = t.snapshot().unwrap();

        assert_eq!(snap.roles.base_x, Some(0));
        assert_eq!(snap.roles.base_y, Some(1));
        assert_eq!(snap.roles.base_rot, Some(2));
        assert_eq!(snap.roles.torso, Some(3));
        assert_eq!(snap.roles.arm, (4..11).collect::<Vec<_>>());
        assert_eq!(snap.accel_max[0], 0.1);
        assert_eq!(snap.accel_max[3], 0.05);
        assert_eq!(snap.accel_max[10], 0.02);
        assert_eq!(snap.seq, 2);
        assert_eq!(snap.unobserved.len(), 10);
    }

    #[test]
    fn test_partial_and_reordered_joint_state() {
        let t = tracker();
        t.select_arm(Arm::Left).unwrap();

        // Unrelated and right arm joints are ignored, order doesn't matter
        t.on_joint_state(&js(
            &["right_arm_0_joint", "odom_y_joint", "unrelated", "odom_x_joint"],
            &[1.0, 0.2, 5.0, 0.3]
        ));

        // Partial update keeps the base positions
        t.on_joint_state(&js(&["triangle_base_joint"], &[0.1]));

        let snap = t.snapshot().unwrap();
        assert_eq!(snap.positions[0], 0.3);
        assert_eq!(snap.positions[1], 0.2);
        assert_eq!(snap.positions[3], 0.1);
        assert_abs_diff_eq!(snap.eef_position, Vector3::new(0.3, 0.2, 0.1), epsilon = 1e-12);
        assert_abs_diff_eq!(snap.eef_orientation.w, 1.0, epsilon = 1e-12);
        assert!(!snap.unobserved.contains(&"odom_x_joint".to_string()));
        assert!(snap.unobserved.contains(&"left_arm_3_joint".to_string()));
    }

    #[test]
    fn test_fk_failure_keeps_previous_pose() {
        let t = tracker();
        t.select_arm(Arm::Left).unwrap();
        t.on_joint_state(&js(&["odom_x_joint"], &[0.3]));
        t.on_joint_state(&js(&["odom_x_joint"], &[f64::NAN]));

        let snap = t.snapshot().unwrap();
        assert_abs_diff_eq!(snap.eef_position.x, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_sample_is_not_kept() {
        let t = tracker();
        t.select_arm(Arm::Left).unwrap();
        t.on_joint_state(&js(&["odom_x_joint"], &[0.0]));

        let names = t.snapshot().unwrap().chain.joint_names();
        t.on_joint_state(&JointState::from_positions(names.clone(), vec![0.0; names.len()]));

        t.on_joint_state(&js(&["left_arm_0_joint", "odom_y_joint"], &[f64::NAN, 0.02]));
        for k in 1..=5 {
            t.on_joint_state(&js(&["odom_x_joint"], &[0.01 * k as f64]));
        }

        let snap = t.snapshot().unwrap();
        assert!(snap.positions.iter().all(|p| p.is_finite()));
        assert!(snap.unobserved.is_empty());
        assert_abs_diff_eq!(snap.eef_position.x, 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(snap.eef_position.y, 0.02, epsilon = 1e-12);
        assert!(snap.chain.jacobian(snap.positions.as_slice()).is_ok());
    }

    #[test]
    fn test_select_arm_failure() {
        let mut params = TrajExecParams::default();
        params.right_gripper_frame = "missing_frame".into();
        let t = StateTracker::with_source(params, DescriptionSource::Xml(DUAL_ARM_URDF.into()));

        t.select_arm(Arm::Left).unwrap();
        t.on_joint_state(&js(&["odom_x_joint"], &[0.0]));
        assert!(t.snapshot().is_some());

        assert!(matches!(t.select_arm(Arm::Right), Err(ChainBuildError::NoPath { .. })));
        assert_eq!(t.selected_arm(), None);
        assert!(t.snapshot().is_none());

        // Left arm can be selected again, seeded from the latest state
        t.select_arm(Arm::Left).unwrap();
        assert!(t.snapshot().is_some());
    }
}
