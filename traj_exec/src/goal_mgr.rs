//! # Goal lifecycle manager
//!
//! Single owner of the goal state machine:
//!
//! ```text
//! Idle -> Received -> Executing -> Idle
//! ```
//!
//! Goals are submitted and cancelled from the goal server thread, and taken for execution and
//! finished by the control loop. All transitions happen under one lock. A goal submitted while
//! another is received or executing is rejected.
//!
//! Cancellation only records a request, the control loop observes it at the next iteration
//! boundary and reports the terminal result.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Mutex;

use comms_if::{
    goal::{Arm, GoalFeedback, GoalRequest, GoalResult, GoalStatus, LifecycleState},
    traj::PoseArray,
};
use log::{info, warn};
use nalgebra::{Quaternion, Vector3};

use crate::{
    kin_chain::{ChainBuildError, KinematicChain},
    state_tracker::StateTracker,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Quaternions with a norm below this are rejected.
const MIN_QUAT_NORM: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Receiver of the observable side effects of goal execution.
pub trait GoalReporter {
    /// Report feedback for one control iteration.
    fn report_feedback(&mut self, feedback: &GoalFeedback);

    /// Report the terminal result of a goal, called exactly once per goal.
    fn report_result(&mut self, result: &GoalResult);

    /// Report the end-effector poses recorded for a goal.
    fn report_pose_trajectory(&mut self, goal_id: &str, poses: &PoseArray);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct GoalManager {
    base_frame: String,
    lifecycle: Mutex<Lifecycle>,
}

/// A validated goal.
#[derive(Debug, Clone)]
pub struct ActiveGoal {
    pub goal_id: String,
    pub arm: Arm,

    /// Target position in the base frame.
    ///
    /// Units: meters
    pub position: Vector3<f64>,

    /// Normalised target orientation in the base frame
    pub orientation: Quaternion<f64>,
}

/// The state of the lifecycle as seen from outside.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub goal_id: Option<String>,
    pub cancel_requested: bool,
}

/// Goal reporter which keeps everything reported to it.
#[derive(Debug, Default)]
pub struct ReportLog {
    pub feedback: Vec<GoalFeedback>,
    pub results: Vec<GoalResult>,
    pub pose_trajectories: Vec<(String, PoseArray)>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum Lifecycle {
    Idle,
    Received {
        goal: ActiveGoal,
        cancel_requested: bool,
    },
    Executing {
        goal_id: String,
        cancel_requested: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid goal: {0}")]
    InvalidGoal(String),

    #[error("Goal {0} is already active")]
    GoalActive(String),

    #[error("Could not build the kinematic chain: {0}")]
    ChainBuild(#[from] ChainBuildError),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CancelError {
    #[error("There is no active goal")]
    NoActiveGoal,

    #[error("Goal {requested} is not the active goal ({active})")]
    UnknownGoal { requested: String, active: String },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FinishError {
    #[error("Goal {0} is not executing")]
    NotExecuting(String),

    #[error("Status {0:?} is not a terminal status")]
    NotTerminal(GoalStatus),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalManager {
    /// Create a new manager, goals must be expressed in `base_frame`.
    pub fn new(base_frame: &str) -> Self {
        Self {
            base_frame: base_frame.into(),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Submit a new goal.
    ///
    /// The goal is validated and the kinematic chain for the requested arm built without holding
    /// the lifecycle lock, the chain is only installed in the tracker if no other goal became
    /// active meanwhile. On any error the lifecycle state is unchanged.
    pub fn submit(&self, req: &GoalRequest, tracker: &StateTracker) -> Result<(), SubmitError> {
        if let Some(active_id) = self.status().goal_id {
            warn!("Rejecting goal {}, goal {} is active", req.goal_id, active_id);
            return Err(SubmitError::GoalActive(active_id))
        }

        let goal = self.validate(req)
            .map_err(|e| {
                warn!("Rejecting goal {}: {}", req.goal_id, e);
                e
            })?;

        let chain = tracker.build_chain(goal.arm);

        self.accept(goal, chain, tracker)
    }

    /// Move to `Received` with the given goal and chain if the lifecycle is still idle.
    fn accept(
        &self,
        goal: ActiveGoal,
        chain: Result<KinematicChain, ChainBuildError>,
        tracker: &StateTracker
    ) -> Result<(), SubmitError> {
        let mut lifecycle = self.lifecycle.lock()
            .expect("GoalManager: lifecycle mutex poisoned");

        if let Some(active_id) = lifecycle.goal_id() {
            warn!("Rejecting goal {}, goal {} is active", goal.goal_id, active_id);
            return Err(SubmitError::GoalActive(active_id.into()))
        }

        let chain = match chain {
            Ok(c) => c,
            Err(e) => {
                warn!("Rejecting goal {}: {}", goal.goal_id, e);
                tracker.deselect();
                return Err(SubmitError::ChainBuild(e))
            }
        };

        tracker.install_chain(goal.arm, chain);

        info!(
            "Goal {} accepted: {} arm to [{:.3}, {:.3}, {:.3}]",
            goal.goal_id, goal.arm, goal.position.x, goal.position.y, goal.position.z
        );

        *lifecycle = Lifecycle::Received {
            goal,
            cancel_requested: false,
        };

        Ok(())
    }

    /// Take the received goal for execution, moving it to `Executing`.
    pub fn take_received(&self) -> Option<ActiveGoal> {
        let mut lifecycle = self.lifecycle.lock()
            .expect("GoalManager: lifecycle mutex poisoned");

        match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
            Lifecycle::Received { goal, cancel_requested } => {
                *lifecycle = Lifecycle::Executing {
                    goal_id: goal.goal_id.clone(),
                    cancel_requested,
                };
                Some(goal)
            },
            other => {
                *lifecycle = other;
                None
            }
        }
    }

    /// Request cancellation of the given goal.
    ///
    /// Does not wait for the control loop, the terminal result is reported when the loop next
    /// checks for cancellation. Cancelling a goal twice is accepted.
    pub fn cancel(&self, goal_id: &str) -> Result<(), CancelError> {
        let mut lifecycle = self.lifecycle.lock()
            .expect("GoalManager: lifecycle mutex poisoned");

        let (active_id, flag) = match *lifecycle {
            Lifecycle::Idle => return Err(CancelError::NoActiveGoal),
            Lifecycle::Received { ref goal, ref mut cancel_requested } => 
                (&goal.goal_id, cancel_requested),
            Lifecycle::Executing { ref goal_id, ref mut cancel_requested } => 
                (goal_id, cancel_requested),
        };

        if active_id != goal_id {
            return Err(CancelError::UnknownGoal {
                requested: goal_id.into(),
                active: active_id.clone(),
            })
        }

        if !*flag {
            warn!("Cancellation of goal {} requested", goal_id);
        }
        *flag = true;

        Ok(())
    }

    /// Returns true if cancellation of the given goal has been requested.
    pub fn is_cancel_requested(&self, goal_id: &str) -> bool {
        let lifecycle = self.lifecycle.lock()
            .expect("GoalManager: lifecycle mutex poisoned");

        match *lifecycle {
            Lifecycle::Received { ref goal, cancel_requested } => 
                cancel_requested && goal.goal_id == goal_id,
            Lifecycle::Executing { goal_id: ref id, cancel_requested } => 
                cancel_requested && id == goal_id,
            Lifecycle::Idle => false,
        }
    }

    /// Terminate the executing goal, returning to `Idle`.
    ///
    /// Succeeds once per goal, so a second call for the same goal is an error.
    pub fn finish(&self, goal_id: &str, status: GoalStatus) -> Result<(), FinishError> {
        if !status.is_terminal() {
            return Err(FinishError::NotTerminal(status))
        }

        let mut lifecycle = self.lifecycle.lock()
            .expect("GoalManager: lifecycle mutex poisoned");

        match *lifecycle {
            Lifecycle::Executing { goal_id: ref id, .. } if id == goal_id => (),
            _ => return Err(FinishError::NotExecuting(goal_id.into()))
        }

        info!("Goal {} finished: {:?}", goal_id, status);
        *lifecycle = Lifecycle::Idle;

        Ok(())
    }

    pub fn status(&self) -> LifecycleStatus {
        let lifecycle = self.lifecycle.lock()
            .expect("GoalManager: lifecycle mutex poisoned");

        let (state, cancel_requested) = match *lifecycle {
            Lifecycle::Idle => (LifecycleState::Idle, false),
            Lifecycle::Received { cancel_requested, .. } => 
                (LifecycleState::Received, cancel_requested),
            Lifecycle::Executing { cancel_requested, .. } => 
                (LifecycleState::Executing, cancel_requested),
        };

        LifecycleStatus {
            state,
            goal_id: lifecycle.goal_id().map(String::from),
            cancel_requested,
        }
    }

    fn validate(&self, req: &GoalRequest) -> Result<ActiveGoal, SubmitError> {
        let invalid = |s: String| Err(SubmitError::InvalidGoal(s));

        if req.goal_id.trim().is_empty() {
            return invalid("the goal id is empty".into())
        }

        let frame = &req.target_pose.frame;
        if !frame.is_empty() && *frame != self.base_frame {
            return invalid(format!(
                "target frame {} is not the base frame {}", frame, self.base_frame
            ))
        }

        let t = req.target_pose.translation_m;
        if t.iter().any(|v| !v.is_finite()) {
            return invalid(format!("translation {:?} is not finite", t))
        }

        let r = req.target_pose.rotation_q;
        let q = Quaternion::new(r[3], r[0], r[1], r[2]);
        if r.iter().any(|v| !v.is_finite()) || q.norm() < MIN_QUAT_NORM {
            return invalid(format!("rotation {:?} is not a valid quaternion", r))
        }

        Ok(ActiveGoal {
            goal_id: req.goal_id.clone(),
            arm: req.arm,
            position: Vector3::new(t[0], t[1], t[2]),
            orientation: q.normalize(),
        })
    }
}

impl Lifecycle {
    fn goal_id(&self) -> Option<&str> {
        match self {
            Lifecycle::Idle => None,
            Lifecycle::Received { goal, .. } => Some(&goal.goal_id),
            Lifecycle::Executing { goal_id, .. } => Some(goal_id),
        }
    }
}

impl GoalReporter for ReportLog {
    fn report_feedback(&mut self, feedback: &GoalFeedback) {
        self.feedback.push(feedback.clone());
    }

    fn report_result(&mut self, result: &GoalResult) {
        self.results.push(result.clone());
    }

    fn report_pose_trajectory(&mut self, goal_id: &str, poses: &PoseArray) {
        self.pose_trajectories.push((goal_id.into(), poses.clone()));
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        params::TrajExecParams,
        sim::DUAL_ARM_URDF,
        state_tracker::DescriptionSource,
    };
    use comms_if::goal::TargetPose;

    fn tracker() -> StateTracker {
        StateTracker::with_source(
            TrajExecParams::default(),
            DescriptionSource::Xml(DUAL_ARM_URDF.into())
        )
    }

    fn request(goal_id: &str) -> GoalRequest {
        GoalRequest {
            goal_id: goal_id.into(),
            target_pose: TargetPose {
                frame: "".into(),
                translation_m: [0.5, 1.2, 0.0],
                rotation_q: [0.0, 0.0, 0.0, 2.0],
            },
            arm: Arm::Left,
        }
    }

    #[test]
    fn test_lifecycle() {
        let mgr = GoalManager::new("odom");
        let t = tracker();

        assert_eq!(mgr.status().state, LifecycleState::Idle);
        assert!(mgr.take_received().is_none());

        mgr.submit(&request("g1"), &t).unwrap();
        assert_eq!(mgr.status(), LifecycleStatus {
            state: LifecycleState::Received,
            goal_id: Some("g1".into()),
            cancel_requested: false,
        });
        assert_eq!(t.selected_arm(), Some(Arm::Left));

        let goal = mgr.take_received().unwrap();
        assert_eq!(goal.goal_id, "g1");
        assert_eq!(goal.orientation, Quaternion::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(mgr.status().state, LifecycleState::Executing);
        assert!(mgr.take_received().is_none());

        mgr.finish("g1", GoalStatus::Succeeded).unwrap();
        assert_eq!(mgr.status().state, LifecycleState::Idle);
        assert_eq!(
            mgr.finish("g1", GoalStatus::Succeeded),
            Err(FinishError::NotExecuting("g1".into()))
        );
    }

    #[test]
    fn test_second_goal_rejected() {
        let mgr = GoalManager::new("odom");
        let t = tracker();

        mgr.submit(&request("g1"), &t).unwrap();
        assert!(matches!(
            mgr.submit(&request("g2"), &t), 
            Err(SubmitError::GoalActive(ref id)) if id == "g1"
        ));

        mgr.take_received().unwrap();
        assert!(matches!(mgr.submit(&request("g2"), &t), Err(SubmitError::GoalActive(_))));

        // The first goal is unaffected
        assert_eq!(mgr.status().goal_id, Some("g1".into()));
        assert!(!mgr.is_cancel_requested("g1"));

        mgr.finish("g1", GoalStatus::Aborted).unwrap();
        mgr.submit(&request("g2"), &t).unwrap();
    }

    #[test]
    fn test_goal_accepted_during_chain_build_wins() {
        let mgr = GoalManager::new("odom");
        let t = tracker();

        // A right arm goal built its chain, but a left arm goal was accepted first
        let right = mgr.validate(&GoalRequest { arm: Arm::Right, ..request("g2") }).unwrap();
        let right_chain = t.build_chain(Arm::Right);
        mgr.submit(&request("g1"), &t).unwrap();

        assert!(matches!(
            mgr.accept(right, right_chain, &t),
            Err(SubmitError::GoalActive(ref id)) if id == "g1"
        ));
        assert_eq!(t.selected_arm(), Some(Arm::Left));
        assert_eq!(mgr.status().goal_id, Some("g1".into()));
    }

    #[test]
    fn test_invalid_goals() {
        let mgr = GoalManager::new("odom");
        let t = tracker();

        let mut r = request(" ");
        assert!(matches!(mgr.submit(&r, &t), Err(SubmitError::InvalidGoal(_))));

        r = request("g");
        r.target_pose.rotation_q = [0.0; 4];
        assert!(matches!(mgr.submit(&r, &t), Err(SubmitError::InvalidGoal(_))));

        r = request("g");
        r.target_pose.translation_m[1] = f64::INFINITY;
        assert!(matches!(mgr.submit(&r, &t), Err(SubmitError::InvalidGoal(_))));

        r = request("g");
        r.target_pose.frame = "map".into();
        assert!(matches!(mgr.submit(&r, &t), Err(SubmitError::InvalidGoal(_))));

        r = request("g");
        r.target_pose.frame = "odom".into();
        mgr.submit(&r, &t).unwrap();
    }

    #[test]
    fn test_chain_build_failure_rejects_goal() {
        let mut params = TrajExecParams::default();
        params.left_gripper_frame = "no_such_frame".into();
        let t = StateTracker::with_source(params, DescriptionSource::Xml(DUAL_ARM_URDF.into()));
        let mgr = GoalManager::new("odom");

        assert!(matches!(mgr.submit(&request("g1"), &t), Err(SubmitError::ChainBuild(_))));
        assert_eq!(mgr.status().state, LifecycleState::Idle);
    }

    #[test]
    fn test_cancel() {
        let mgr = GoalManager::new("odom");
        let t = tracker();

        assert_eq!(mgr.cancel("g1"), Err(CancelError::NoActiveGoal));

        mgr.submit(&request("g1"), &t).unwrap();
        assert_eq!(mgr.cancel("other"), Err(CancelError::UnknownGoal {
            requested: "other".into(),
            active: "g1".into(),
        }));
        assert!(!mgr.is_cancel_requested("g1"));

        // Cancelling before execution carries over to execution
        mgr.cancel("g1").unwrap();
        mgr.take_received().unwrap();
        assert!(mgr.is_cancel_requested("g1"));
        assert!(mgr.status().cancel_requested);

        // Idempotent
        mgr.cancel("g1").unwrap();
        assert!(!mgr.is_cancel_requested("other"));

        mgr.finish("g1", GoalStatus::Cancelled).unwrap();
        assert!(!mgr.is_cancel_requested("g1"));
        assert_eq!(
            mgr.finish("g1", GoalStatus::Active),
            Err(FinishError::NotTerminal(GoalStatus::Active))
        );
    }
}
