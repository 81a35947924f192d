//! # Goal action messages
//!
//! A goal requester submits `GoalRequest`s and cancellations to the trajectory generator over a
//! request/reply socket, and receives `Telemetry` (feedback, results and pose trajectories) over a
//! publish/subscribe socket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use structopt::{clap::AppSettings, StructOpt};
use thiserror::Error;

use crate::{sim::JointState, traj::PoseArray};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Target pose of the end-effector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPose {
    /// Frame the pose is expressed in. Empty means the controller's base frame.
    #[serde(default)]
    pub frame: String,

    /// Target position.
    ///
    /// Units: meters
    pub translation_m: [f64; 3],

    /// Target orientation quaternion, ordered `[x, y, z, w]`. Need not be normalised.
    pub rotation_q: [f64; 4],
}

/// A request to move the end-effector of one arm to a target pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRequest {
    /// Identifier chosen by the requester
    pub goal_id: String,

    /// The pose to reach
    pub target_pose: TargetPose,

    /// The arm whose gripper should reach the pose
    pub arm: Arm,
}

/// Feedback streamed once per control iteration while a goal executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalFeedback {
    pub goal_id: String,

    pub status: GoalStatus,

    /// Human readable status text
    pub text: String,

    /// Control iteration this feedback was produced on
    pub iteration: u64,

    /// The joint state recorded on this iteration
    pub last_sample: JointState,
}

/// The single terminal result of a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalResult {
    pub goal_id: String,

    /// One of `Succeeded`, `Aborted` or `Cancelled`
    pub status: GoalStatus,

    /// Why the goal did not succeed
    pub reason: Option<String>,

    /// Joint states recorded while executing the goal, first sample is the initial state
    pub trajectory: Vec<JointState>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Arm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    Left,
    Right,
}

/// Request messages accepted by the goal server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GoalRequestMsg {
    /// Submit a new goal
    Submit(GoalRequest),

    /// Request cancellation of the given goal
    Cancel { goal_id: String },

    /// Query the goal lifecycle state
    Status,
}

/// Responses sent by the goal server, one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GoalResponse {
    Accepted { goal_id: String },

    Rejected { goal_id: String, reason: String },

    /// Cancellation recorded, the terminal result follows on the telemetry stream
    CancelAccepted { goal_id: String },

    CancelRejected { goal_id: String, reason: String },

    Status {
        state: LifecycleState,
        goal_id: Option<String>,
        cancel_requested: bool,
    },

    /// The request could not be parsed
    Invalid { reason: String },
}

/// State of the goal lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    Received,
    Executing,
}

/// Status of a goal as seen by the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalStatus {
    Active,
    Succeeded,
    Aborted,
    Cancelled,
}

/// Packets published on the telemetry socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Telemetry {
    Feedback(GoalFeedback),

    Result(GoalResult),

    /// All end-effector poses recorded for a goal, published once when it terminates
    PoseTrajectory { goal_id: String, poses: PoseArray },
}

/// Commands typed into the goal command line.
#[derive(Debug, Clone, StructOpt)]
pub enum GoalCmd {
    /// Submit a goal for one arm.
    #[structopt(name = "goal", setting = AppSettings::AllowNegativeNumbers)]
    Goal {
        goal_id: String,

        /// `left` or `right`
        arm: Arm,

        x_m: f64,
        y_m: f64,
        z_m: f64,

        #[structopt(default_value = "0")]
        qx: f64,
        #[structopt(default_value = "0")]
        qy: f64,
        #[structopt(default_value = "0")]
        qz: f64,
        #[structopt(default_value = "1")]
        qw: f64,

        /// Frame the pose is expressed in, defaults to the controller's base frame
        #[structopt(long, default_value = "")]
        frame: String,
    },

    /// Cancel a goal.
    #[structopt(name = "cancel")]
    Cancel { goal_id: String },

    /// Show the goal lifecycle state.
    #[structopt(name = "status")]
    Status,
}

#[derive(Debug, Error)]
#[error("Expected `left` or `right`, found `{0}`")]
pub struct ArmParseError(String);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl std::str::FromStr for Arm {
    type Err = ArmParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" | "l" => Ok(Arm::Left),
            "right" | "r" => Ok(Arm::Right),
            _ => Err(ArmParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arm::Left => write!(f, "left"),
            Arm::Right => write!(f, "right"),
        }
    }
}

impl From<GoalCmd> for GoalRequestMsg {
    fn from(cmd: GoalCmd) -> Self {
        match cmd {
            GoalCmd::Goal { goal_id, arm, x_m, y_m, z_m, qx, qy, qz, qw, frame } => {
                GoalRequestMsg::Submit(GoalRequest {
                    goal_id,
                    target_pose: TargetPose {
                        frame,
                        translation_m: [x_m, y_m, z_m],
                        rotation_q: [qx, qy, qz, qw],
                    },
                    arm,
                })
            }
            GoalCmd::Cancel { goal_id } => GoalRequestMsg::Cancel { goal_id },
            GoalCmd::Status => GoalRequestMsg::Status,
        }
    }
}

impl GoalStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GoalStatus::Active)
    }
}
