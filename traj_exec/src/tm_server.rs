//! # TM Server
//!
//! Publishes goal feedback, results and pose trajectories to any subscribed goal requester.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    goal::{GoalFeedback, GoalResult, Telemetry},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    traj::PoseArray,
};
use log::warn;

use crate::goal_mgr::GoalReporter;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telemetry server
pub struct TmServer {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TmServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send telemetry: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the telemetry: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TmServer {
    /// Create a new instance of the TM Server.
    ///
    /// This function will not block until a subscriber connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, TmServerError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            SocketOptions::server(),
            &params.tm_endpoint
        ).map_err(TmServerError::SocketError)?;

        Ok(Self { socket })
    }

    pub fn send(&mut self, packet: &Telemetry) -> Result<(), TmServerError> {
        let packet_string = serde_json::to_string(packet)
            .map_err(TmServerError::SerializationError)?;

        self.socket.send(&packet_string, 0)
            .map_err(TmServerError::SendError)
    }

    fn send_or_warn(&mut self, packet: Telemetry) {
        if let Err(e) = self.send(&packet) {
            warn!("Could not publish telemetry: {}", e);
        }
    }
}

impl GoalReporter for TmServer {
    fn report_feedback(&mut self, feedback: &GoalFeedback) {
        self.send_or_warn(Telemetry::Feedback(feedback.clone()));
    }

    fn report_result(&mut self, result: &GoalResult) {
        self.send_or_warn(Telemetry::Result(result.clone()));
    }

    fn report_pose_trajectory(&mut self, goal_id: &str, poses: &PoseArray) {
        self.send_or_warn(Telemetry::PoseTrajectory {
            goal_id: goal_id.into(),
            poses: poses.clone(),
        });
    }
}
