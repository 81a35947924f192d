//! # Goal Server
//!
//! Reply socket accepting goal submissions, cancellations and status queries. Requests are
//! handled on a background thread so that goals can be cancelled while the control loop runs.
//! Every request gets exactly one [`GoalResponse`], including requests which can't be parsed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    thread::{self, JoinHandle},
};

use comms_if::{
    goal::{GoalRequestMsg, GoalResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{debug, error, info, warn};

use crate::{goal_mgr::GoalManager, state_tracker::StateTracker};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct GoalServer {
    bg_jh: Option<JoinHandle<()>>,
    bg_run: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GoalServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the response: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalServer {
    /// Bind the goal socket and start serving requests.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        goals: Arc<GoalManager>,
        tracker: Arc<StateTracker>
    ) -> Result<Self, GoalServerError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REP,
            SocketOptions::server(),
            &params.goal_endpoint
        ).map_err(GoalServerError::SocketError)?;

        let bg_run = Arc::new(AtomicBool::new(true));
        let bg_run_clone = bg_run.clone();

        let bg_jh = Some(thread::spawn(move || {
            bg_thread(socket, bg_run_clone, goals, tracker)
        }));

        Ok(Self { bg_jh, bg_run })
    }
}

impl Drop for GoalServer {
    fn drop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        if let Some(jh) = self.bg_jh.take() {
            jh.join().ok();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Handle a single request string, producing its response.
pub fn handle_request(
    request: &str,
    goals: &GoalManager,
    tracker: &StateTracker
) -> GoalResponse {
    let msg: GoalRequestMsg = match serde_json::from_str(request) {
        Ok(m) => m,
        Err(e) => {
            warn!("Could not parse goal request: {}", e);
            return GoalResponse::Invalid { reason: e.to_string() }
        }
    };

    debug!("Goal request: {:?}", msg);

    match msg {
        GoalRequestMsg::Submit(req) => match goals.submit(&req, tracker) {
            Ok(()) => GoalResponse::Accepted { goal_id: req.goal_id },
            Err(e) => {
                warn!("Goal {} rejected: {}", req.goal_id, e);
                GoalResponse::Rejected {
                    goal_id: req.goal_id,
                    reason: e.to_string(),
                }
            }
        },
        GoalRequestMsg::Cancel { goal_id } => match goals.cancel(&goal_id) {
            Ok(()) => {
                info!("Cancellation of goal {} accepted", goal_id);
                GoalResponse::CancelAccepted { goal_id }
            },
            Err(e) => GoalResponse::CancelRejected {
                goal_id,
                reason: e.to_string(),
            }
        },
        GoalRequestMsg::Status => {
            let status = goals.status();
            GoalResponse::Status {
                state: status.state,
                goal_id: status.goal_id,
                cancel_requested: status.cancel_requested,
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Background thread, replies to each request as it arrives.
fn bg_thread(
    socket: MonitoredSocket,
    run: Arc<AtomicBool>,
    goals: Arc<GoalManager>,
    tracker: Arc<StateTracker>
) {
    while run.load(Ordering::Relaxed) {
        let response = match socket.recv_string(0) {
            Ok(Ok(s)) => handle_request(&s, &goals, &tracker),
            Ok(Err(_)) => {
                warn!("Non UTF-8 goal request");
                GoalResponse::Invalid { reason: "request is not valid UTF-8".into() }
            },
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving goal request: {:?}", e);
                break
            }
        };

        if let Err(e) = send_response(&socket, &response) {
            error!("Could not send goal response: {}", e);
        }
    }
}

fn send_response(socket: &MonitoredSocket, response: &GoalResponse) -> Result<(), GoalServerError> {
    let response_str = serde_json::to_string(response)
        .map_err(GoalServerError::SerializationError)?;

    socket.send(&response_str, 0)
        .map_err(GoalServerError::SendError)
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
    use comms_if::goal::{Arm, GoalRequest, LifecycleState, TargetPose};

    fn setup() -> (GoalManager, StateTracker) {
        (
            GoalManager::new("odom"),
            StateTracker::with_source(
                TrajExecParams::default(),
                DescriptionSource::Xml(DUAL_ARM_URDF.into())
            )
        )
    }

    fn submit(goal_id: &str) -> String {
        serde_json::to_string(&GoalRequestMsg::Submit(GoalRequest {
            goal_id: goal_id.into(),
            target_pose: TargetPose {
                frame: "odom".into(),
                translation_m: [0.5, 1.2, 0.0],
                rotation_q: [0.0, 0.0, 0.0, 1.0],
            },
            arm: Arm::Left,
        })).unwrap()
    }

    #[test]
    fn test_requests() {
        let (goals, tracker) = setup();

        assert_eq!(
            handle_request(&submit("a"), &goals, &tracker),
            GoalResponse::Accepted { goal_id: "a".into() }
        );
        assert!(matches!(
            handle_request(&submit("b"), &goals, &tracker),
            GoalResponse::Rejected { .. }
        ));

        let cancel = serde_json::to_string(&GoalRequestMsg::Cancel { goal_id: "a".into() })
            .unwrap();
        assert_eq!(
            handle_request(&cancel, &goals, &tracker),
            GoalResponse::CancelAccepted { goal_id: "a".into() }
        );

        let status = serde_json::to_string(&GoalRequestMsg::Status).unwrap();
        assert_eq!(
            handle_request(&status, &goals, &tracker),
            GoalResponse::Status {
                state: LifecycleState::Received,
                goal_id: Some("a".into()),
                cancel_requested: true,
            }
        );
    }

    #[test]
    fn test_invalid_request() {
        let (goals, tracker) = setup();

        assert!(matches!(
            handle_request("{\"Launch\": 3}", &goals, &tracker),
            GoalResponse::Invalid { .. }
        ));
        assert!(matches!(
            handle_request(
                &serde_json::to_string(&GoalRequestMsg::Cancel { goal_id: "x".into() }).unwrap(),
                &goals,
                &tracker
            ),
            GoalResponse::CancelRejected { .. }
        ));
    }
}
