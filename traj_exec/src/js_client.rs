//! # Joint State Client
//!
//! Subscribes to the joint state stream and forwards every message to the state tracker from a
//! background thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, atomic::{AtomicBool, AtomicU64, Ordering}},
    thread::{self, JoinHandle},
};

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    sim::JointState,
};
use log::{error, warn};

use crate::state_tracker::StateTracker;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct JointStateClient {
    bg_jh: Option<JoinHandle<()>>,
    bg_run: Arc<AtomicBool>,
    num_received: Arc<AtomicU64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum JointStateClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JointStateClient {
    /// Connect to the joint state publisher.
    ///
    /// This function will not block until the publisher is available.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        tracker: Arc<StateTracker>
    ) -> Result<Self, JointStateClientError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions::client(),
            &params.joint_state_endpoint
        ).map_err(JointStateClientError::SocketError)?;

        let bg_run = Arc::new(AtomicBool::new(true));
        let num_received = Arc::new(AtomicU64::new(0));

        let bg_run_clone = bg_run.clone();
        let num_received_clone = num_received.clone();

        let bg_jh = Some(thread::spawn(move || {
            bg_thread(socket, bg_run_clone, num_received_clone, tracker)
        }));

        Ok(Self {
            bg_jh,
            bg_run,
            num_received,
        })
    }

    /// Number of joint states received so far.
    pub fn num_received(&self) -> u64 {
        self.num_received.load(Ordering::Relaxed)
    }
}

impl Drop for JointStateClient {
    fn drop(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        if let Some(jh) = self.bg_jh.take() {
            jh.join().ok();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Background thread, updates the tracker whenever the publisher sends a new state.
fn bg_thread(
    socket: MonitoredSocket,
    run: Arc<AtomicBool>,
    num_received: Arc<AtomicU64>,
    tracker: Arc<StateTracker>
) {
    while run.load(Ordering::Relaxed) {
        let msg = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 joint state message");
                continue
            },
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving joint state: {:?}", e);
                break
            }
        };

        let js: JointState = match serde_json::from_str(&msg) {
            Ok(js) => js,
            Err(e) => {
                warn!("Error deserialising joint state: {:?}", e);
                continue
            }
        };

        tracker.on_joint_state(&js);
        num_received.fetch_add(1, Ordering::Relaxed);
    }
}
