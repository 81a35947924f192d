//! # Command Server
//!
//! Publishes joint velocity commands and clock pulses to the simulator or actuation layer.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    sim::{JointState, ProjectionClock, SimCommand},
};

use crate::cmd_emitter::{CommandSink, SinkError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CmdServer {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CmdServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the command: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the command: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdServer {
    /// Create a new instance of the command server.
    ///
    /// This function will not block until the simulator connects.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, CmdServerError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            SocketOptions::server(),
            &params.cmd_endpoint
        ).map_err(CmdServerError::SocketError)?;

        Ok(Self { socket })
    }

    /// Returns true if a subscriber has connected.
    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    pub fn send(&mut self, cmd: &SimCommand) -> Result<(), CmdServerError> {
        let cmd_string = serde_json::to_string(cmd)
            .map_err(CmdServerError::SerializationError)?;

        self.socket.send(&cmd_string, 0)
            .map_err(CmdServerError::SendError)
    }
}

impl CommandSink for CmdServer {
    fn send_velocity(&mut self, cmd: &JointState) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected)
        }

        self.send(&SimCommand::Velocity(cmd.clone()))
            .map_err(|e| SinkError::Transport(e.to_string()))
    }

    fn send_clock(&mut self, clock: &ProjectionClock) -> Result<(), SinkError> {
        self.send(&SimCommand::Clock(*clock))
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}
