//! # Trajectory generation library.
//!
//! This library allows the executables in the workspace to access items defined inside the
//! trajectory executable crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command emitter - maps QP solutions onto named joint velocity commands
pub mod cmd_emitter;

/// Command server - publishes velocity commands and clock pulses to the simulator
pub mod cmd_server;

/// Control loop driver - runs each goal from reception to its terminal result
pub mod ctrl_loop;

/// Goal lifecycle manager - accepts, cancels and finishes goals
pub mod goal_mgr;

/// Goal server - receives goal requests from the goal requester
pub mod goal_server;

/// Joint state client - feeds the joint state stream into the state tracker
pub mod js_client;

/// Kinematic chains built from the robot description
pub mod kin_chain;

/// Parameters shared by the trajectory executable's modules
pub mod params;

/// QP formulation - builds the per-iteration QP with adaptive weighting
pub mod qp_form;

/// QP solver boundary and the Clarabel backed solver
pub mod qp_solver;

/// Naive kinematics simulator
pub mod sim;

/// Robot state tracker - active kinematic chain and latest joint positions
pub mod state_tracker;

/// Telemetry server - publishes goal feedback and results
pub mod tm_server;
