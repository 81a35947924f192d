//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Goal action messages exchanged with the goal requester
pub mod goal;

/// Joint state, velocity command and clock messages exchanged with the simulator
pub mod sim;

/// End-effector pose trajectory messages
pub mod traj;

/// Network module
pub mod net;
