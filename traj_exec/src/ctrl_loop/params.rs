//! Parameters structure for CtrlLoop

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    /// Largest position error on any axis at which the goal is reached.
    ///
    /// Units: meters
    pub pos_tolerance_m: f64,

    /// Largest orientation error on any axis at which the goal is reached.
    ///
    /// Units: radians
    pub orient_tolerance_rad: f64,

    /// Number of published commands after which an unconverged goal is aborted
    pub max_iterations: u64,

    /// Bound on the solver's internal iterations per solve
    pub max_solver_iterations: u32,

    /// Number of consecutive failed iterations after which the goal is aborted
    pub max_consecutive_solver_failures: u32,

    /// Period of the clock pulse sent with each command.
    ///
    /// Units: seconds
    pub clock_period_s: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            pos_tolerance_m: 0.03,
            orient_tolerance_rad: 0.07,
            max_iterations: 1000,
            max_solver_iterations: 100,
            max_consecutive_solver_failures: 5,
            clock_period_s: 0.01,
        }
    }
}
