//! # QP solver
//!
//! Boundary to the convex QP solver. Problems are stated in the bounded form
//!
//! ```text
//! min 1/2 z' H z + g' z
//! s.t. lb  <= z   <= ub
//!      lbA <= A z <= ubA
//! ```
//!
//! where rows with `lbA == ubA` are equalities and infinite bounds are absent. A solver is
//! initialised fresh for every problem.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod clarabel_solver;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

pub use self::clarabel_solver::ClarabelSolver;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait QpSolver {
    /// Solve the problem, returning the primal solution.
    ///
    /// `max_iter` bounds the number of internal solver iterations (working set recalculations for
    /// active set solvers).
    fn solve(&mut self, problem: &QpProblem, max_iter: u32) -> Result<DVector<f64>, SolverFailure>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Objective weight matrix, `n x n`
    pub h: DMatrix<f64>,

    /// Objective linear term, `n`
    pub g: DVector<f64>,

    /// Constraint matrix, `m x n`
    pub a: DMatrix<f64>,

    /// Decision variable bounds, `n`
    pub lb: DVector<f64>,
    pub ub: DVector<f64>,

    /// Constraint row bounds, `m`
    pub lba: DVector<f64>,
    pub uba: DVector<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SolverFailure {
    #[error("Problem dimensions are inconsistent: {0}")]
    DimensionMismatch(String),

    #[error("Could not set up the solver: {0}")]
    Setup(String),

    #[error("Solver did not find a solution: {0}")]
    NotSolved(String),

    #[error("Solver returned a non-finite solution")]
    NonFiniteSolution,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl QpProblem {
    /// Number of decision variables.
    pub fn num_vars(&self) -> usize {
        self.h.ncols()
    }

    /// Number of constraint rows.
    pub fn num_constraints(&self) -> usize {
        self.a.nrows()
    }

    /// Check all dimensions agree.
    pub fn check_dims(&self) -> Result<(), SolverFailure> {
        let n = self.num_vars();
        let m = self.num_constraints();

        let checks = [
            ("H rows", self.h.nrows(), n),
            ("g", self.g.len(), n),
            ("A cols", self.a.ncols(), n),
            ("lb", self.lb.len(), n),
            ("ub", self.ub.len(), n),
            ("lbA", self.lba.len(), m),
            ("ubA", self.uba.len(), m),
        ];

        for (name, actual, expected) in checks.iter() {
            if actual != expected {
                return Err(SolverFailure::DimensionMismatch(format!(
                    "{} has length {}, expected {}", name, actual, expected
                )))
            }
        }

        Ok(())
    }
}
