//! QP solver backed by the Clarabel interior point solver

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use log::trace;
use nalgebra::{DMatrix, DVector};

use super::{QpProblem, QpSolver, SolverFailure};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Entries smaller than this are left out of sparse matrices.
const SPARSE_EPS: f64 = 1e-15;

/// Solver gap and feasibility tolerance.
const TOLERANCE: f64 = 1e-7;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct ClarabelSolver;

/// A problem in Clarabel's conic form `min 1/2 z'Pz + q'z, Az + s = b, s in K`.
struct ConicForm {
    a: DMatrix<f64>,
    b: Vec<f64>,
    n_eq: usize,
    n_ineq: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl QpSolver for ClarabelSolver {
    fn solve(&mut self, problem: &QpProblem, max_iter: u32) -> Result<DVector<f64>, SolverFailure> {
        problem.check_dims()?;

        let n = problem.num_vars();
        let conic = ConicForm::from_problem(problem);

        let p_csc = to_csc(&problem.h, Triangle::Upper);
        let a_csc = to_csc(&conic.a, Triangle::Full);
        let q: Vec<f64> = problem.g.iter().copied().collect();

        // Zero sized cones are not accepted
        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if conic.n_eq > 0 {
            cones.push(ZeroConeT(conic.n_eq));
        }
        if conic.n_ineq > 0 {
            cones.push(NonnegativeConeT(conic.n_ineq));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(max_iter)
            .verbose(false)
            .tol_gap_abs(TOLERANCE)
            .tol_gap_rel(TOLERANCE)
            .tol_feas(TOLERANCE)
            .build()
            .map_err(|e| SolverFailure::Setup(format!("{:?}", e)))?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &conic.b, &cones, settings)
            .map_err(|e| SolverFailure::Setup(format!("{:?}", e)))?;

        solver.solve();

        let solution = &solver.solution;
        trace!(
            "Clarabel finished in {} iterations with status {:?}", 
            solution.iterations, 
            solution.status
        );

        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => (),
            ref s => return Err(SolverFailure::NotSolved(format!("{:?}", s)))
        }

        let z = DVector::from_column_slice(&solution.x[..n]);

        if z.iter().any(|v| !v.is_finite()) {
            return Err(SolverFailure::NonFiniteSolution)
        }

        Ok(z)
    }
}

impl ConicForm {
    /// Convert the bounded form into equality rows followed by `<=` rows.
    fn from_problem(problem: &QpProblem) -> Self {
        let n = problem.num_vars();
        let m = problem.num_constraints();

        let mut eq_rows: Vec<(DVector<f64>, f64)> = Vec::new();
        let mut ineq_rows: Vec<(DVector<f64>, f64)> = Vec::new();

        for i in 0..m {
            let row = problem.a.row(i).transpose();
            let (lo, hi) = (problem.lba[i], problem.uba[i]);

            if lo == hi && lo.is_finite() {
                eq_rows.push((row, hi));
                continue
            }

            if hi.is_finite() {
                ineq_rows.push((row.clone(), hi));
            }
            if lo.is_finite() {
                ineq_rows.push((-row, -lo));
            }
        }

        for j in 0..n {
            let mut unit = DVector::zeros(n);
            unit[j] = 1.0;

            if problem.ub[j].is_finite() {
                ineq_rows.push((unit.clone(), problem.ub[j]));
            }
            if problem.lb[j].is_finite() {
                ineq_rows.push((-unit, -problem.lb[j]));
            }
        }

        let n_eq = eq_rows.len();
        let n_ineq = ineq_rows.len();

        let mut a = DMatrix::zeros(n_eq + n_ineq, n);
        let mut b = Vec::with_capacity(n_eq + n_ineq);

        for (r, (row, rhs)) in eq_rows.into_iter().chain(ineq_rows.into_iter()).enumerate() {
            a.row_mut(r).copy_from(&row.transpose());
            b.push(rhs);
        }

        Self {
            a,
            b,
            n_eq,
            n_ineq,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Which part of a dense matrix goes into its sparse copy.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Triangle {
    Full,
    /// Clarabel reads only the upper triangle of the cost matrix.
    Upper,
}

/// Column-compressed copy of `m`, dropping near-zero entries.
fn to_csc(m: &DMatrix<f64>, part: Triangle) -> CscMatrix<f64> {
    let mut colptr = Vec::with_capacity(m.ncols() + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);

    for (j, col) in m.column_iter().enumerate() {
        let kept = col
            .iter()
            .enumerate()
            .take_while(|(i, _)| part == Triangle::Full || *i <= j)
            .filter(|(_, v)| v.abs() > SPARSE_EPS);

        for (i, v) in kept {
            rowval.push(i);
            nzval.push(*v);
        }
        colptr.push(rowval.len());
    }

    CscMatrix::new(m.nrows(), m.ncols(), colptr, rowval, nzval)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    const INF: f64 = f64::INFINITY;

    fn problem(
        h: DMatrix<f64>, 
        g: Vec<f64>, 
        a: DMatrix<f64>, 
        bounds: (Vec<f64>, Vec<f64>), 
        row_bounds: (Vec<f64>, Vec<f64>)
    ) -> QpProblem {
        QpProblem {
            h,
            g: DVector::from_vec(g),
            a,
            lb: DVector::from_vec(bounds.0),
            ub: DVector::from_vec(bounds.1),
            lba: DVector::from_vec(row_bounds.0),
            uba: DVector::from_vec(row_bounds.1),
        }
    }

    #[test]
    fn test_to_csc_triangle() {
        let m = DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 0.0,
            1.0, 5.0, 2.0,
            0.0, 2.0, 6.0,
        ]);

        let full = to_csc(&m, Triangle::Full);
        assert_eq!(full.colptr, vec![0, 2, 5, 7]);
        assert_eq!(full.rowval, vec![0, 1, 0, 1, 2, 1, 2]);

        let upper = to_csc(&m, Triangle::Upper);
        assert_eq!(upper.colptr, vec![0, 1, 3, 5]);
        assert_eq!(upper.rowval, vec![0, 0, 1, 1, 2]);
        assert_eq!(upper.nzval, vec![4.0, 1.0, 5.0, 2.0, 6.0]);
    }

    #[test]
    fn test_equality_constrained() {
        // min x^2 + y^2 s.t. x + y = 1
        let p = problem(
            DMatrix::identity(2, 2) * 2.0,
            vec![0.0, 0.0],
            DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            (vec![-INF, -INF], vec![INF, INF]),
            (vec![1.0], vec![1.0])
        );

        let z = ClarabelSolver.solve(&p, 100).unwrap();

        assert_abs_diff_eq!(z[0], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(z[1], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_active_bounds() {
        // min 1/2 x^2 - 2x with x <= 1, and 1/2 y^2 + 3y with -2 <= y (row bound)
        let p = problem(
            DMatrix::identity(2, 2),
            vec![-2.0, 3.0],
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
            (vec![-1.0, -10.0], vec![1.0, 10.0]),
            (vec![-2.0], vec![5.0])
        );

        let z = ClarabelSolver.solve(&p, 100).unwrap();

        assert_abs_diff_eq!(z[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(z[1], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_infeasible() {
        // x >= 2 by row but x <= 1 by bound
        let p = problem(
            DMatrix::identity(1, 1),
            vec![0.0],
            DMatrix::from_row_slice(1, 1, &[1.0]),
            (vec![-1.0], vec![1.0]),
            (vec![2.0], vec![INF])
        );

        assert!(matches!(ClarabelSolver.solve(&p, 100), Err(SolverFailure::NotSolved(_))));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut p = problem(
            DMatrix::identity(2, 2),
            vec![0.0, 0.0],
            DMatrix::zeros(0, 2),
            (vec![-1.0, -1.0], vec![1.0, 1.0]),
            (vec![], vec![])
        );
        p.lb = DVector::zeros(3);

        assert!(matches!(
            ClarabelSolver.solve(&p, 100), 
            Err(SolverFailure::DimensionMismatch(_))
        ));
    }
}
