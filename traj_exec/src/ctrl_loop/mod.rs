//! # Control loop driver
//!
//! Runs one goal at a time from reception to its terminal result. Each iteration:
//!
//! 1. Stop if cancellation has been requested.
//! 2. Compute the task error from the latest robot state, stop if converged.
//! 3. Stop if the iteration budget is spent.
//! 4. Formulate and solve the QP.
//! 5. Stop without publishing if cancellation was requested during the solve.
//! 6. Publish the velocity command and a clock pulse, record the resulting sample and report
//!    feedback.
//!
//! A failed iteration publishes a zero command instead and the loop retries, the goal is aborted
//! after a number of consecutive failures.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use comms_if::{
    goal::{GoalFeedback, GoalResult, GoalStatus},
    sim::JointState,
    traj::{Pose, PoseArray},
};
use log::{error, info, trace, warn};
use nalgebra::DVector;
use serde::Serialize;
use util::{archive::Archiver, module::State, time::seconds_to_std_duration};

use crate::{
    cmd_emitter::{CommandEmitter, CommandSink, VelocityCommand},
    goal_mgr::{ActiveGoal, GoalManager, GoalReporter},
    qp_form::{self, ControllerContext, GoalTarget, QpForm, QpFormError, TaskError, Zone},
    qp_solver::{QpSolver, SolverFailure},
    state_tracker::{RobotSnapshot, StateTracker},
};

pub use params::Params;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const FEEDBACK_TEXT: &str = "Calculating trajectory";
const FEEDBACK_TEXT_HOLD: &str = "Iteration failed, holding position";

const REASON_TIMED_OUT: &str = "Trajectory generation took too long.";
const REASON_CANCELLED: &str = "Action cancelled by client";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CtrlLoop {
    params: Params,
    form: QpForm,
    emitter: CommandEmitter,
    solver: Box<dyn QpSolver + Send>,
    arch: Archiver,
}

/// Summary of an executed goal.
#[derive(Debug, Clone, Serialize)]
pub struct GoalOutcome {
    pub goal_id: String,
    pub termination: Termination,

    /// Status reported in the result
    pub status: GoalStatus,
    pub reason: Option<String>,

    /// Number of solved or failed iterations
    pub iterations: u64,

    /// Number of velocity commands published
    pub commands_sent: u64,

    pub trajectory: Vec<JointState>,
    pub poses: PoseArray,
}

/// Data recorded while a goal runs.
struct GoalRun {
    iterations: u64,
    commands_sent: u64,
    consecutive_failures: u32,
    trajectory: Vec<JointState>,
    poses: Vec<Pose>,

    /// Sequence number of the last recorded sample
    last_seq: Option<u64>,
}

/// One archive row per iteration.
#[derive(Serialize)]
struct IterRecord<'a> {
    goal_id: &'a str,
    iteration: u64,
    solved: bool,
    zone: Option<Zone>,
    dist: f64,
    err_x_m: f64,
    err_y_m: f64,
    err_z_m: f64,
    err_roll_rad: f64,
    err_pitch_rad: f64,
    err_yaw_rad: f64,
    orientation_suppressed: bool,
    solve_time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Why a goal stopped executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Succeeded,
    Cancelled,
    TimedOut,
    SolverFailure,

    /// No usable joint state for the selected arm
    NoState,
}

#[derive(Debug, thiserror::Error)]
pub enum CtrlLoopError {
    #[error("Invalid control loop parameters: {0}")]
    InvalidParams(String),

    #[error("QP formulation failed: {0}")]
    QpForm(#[from] QpFormError),

    #[error("QP solve failed: {0}")]
    Solver(#[from] SolverFailure),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlLoop {
    pub fn new(
        params: Params,
        form_params: qp_form::Params,
        solver: Box<dyn QpSolver + Send>
    ) -> Result<Self, CtrlLoopError> {
        if !(params.clock_period_s > 0.0) {
            return Err(CtrlLoopError::InvalidParams("clock period must be positive".into()))
        }
        if params.max_consecutive_solver_failures == 0 {
            return Err(CtrlLoopError::InvalidParams(
                "at least one solver failure must be allowed".into()
            ))
        }

        let mut form = QpForm::default();
        form.init(form_params)?;

        Ok(Self {
            emitter: CommandEmitter::new(params.clock_period_s),
            params,
            form,
            solver,
            arch: Archiver::default(),
        })
    }

    /// Archive one row per iteration into the given archiver.
    pub fn set_archiver(&mut self, arch: Archiver) {
        self.arch = arch;
    }

    /// Execute the received goal, if there is one, to its terminal result.
    pub fn tick(
        &mut self,
        goals: &GoalManager,
        tracker: &StateTracker,
        sink: &mut dyn CommandSink,
        reporter: &mut dyn GoalReporter
    ) -> Option<GoalOutcome> {
        let goal = goals.take_received()?;

        info!("Executing goal {}", goal.goal_id);

        let mut run = GoalRun::default();
        let termination = self.execute(&goal, &mut run, goals, tracker, sink, reporter);

        Some(self.terminate(goal, run, termination, goals, tracker, reporter))
    }

    fn execute(
        &mut self,
        goal: &ActiveGoal,
        run: &mut GoalRun,
        goals: &GoalManager,
        tracker: &StateTracker,
        sink: &mut dyn CommandSink,
        reporter: &mut dyn GoalReporter
    ) -> Termination {
        let initial = match usable_snapshot(goal, tracker) {
            Some(s) => s,
            None => return Termination::NoState
        };

        let target = GoalTarget::new(goal);
        run.record(&initial);

        if let Err(e) = self.emitter.pulse(sink) {
            warn!("Could not send the initial clock pulse: {}", e);
        }

        let mut prev_velocity = DVector::zeros(initial.chain.dof());
        let min_iter_period = seconds_to_std_duration(tracker.params().min_iter_period_s);

        loop {
            let iter_start = Instant::now();

            if goals.is_cancel_requested(&goal.goal_id) {
                return Termination::Cancelled
            }

            let snapshot = match usable_snapshot(goal, tracker) {
                Some(s) => s,
                None => return Termination::NoState
            };

            let error = qp_form::task_error(
                self.form.params(),
                &snapshot.eef_position,
                &snapshot.eef_orientation,
                &target
            );
            trace!(
                "Goal {} iteration {}: position error {:?}, orientation error {:?}",
                goal.goal_id, run.iterations, error.position.as_slice(),
                error.orientation_dist.as_slice()
            );

            if error.converged(self.params.pos_tolerance_m, self.params.orient_tolerance_rad) {
                if run.last_seq != Some(snapshot.seq) {
                    run.record(&snapshot);
                }
                return Termination::Succeeded
            }

            if run.iterations >= self.params.max_iterations {
                return Termination::TimedOut
            }
            run.iterations += 1;

            let ctx = ControllerContext {
                snapshot,
                target: target.clone(),
                error,
                prev_velocity: prev_velocity.clone(),
            };

            let solve_start = Instant::now();
            let result = self.solve(&ctx);
            let solve_time_s = solve_start.elapsed().as_secs_f64();

            // The solve can't be interrupted, so a cancellation made during it is observed here
            if goals.is_cancel_requested(&goal.goal_id) {
                return Termination::Cancelled
            }

            let (cmd, zone, dist) = match result {
                Ok((solution, report)) => {
                    run.consecutive_failures = 0;
                    let cmd = self.emitter.build_command(
                        &ctx.snapshot,
                        &solution,
                        error.position_scaled.z
                    );
                    (cmd, Some(report.zone), report.dist)
                },
                Err(e) => {
                    run.consecutive_failures += 1;
                    warn!(
                        "Iteration {} of goal {} failed ({} consecutive): {}",
                        run.iterations, goal.goal_id, run.consecutive_failures, e
                    );
                    (self.emitter.zero_command(&ctx.snapshot), None, f64::NAN)
                }
            };
            let solved = zone.is_some();

            self.publish(sink, &cmd, run);
            prev_velocity = cmd.chain_velocities;

            let sample = tracker.snapshot().unwrap_or(ctx.snapshot);
            run.record(&sample);

            reporter.report_feedback(&GoalFeedback {
                goal_id: goal.goal_id.clone(),
                status: GoalStatus::Active,
                text: (if solved { FEEDBACK_TEXT } else { FEEDBACK_TEXT_HOLD }).into(),
                iteration: run.iterations,
                last_sample: sample.raw.clone(),
            });

            self.archive(goal, run.iterations, solved, zone, dist, &error, solve_time_s);

            if !solved
                && run.consecutive_failures >= self.params.max_consecutive_solver_failures
            {
                return Termination::SolverFailure
            }

            let elapsed = iter_start.elapsed();
            if elapsed < min_iter_period {
                std::thread::sleep(min_iter_period - elapsed);
            }
        }
    }

    fn solve(
        &mut self,
        ctx: &ControllerContext
    ) -> Result<(DVector<f64>, qp_form::StatusReport), CtrlLoopError> {
        let (problem, report) = self.form.proc(ctx)?;
        let solution = self.solver.solve(&problem, self.params.max_solver_iterations)?;

        if solution.len() < ctx.snapshot.chain.dof() {
            return Err(SolverFailure::DimensionMismatch(format!(
                "solution has {} elements for {} joints",
                solution.len(), ctx.snapshot.chain.dof()
            )).into())
        }

        Ok((solution, report))
    }

    fn publish(&self, sink: &mut dyn CommandSink, cmd: &VelocityCommand, run: &mut GoalRun) {
        match self.emitter.emit(sink, cmd) {
            Ok(()) => run.commands_sent += 1,
            Err(e) => warn!("Could not publish the velocity command: {}", e)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn archive(
        &mut self,
        goal: &ActiveGoal,
        iteration: u64,
        solved: bool,
        zone: Option<Zone>,
        dist: f64,
        error: &TaskError,
        solve_time_s: f64
    ) {
        let record = IterRecord {
            goal_id: &goal.goal_id,
            iteration,
            solved,
            zone,
            dist,
            err_x_m: error.position.x,
            err_y_m: error.position.y,
            err_z_m: error.position.z,
            err_roll_rad: error.orientation_dist.x,
            err_pitch_rad: error.orientation_dist.y,
            err_yaw_rad: error.orientation_dist.z,
            orientation_suppressed: error.orientation_suppressed,
            solve_time_s,
        };

        if let Err(e) = self.arch.serialise(&record) {
            warn!("Could not archive iteration {}: {}", iteration, e);
        }
    }

    /// Finish the goal and report its single terminal result.
    fn terminate(
        &mut self,
        goal: ActiveGoal,
        run: GoalRun,
        termination: Termination,
        goals: &GoalManager,
        tracker: &StateTracker,
        reporter: &mut dyn GoalReporter
    ) -> GoalOutcome {
        let (status, reason) = match termination {
            Termination::Succeeded => (GoalStatus::Succeeded, None),
            Termination::Cancelled => (GoalStatus::Cancelled, Some(REASON_CANCELLED.to_string())),
            Termination::TimedOut => (GoalStatus::Aborted, Some(REASON_TIMED_OUT.to_string())),
            Termination::SolverFailure => (GoalStatus::Aborted, Some(format!(
                "The QP solver failed on {} consecutive iterations",
                run.consecutive_failures
            ))),
            Termination::NoState => (GoalStatus::Aborted, Some(
                "No joint state has been received for every joint of the selected arm".to_string()
            )),
        };

        match termination {
            Termination::Succeeded => info!(
                "Goal {} reached after {} iterations", goal.goal_id, run.iterations
            ),
            _ => warn!(
                "Goal {} terminated after {} iterations: {:?}", 
                goal.goal_id, run.iterations, termination
            )
        }

        if let Err(e) = goals.finish(&goal.goal_id, status) {
            error!("Could not finish goal {}: {}", goal.goal_id, e);
        }

        reporter.report_result(&GoalResult {
            goal_id: goal.goal_id.clone(),
            status,
            reason: reason.clone(),
            trajectory: run.trajectory.clone(),
        });

        let poses = PoseArray::new(tracker.params().gripper_frame(goal.arm), run.poses);
        reporter.report_pose_trajectory(&goal.goal_id, &poses);

        GoalOutcome {
            goal_id: goal.goal_id,
            termination,
            status,
            reason,
            iterations: run.iterations,
            commands_sent: run.commands_sent,
            trajectory: run.trajectory,
            poses,
        }
    }
}

impl Default for GoalRun {
    fn default() -> Self {
        Self {
            iterations: 0,
            commands_sent: 0,
            consecutive_failures: 0,
            trajectory: Vec::new(),
            poses: Vec::new(),
            last_seq: None,
        }
    }
}

impl GoalRun {
    fn record(&mut self, snapshot: &RobotSnapshot) {
        self.trajectory.push(snapshot.raw.clone());
        self.poses.push(snapshot.eef_pose());
        self.last_seq = Some(snapshot.seq);
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Snapshot of the goal's arm with every chain joint observed.
fn usable_snapshot(goal: &ActiveGoal, tracker: &StateTracker) -> Option<RobotSnapshot> {
    let snapshot = match tracker.snapshot() {
        Some(s) => s,
        None => {
            warn!("No robot state available for goal {}", goal.goal_id);
            return None
        }
    };

    if snapshot.arm != goal.arm {
        warn!(
            "Tracker follows the {} arm but goal {} is for the {} arm",
            snapshot.arm, goal.goal_id, goal.arm
        );
        return None
    }

    if !snapshot.unobserved.is_empty() {
        warn!("Joints {:?} have never been observed", snapshot.unobserved);
        return None
    }

    Some(snapshot)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    use comms_if::{
        goal::{Arm, GoalRequest, LifecycleState, TargetPose},
        sim::ProjectionClock,
    };
    use nalgebra::Quaternion;
    use util::maths::quat_to_euler;

    use crate::{
        cmd_emitter::SinkError,
        goal_mgr::ReportLog,
        kin_chain::parse_robot,
        params::{RoleAccels, TrajExecParams},
        qp_solver::{ClarabelSolver, QpProblem},
        sim::{NaiveSim, SimLoopback, DUAL_ARM_URDF},
        state_tracker::DescriptionSource,
    };

    const GOAL_ID: &str = "g";

    struct ZeroSolver;

    impl QpSolver for ZeroSolver {
        fn solve(&mut self, problem: &QpProblem, _: u32) -> Result<DVector<f64>, SolverFailure> {
            Ok(DVector::zeros(problem.num_vars()))
        }
    }

    struct FailingSolver;

    impl QpSolver for FailingSolver {
        fn solve(&mut self, _: &QpProblem, _: u32) -> Result<DVector<f64>, SolverFailure> {
            Err(SolverFailure::NotSolved("infeasible".into()))
        }
    }

    /// Requests cancellation of the goal from inside the given call.
    struct CancellingSolver {
        goals: Arc<GoalManager>,
        cancel_on: u32,
        calls: u32,
    }

    impl QpSolver for CancellingSolver {
        fn solve(&mut self, problem: &QpProblem, _: u32) -> Result<DVector<f64>, SolverFailure> {
            self.calls += 1;
            if self.calls == self.cancel_on {
                self.goals.cancel(GOAL_ID).unwrap();
            }
            Ok(DVector::zeros(problem.num_vars()))
        }
    }

    struct NullSink;

    impl CommandSink for NullSink {
        fn send_velocity(&mut self, _: &JointState) -> Result<(), SinkError> {
            Ok(())
        }

        fn send_clock(&mut self, _: &ProjectionClock) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct Rig {
        goals: Arc<GoalManager>,
        tracker: Arc<StateTracker>,
        sink: SimLoopback,
        log: ReportLog,
    }

    impl Rig {
        /// Simulated robot at zero with the same acceleration limit on every joint.
        fn new(accel: f64) -> Self {
            let mut params = TrajExecParams::default();
            params.max_accel = RoleAccels {
                base: accel,
                base_rot: accel,
                torso: accel,
                arm: accel,
            };

            Self::with_params(params)
        }

        fn with_params(params: TrajExecParams) -> Self {
            let tracker = Arc::new(StateTracker::with_source(
                params,
                DescriptionSource::Xml(DUAL_ARM_URDF.into())
            ));
            let sim = NaiveSim::from_robot(&parse_robot(DUAL_ARM_URDF).unwrap());

            Self {
                goals: Arc::new(GoalManager::new("odom")),
                sink: SimLoopback::new(sim, tracker.clone()),
                tracker,
                log: ReportLog::default(),
            }
        }

        fn submit(&self, position: [f64; 3]) {
            let req = GoalRequest {
                goal_id: GOAL_ID.into(),
                target_pose: TargetPose {
                    frame: String::new(),
                    translation_m: position,
                    rotation_q: [0.0, 0.0, 0.0, 1.0],
                },
                arm: Arm::Left,
            };
            self.goals.submit(&req, &self.tracker).unwrap();
        }

        fn run(&mut self, solver: Box<dyn QpSolver + Send>) -> GoalOutcome {
            let mut ctrl = CtrlLoop::new(Params::default(), qp_form::Params::default(), solver)
                .unwrap();
            ctrl.tick(&self.goals, &self.tracker, &mut self.sink, &mut self.log).unwrap()
        }
    }

    #[test]
    fn test_idle_tick_does_nothing() {
        let mut rig = Rig::new(10.0);
        let mut ctrl = CtrlLoop::new(
            Params::default(),
            qp_form::Params::default(),
            Box::new(ZeroSolver)
        ).unwrap();

        assert!(ctrl.tick(&rig.goals, &rig.tracker, &mut rig.sink, &mut rig.log).is_none());
        assert_eq!(rig.sink.clocks, 0);
    }

    #[test]
    fn test_already_converged() {
        let mut rig = Rig::new(10.0);
        rig.submit([0.01, -0.01, 0.0]);

        let outcome = rig.run(Box::new(ClarabelSolver));

        assert_eq!(outcome.termination, Termination::Succeeded);
        assert!(outcome.iterations <= 2);
        assert_eq!(rig.log.results.len(), 1);
        assert_eq!(rig.log.results[0].status, GoalStatus::Succeeded);
        assert_eq!(rig.log.results[0].reason, None);
        assert_eq!(rig.goals.status().state, LifecycleState::Idle);

        // Pose trajectory is tagged with the gripper frame
        assert_eq!(rig.log.pose_trajectories.len(), 1);
        assert_eq!(rig.log.pose_trajectories[0].1.frame_id, "left_gripper_tool_frame");
    }

    #[test]
    fn test_reaches_example_goal() {
        let mut rig = Rig::new(10.0);
        let target = [0.5, 1.2, 0.0];
        rig.submit(target);

        let outcome = rig.run(Box::new(ClarabelSolver));

        assert_eq!(outcome.termination, Termination::Succeeded);
        assert!(outcome.iterations < 1000);
        assert_eq!(outcome.commands_sent, rig.sink.commands.len() as u64);
        assert_eq!(outcome.trajectory.len() as u64, outcome.commands_sent + 1);
        assert_eq!(rig.log.feedback.len() as u64, outcome.commands_sent);

        // Final sample within tolerance of the goal
        let last = outcome.poses.poses.last().unwrap();
        for i in 0..3 {
            assert!((last.position_m[i] - target[i]).abs() <= 0.03, "{:?}", last);
        }
        let q = last.orientation_q;
        let euler = quat_to_euler(&Quaternion::new(q[3], q[0], q[1], q[2]));
        assert!(euler.iter().all(|a| a.abs() <= 0.07), "{:?}", euler);

        // No command exceeds a velocity limit
        let snapshot = rig.tracker.snapshot().unwrap();
        let limits = snapshot.chain.velocity_limits();
        for cmd in rig.sink.commands.iter() {
            for (name, vel) in cmd.names.iter().zip(cmd.velocities.iter()) {
                if let Some(i) = snapshot.chain.index_of(name) {
                    assert!(vel.abs() <= limits[i] + 1e-9, "{} at {}", name, vel);
                }
            }
            assert_eq!(cmd.velocity_of("odom_z_joint"), Some(0.0));
        }
    }

    #[test]
    fn test_reaches_example_goal_with_default_accel() {
        let mut rig = Rig::with_params(TrajExecParams::default());
        let target = [0.5, 1.2, 0.0];
        rig.submit(target);

        let outcome = rig.run(Box::new(ClarabelSolver));

        assert_eq!(outcome.termination, Termination::Succeeded);
        let last = outcome.poses.poses.last().unwrap();
        for i in 0..3 {
            assert!((last.position_m[i] - target[i]).abs() <= 0.03, "{:?}", last);
        }

        // Consecutive commands of the arm and planar base joints respect the acceleration rows
        let snapshot = rig.tracker.snapshot().unwrap();
        let chain = &snapshot.chain;
        let vel_limits = chain.velocity_limits();

        let mut checked = snapshot.roles.arm.clone();
        checked.extend(snapshot.roles.base_x);
        checked.extend(snapshot.roles.base_y);

        let mut prev = vec![0.0; chain.dof()];
        for (n, cmd) in rig.sink.commands.iter().enumerate() {
            // Failed iterations hold position with a zero command
            let held = rig.log.feedback[n].text == FEEDBACK_TEXT_HOLD;

            for &i in checked.iter() {
                let name = &chain.joints()[i].name;
                let v = cmd.velocity_of(name).unwrap();
                if held {
                    assert_eq!(v, 0.0);
                    prev[i] = 0.0;
                    continue
                }

                let a = snapshot.accel_max[i];
                let k = (vel_limits[i] - a) / vel_limits[i];

                assert!(
                    (v - k * prev[i]).abs() <= a + 1e-6,
                    "{} changed from {} to {} on command {}", name, prev[i], v, n
                );
                prev[i] = v;
            }
        }
    }

    #[test]
    fn test_cancel_during_solve() {
        let mut rig = Rig::new(10.0);
        rig.submit([0.5, 1.2, 0.0]);

        let goals = rig.goals.clone();
        let outcome = rig.run(Box::new(CancellingSolver {
            goals,
            cancel_on: 3,
            calls: 0,
        }));

        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.commands_sent, 2);
        assert_eq!(rig.sink.commands.len(), 2);
        assert_eq!(rig.log.results.len(), 1);
        assert_eq!(rig.log.results[0].status, GoalStatus::Cancelled);
        assert_eq!(rig.log.results[0].reason.as_deref(), Some(REASON_CANCELLED));
        assert_eq!(rig.goals.status().state, LifecycleState::Idle);
    }

    #[test]
    fn test_cancel_before_execution() {
        let mut rig = Rig::new(10.0);
        rig.submit([0.5, 1.2, 0.0]);
        rig.goals.cancel(GOAL_ID).unwrap();

        let outcome = rig.run(Box::new(ZeroSolver));

        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.iterations, 0);
        assert!(rig.sink.commands.is_empty());
    }

    #[test]
    fn test_timeout() {
        let mut rig = Rig::new(10.0);
        rig.submit([0.5, 1.2, 0.0]);

        let outcome = rig.run(Box::new(ZeroSolver));

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert_eq!(outcome.status, GoalStatus::Aborted);
        assert_eq!(outcome.commands_sent, 1000);
        assert_eq!(rig.sink.commands.len(), 1000);
        assert_eq!(rig.log.results.len(), 1);
        assert_eq!(rig.log.results[0].reason.as_deref(), Some(REASON_TIMED_OUT));

        // Nothing more is published once the goal is over
        let mut ctrl = CtrlLoop::new(
            Params::default(),
            qp_form::Params::default(),
            Box::new(ZeroSolver)
        ).unwrap();
        assert!(ctrl.tick(&rig.goals, &rig.tracker, &mut rig.sink, &mut rig.log).is_none());
        assert_eq!(rig.sink.commands.len(), 1000);
    }

    #[test]
    fn test_consecutive_solver_failures_abort() {
        let mut rig = Rig::new(10.0);
        rig.submit([0.5, 1.2, 0.0]);

        let outcome = rig.run(Box::new(FailingSolver));

        assert_eq!(outcome.termination, Termination::SolverFailure);
        assert_eq!(outcome.status, GoalStatus::Aborted);
        assert_eq!(outcome.iterations, 5);

        // Each failure holds the robot still
        assert_eq!(rig.sink.commands.len(), 5);
        assert!(rig.sink.commands.iter().all(|c| c.velocities.iter().all(|&v| v == 0.0)));
        assert_eq!(rig.log.results.len(), 1);
    }

    #[test]
    fn test_no_joint_state_aborts() {
        let tracker = StateTracker::with_source(
            TrajExecParams::default(),
            DescriptionSource::Xml(DUAL_ARM_URDF.into())
        );
        let goals = GoalManager::new("odom");
        let mut log = ReportLog::default();

        goals.submit(
            &GoalRequest {
                goal_id: GOAL_ID.into(),
                target_pose: TargetPose {
                    frame: "odom".into(),
                    translation_m: [0.5, 1.2, 0.0],
                    rotation_q: [0.0, 0.0, 0.0, 1.0],
                },
                arm: Arm::Right,
            },
            &tracker
        ).unwrap();

        let mut ctrl = CtrlLoop::new(
            Params::default(),
            qp_form::Params::default(),
            Box::new(ZeroSolver)
        ).unwrap();
        let outcome = ctrl.tick(&goals, &tracker, &mut NullSink, &mut log).unwrap();

        assert_eq!(outcome.termination, Termination::NoState);
        assert_eq!(log.results.len(), 1);
        assert_eq!(log.results[0].status, GoalStatus::Aborted);
        assert_eq!(log.pose_trajectories[0].1.frame_id, "right_gripper_tool_frame");
        assert_eq!(goals.status().state, LifecycleState::Idle);
    }

    #[test]
    fn test_invalid_params() {
        let mut params = Params::default();
        params.max_consecutive_solver_failures = 0;

        assert!(matches!(
            CtrlLoop::new(params, qp_form::Params::default(), Box::new(ZeroSolver)),
            Err(CtrlLoopError::InvalidParams(_))
        ));
    }
}
