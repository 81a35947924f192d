//! Main trajectory generator executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the state tracker, goal manager and control loop
//!     - Start the goal server and the joint state client, which run in the background
//!     - Main loop:
//!         - Submit the next scripted goal, if running from a goal file
//!         - Execute any received goal to its terminal result
//!         - Save the goal outcome into the session
//!
//! With `--offline` the robot is simulated in process instead of over the network.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::Arc,
    thread,
    time::Instant,
};
use structopt::StructOpt;

// Internal
use comms_if::{
    goal::{GoalRequest, LifecycleState},
    net::NetParams,
};
use traj_lib::{
    cmd_emitter::CommandSink,
    cmd_server::CmdServer,
    ctrl_loop::{self, CtrlLoop},
    goal_mgr::GoalManager,
    goal_server::GoalServer,
    js_client::JointStateClient,
    kin_chain::load_robot,
    params::TrajExecParams,
    qp_form,
    qp_solver::ClarabelSolver,
    sim::{NaiveSim, SimLoopback},
    state_tracker::StateTracker,
    tm_server::TmServer,
};
use util::{
    archive::Archiver,
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
    time::seconds_to_std_duration,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "traj_exec", about = "Closed loop end-effector trajectory generator")]
struct Args {
    /// JSON file containing a list of goal requests to execute in order, the executable exits
    /// once all of them have terminated
    #[structopt(long, parse(from_os_str))]
    goals: Option<PathBuf>,

    /// Simulate the robot in process instead of using the simulator over the network
    #[structopt(long)]
    offline: bool,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new(
        "traj_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Trace, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("MTGP Trajectory Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;
    let exec_params: TrajExecParams = util::params::load("traj_exec.toml")
        .wrap_err("Could not load traj_exec params")?;
    let form_params: qp_form::Params = util::params::load("qp_form.toml")
        .wrap_err("Could not load qp_form params")?;
    let ctrl_params: ctrl_loop::Params = util::params::load("ctrl_loop.toml")
        .wrap_err("Could not load ctrl_loop params")?;

    info!("Exec parameters loaded");

    let mut pending_goals: VecDeque<GoalRequest> = match args.goals {
        Some(ref path) => {
            let goals_str = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("Could not read the goal file {:?}", path))?;
            let goals: Vec<GoalRequest> = serde_json::from_str(&goals_str)
                .wrap_err_with(|| format!("Could not parse the goal file {:?}", path))?;

            info!("Loaded {} goals from {:?}", goals.len(), path);
            goals.into()
        },
        None => {
            info!("No goal file provided, goals will be received by the GoalServer");
            VecDeque::new()
        }
    };

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let tick_period = seconds_to_std_duration(exec_params.tick_period_s);

    let tracker = Arc::new(
        StateTracker::new(exec_params.clone())
            .wrap_err("Failed to initialise the StateTracker")?
    );
    let goals = Arc::new(GoalManager::new(&exec_params.base_frame));

    let mut ctrl = CtrlLoop::new(ctrl_params, form_params, Box::new(ClarabelSolver))
        .wrap_err("Failed to initialise CtrlLoop")?;
    ctrl.set_archiver(
        Archiver::from_path(&session, "ctrl_loop.csv")
            .wrap_err("Failed to create the CtrlLoop archive")?
    );

    info!("Module initialisation complete\n");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = comms_if::net::zmq::Context::new();

    let mut tm_server = {
        let s = TmServer::new(&zmq_ctx, &net_params)
            .wrap_err("Failed to initialise TmServer")?;
        info!("TmServer initialised");
        s
    };

    let _goal_server = {
        let s = GoalServer::new(&zmq_ctx, &net_params, goals.clone(), tracker.clone())
            .wrap_err("Failed to initialise GoalServer")?;
        info!("GoalServer initialised");
        s
    };

    let mut _js_client = None;
    let mut sink: Box<dyn CommandSink> = if args.offline {
        let urdf_path = host::resolve_in_sw_root(&exec_params.urdf_path)
            .wrap_err("Could not resolve the URDF path")?;
        let robot = load_robot(&urdf_path)
            .wrap_err("Could not load the robot description")?;

        info!("Simulating the robot in process");
        Box::new(SimLoopback::new(NaiveSim::from_robot(&robot), tracker.clone()))
    }
    else {
        _js_client = Some(
            JointStateClient::new(&zmq_ctx, &net_params, tracker.clone())
                .wrap_err("Failed to initialise JointStateClient")?
        );
        info!("JointStateClient initialised");

        let s = CmdServer::new(&zmq_ctx, &net_params)
            .wrap_err("Failed to initialise CmdServer")?;
        info!("CmdServer initialised");
        Box::new(s)
    };

    info!("Network initialisation complete");

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let scripted = args.goals.is_some();

    loop {
        let cycle_start_instant = Instant::now();

        // Submit the next scripted goal once the previous one has terminated
        if goals.status().state == LifecycleState::Idle {
            match pending_goals.pop_front() {
                Some(req) => if let Err(e) = goals.submit(&req, &tracker) {
                    warn!("Scripted goal {} rejected: {}", req.goal_id, e);
                },
                None if scripted => {
                    info!("All scripted goals have terminated, stopping");
                    break
                },
                None => ()
            }
        }

        if let Some(outcome) = ctrl.tick(&goals, &tracker, sink.as_mut(), &mut tm_server) {
            info!(
                "Goal {} {:?} after {} iterations, {} commands sent",
                outcome.goal_id, outcome.status, outcome.iterations, outcome.commands_sent
            );
            session.save(format!("goals/{}.json", outcome.goal_id), outcome);
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        match tick_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - tick_period.as_secs_f64()
            )
        }
    }

    // ---- SHUTDOWN ----

    info!("End of execution");

    session.exit();

    Ok(())
}
