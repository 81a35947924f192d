//! # Naive kinematics simulator executable
//!
//! Stands in for the actuation layer during development. Subscribes to the velocity commands and
//! clock pulses published by `traj_exec`, integrates the commanded velocities over each pulse,
//! and publishes the resulting joint state after every pulse and at a fixed rate.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use structopt::StructOpt;

use comms_if::{
    net::{zmq, MonitoredSocket, NetParams, SocketOptions},
    sim::SimCommand,
};
use traj_lib::{kin_chain::load_robot, params::TrajExecParams, sim::NaiveSim};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "naive_sim", about = "Naive kinematics simulator for the trajectory generator")]
struct Args {
    /// Period between unprompted joint state publications, in seconds
    #[structopt(long, default_value = "0.05")]
    publish_period_s: f64,

    /// Initial joint positions as `name=value` pairs
    #[structopt(long = "init")]
    init: Vec<String>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("naive_sim", "sessions")
        .wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("MTGP Naive Kinematics Simulator\n");

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;
    let exec_params: TrajExecParams = util::params::load("traj_exec.toml")
        .wrap_err("Could not load traj_exec params")?;

    let urdf_path = host::resolve_in_sw_root(&exec_params.urdf_path)
        .wrap_err("Could not resolve the URDF path")?;
    let robot = load_robot(&urdf_path)
        .wrap_err("Could not load the robot description")?;

    let mut sim = NaiveSim::from_robot(&robot);

    for pair in args.init.iter() {
        let mut split = pair.splitn(2, '=');
        let (name, value) = match (split.next(), split.next().map(str::parse::<f64>)) {
            (Some(n), Some(Ok(v))) => (n, v),
            _ => {
                warn!("Ignoring malformed initial position {:?}", pair);
                continue
            }
        };

        if !sim.set_position(name, value) {
            warn!("Joint {} is not simulated", name);
        }
    }

    // ---- INITIALISE NETWORK ----

    let zmq_ctx = zmq::Context::new();

    let cmd_socket = MonitoredSocket::new(
        &zmq_ctx,
        zmq::SUB,
        SocketOptions::client(),
        &net_params.cmd_endpoint
    ).wrap_err("Failed to connect to the command endpoint")?;

    let js_socket = MonitoredSocket::new(
        &zmq_ctx,
        zmq::PUB,
        SocketOptions::server(),
        &net_params.joint_state_endpoint
    ).wrap_err("Failed to bind the joint state endpoint")?;

    info!("Network initialisation complete");

    // ---- MAIN LOOP ----

    let publish_period = util::time::seconds_to_std_duration(args.publish_period_s);
    let mut last_publish = Instant::now() - publish_period;
    let mut num_pulses: u64 = 0;

    loop {
        // The receive timeout paces this loop
        let mut stepped = false;
        match cmd_socket.recv_string(0) {
            Ok(Ok(s)) => match serde_json::from_str::<SimCommand>(&s) {
                Ok(SimCommand::Velocity(js)) => {
                    let n = sim.apply_velocity(&js);
                    if n < js.names.len() {
                        debug!("{} commanded joints are not simulated", js.names.len() - n);
                    }
                },
                Ok(SimCommand::Clock(clock)) => {
                    sim.step(clock.period_s);
                    stepped = true;
                    num_pulses += 1;
                },
                Err(e) => warn!("Could not parse simulator command: {}", e)
            },
            Ok(Err(_)) => warn!("Non UTF-8 simulator command"),
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => return Err(e).wrap_err("Error receiving simulator commands")
        }

        if stepped || last_publish.elapsed() >= publish_period {
            let js_str = serde_json::to_string(&sim.joint_state())
                .wrap_err("Could not serialize the joint state")?;

            if let Err(e) = js_socket.send(&js_str, 0) {
                warn!("Could not publish the joint state: {}", e);
            }
            last_publish = Instant::now();

            if stepped && num_pulses % 100 == 0 {
                debug!("{} clock pulses simulated", num_pulses);
            }
        }

        // Avoid spinning if the socket timeout is disabled
        if !cmd_socket.connected() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
