//! # Goal command line
//!
//! Interactive goal requester for `traj_exec`. Commands typed at the prompt are parsed into
//! [`GoalCmd`]s and sent to the goal server, while goal results published on the telemetry
//! socket are printed as they arrive.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Report};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::{
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

use comms_if::{
    goal::{GoalCmd, GoalRequestMsg, GoalResponse, Telemetry},
    net::{zmq, MonitoredSocket, NetParams, SocketOptions},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const PROMPT: &str = "MTGP $ ";
const HISTORY_PATH: &str = "data/goal_cli_history.txt";

/// How long to wait for the goal server to respond.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Only every n-th feedback message is printed.
const FEEDBACK_PRINT_INTERVAL: u64 = 50;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;

    let ctx = zmq::Context::new();

    let req_socket = MonitoredSocket::new(
        &ctx,
        zmq::REQ,
        SocketOptions {
            req_correlate: true,
            req_relaxed: true,
            ..SocketOptions::client()
        },
        &net_params.goal_endpoint
    ).wrap_err("Could not connect to the goal server")?;

    let tm_socket = MonitoredSocket::new(
        &ctx,
        zmq::SUB,
        SocketOptions::client(),
        &net_params.tm_endpoint
    ).wrap_err("Could not connect to the telemetry server")?;

    let tm_run = Arc::new(AtomicBool::new(true));
    let tm_run_clone = tm_run.clone();
    let tm_jh = thread::spawn(move || tm_thread(tm_socket, tm_run_clone));

    let mut rl = DefaultEditor::new().wrap_err("Could not create the line editor")?;
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Unhandled Error: {:?}", err);
                break
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue
        }
        rl.add_history_entry(line).ok();

        if line == "exit" || line == "quit" {
            break
        }

        // Parse the line as if it were a command line, with the program name in front
        let words = std::iter::once("goal_cli").chain(line.split_whitespace());
        let cmd = match GoalCmd::from_iter_safe(words) {
            Ok(c) => c,
            Err(e) => {
                println!("{}", e.message);
                continue
            }
        };

        match request(&req_socket, &GoalRequestMsg::from(cmd)) {
            Ok(response) => print_response(&response),
            Err(e) => println!("Request failed: {:#}", e)
        }
    }

    println!("Exiting...");

    tm_run.store(false, Ordering::Relaxed);
    tm_jh.join().ok();

    if let Err(e) = rl.save_history(HISTORY_PATH) {
        println!("Could not save history: {}", e);
    }

    Ok(())
}

/// Send a request and wait for the response.
fn request(socket: &MonitoredSocket, msg: &GoalRequestMsg) -> Result<GoalResponse, Report> {
    let msg_str = serde_json::to_string(msg).wrap_err("Could not serialize the request")?;
    socket.send(&msg_str, 0).wrap_err("Could not send the request")?;

    let start = Instant::now();
    loop {
        match socket.recv_string(0) {
            Ok(Ok(s)) => {
                return serde_json::from_str(&s).wrap_err("Could not parse the response")
            },
            Ok(Err(_)) => return Err(color_eyre::eyre::eyre!("Response is not valid UTF-8")),
            Err(zmq::Error::EAGAIN) if start.elapsed() < RESPONSE_TIMEOUT => continue,
            Err(zmq::Error::EAGAIN) => {
                return Err(color_eyre::eyre::eyre!("No response from the goal server"))
            },
            Err(e) => return Err(e).wrap_err("Could not receive the response")
        }
    }
}

fn print_response(response: &GoalResponse) {
    match response {
        GoalResponse::Accepted { goal_id } => println!("Goal {} accepted", goal_id),
        GoalResponse::Rejected { goal_id, reason } => {
            println!("Goal {} rejected: {}", goal_id, reason)
        },
        GoalResponse::CancelAccepted { goal_id } => println!("Cancelling goal {}", goal_id),
        GoalResponse::CancelRejected { goal_id, reason } => {
            println!("Could not cancel goal {}: {}", goal_id, reason)
        },
        GoalResponse::Status { state, goal_id, cancel_requested } => println!(
            "{:?}{}{}",
            state,
            goal_id.as_ref().map(|g| format!(" ({})", g)).unwrap_or_default(),
            if *cancel_requested { ", cancel requested" } else { "" }
        ),
        GoalResponse::Invalid { reason } => println!("Invalid request: {}", reason),
    }
}

/// Background thread, prints telemetry from the trajectory executable.
fn tm_thread(socket: MonitoredSocket, run: Arc<AtomicBool>) {
    while run.load(Ordering::Relaxed) {
        let msg = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) | Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                println!("Telemetry connection lost: {}", e);
                break
            }
        };

        let tm: Telemetry = match serde_json::from_str(&msg) {
            Ok(t) => t,
            Err(_) => continue
        };

        match tm {
            Telemetry::Feedback(fb) if fb.iteration % FEEDBACK_PRINT_INTERVAL == 0 => {
                println!("\n[{}] iteration {}: {}", fb.goal_id, fb.iteration, fb.text)
            },
            Telemetry::Feedback(_) => (),
            Telemetry::Result(res) => println!(
                "\n[{}] {:?}{} ({} samples)",
                res.goal_id,
                res.status,
                res.reason.map(|r| format!(": {}", r)).unwrap_or_default(),
                res.trajectory.len()
            ),
            Telemetry::PoseTrajectory { goal_id, poses } => {
                if let Some(last) = poses.poses.last() {
                    println!(
                        "[{}] final {} position {:.3?}",
                        goal_id, poses.frame_id, last.position_m
                    );
                }
            }
        }
    }
}
