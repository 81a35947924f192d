//! # Naive kinematics simulator
//!
//! Integrates commanded joint velocities over each clock pulse with no dynamics, the way the
//! actuation layer is simulated during development. Used by the `naive_sim` binary and by the
//! closed loop tests through [`SimLoopback`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::HashMap, sync::Arc};

use comms_if::sim::{JointState, ProjectionClock};
use log::trace;
use urdf_rs::{JointType, Robot};

use crate::{
    cmd_emitter::{CommandSink, SinkError},
    state_tracker::StateTracker,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Dual arm robot on a planar base with a prismatic torso.
pub const DUAL_ARM_URDF: &str = include_str!("../res/dual_arm.urdf");

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NaiveSim {
    names: Vec<String>,
    index: HashMap<String, usize>,
    positions: Vec<f64>,
    velocities: Vec<f64>,

    /// Position limits, `None` for unbounded joints
    limits: Vec<Option<(f64, f64)>>,
}

/// A command sink which drives a simulator and feeds its state straight back to a tracker.
pub struct SimLoopback {
    pub sim: NaiveSim,
    tracker: Arc<StateTracker>,

    /// Every velocity command received
    pub commands: Vec<JointState>,

    /// Number of clock pulses received
    pub clocks: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NaiveSim {
    /// Simulate every movable joint of the robot, starting at zero.
    pub fn from_robot(robot: &Robot) -> Self {
        let mut names = Vec::new();
        let mut limits = Vec::new();

        for joint in robot.joints.iter() {
            let limit = match joint.joint_type {
                JointType::Revolute | JointType::Prismatic => {
                    let l = &joint.limit;
                    if l.lower < l.upper {
                        Some((l.lower, l.upper))
                    }
                    else {
                        None
                    }
                },
                JointType::Continuous => None,
                _ => continue
            };

            names.push(joint.name.clone());
            limits.push(limit);
        }

        let index = names.iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        let n = names.len();

        Self {
            names,
            index,
            positions: vec![0.0; n],
            velocities: vec![0.0; n],
            limits,
        }
    }

    /// Set the position of a joint, returns false if the joint isn't simulated.
    pub fn set_position(&mut self, name: &str, position: f64) -> bool {
        match self.index.get(name) {
            Some(&i) => {
                self.positions[i] = position;
                true
            },
            None => false
        }
    }

    /// Set the velocities of the named joints until the next command, returning the number of
    /// joints set. Joints missing from the command keep their velocity.
    pub fn apply_velocity(&mut self, cmd: &JointState) -> usize {
        let mut applied = 0;

        for (name, vel) in cmd.names.iter().zip(cmd.velocities.iter()) {
            if let Some(&i) = self.index.get(name) {
                self.velocities[i] = *vel;
                applied += 1;
            }
        }

        applied
    }

    /// Advance the simulation, holding joints at their limits.
    pub fn step(&mut self, period_s: f64) {
        for i in 0..self.positions.len() {
            let mut p = self.positions[i] + self.velocities[i] * period_s;

            if let Some((lower, upper)) = self.limits[i] {
                p = p.max(lower).min(upper);
            }

            self.positions[i] = p;
        }
    }

    pub fn joint_state(&self) -> JointState {
        let mut js = JointState::from_positions(self.names.clone(), self.positions.clone());
        js.velocities = self.velocities.clone();
        js
    }
}

impl SimLoopback {
    /// Create the loopback, publishing the initial simulator state to the tracker.
    pub fn new(sim: NaiveSim, tracker: Arc<StateTracker>) -> Self {
        tracker.on_joint_state(&sim.joint_state());

        Self {
            sim,
            tracker,
            commands: Vec::new(),
            clocks: 0,
        }
    }
}

impl CommandSink for SimLoopback {
    fn send_velocity(&mut self, cmd: &JointState) -> Result<(), SinkError> {
        self.sim.apply_velocity(cmd);
        self.commands.push(cmd.clone());
        Ok(())
    }

    fn send_clock(&mut self, clock: &ProjectionClock) -> Result<(), SinkError> {
        self.sim.step(clock.period_s);
        self.clocks += 1;
        trace!("Simulator stepped by {} s", clock.period_s);

        self.tracker.on_joint_state(&self.sim.joint_state());
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::kin_chain::parse_robot;

    #[test]
    fn test_sim_integrates_and_limits() {
        let mut sim = NaiveSim::from_robot(&parse_robot(DUAL_ARM_URDF).unwrap());

        // Base, torso and two 7 joint arms
        assert_eq!(sim.joint_state().names.len(), 4 + 14);

        let cmd = JointState::velocity_command(
            vec!["odom_x_joint".into(), "triangle_base_joint".into(), "unknown".into()],
            vec![1.0, 0.5, 3.0]
        );
        assert_eq!(sim.apply_velocity(&cmd), 2);

        sim.step(0.1);
        let js = sim.joint_state();
        assert!((js.position_of("odom_x_joint").unwrap() - 0.1).abs() < 1e-12);
        assert!((js.position_of("triangle_base_joint").unwrap() - 0.05).abs() < 1e-12);

        // Torso stops at its upper limit
        sim.step(10.0);
        assert_eq!(sim.joint_state().position_of("triangle_base_joint"), Some(0.3));

        assert!(sim.set_position("left_arm_2_joint", 0.4));
        assert!(!sim.set_position("unknown", 0.4));
        assert_eq!(sim.joint_state().position_of("left_arm_2_joint"), Some(0.4));
    }
}
