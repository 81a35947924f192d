//! # Command emitter
//!
//! Maps a QP solution onto a named joint velocity command and publishes it, followed by a
//! simulation clock pulse, through a [`CommandSink`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::sim::{JointState, ProjectionClock};
use log::warn;
use nalgebra::DVector;

use crate::state_tracker::RobotSnapshot;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Destination of the velocity commands and clock pulses.
pub trait CommandSink {
    fn send_velocity(&mut self, cmd: &JointState) -> Result<(), SinkError>;

    fn send_clock(&mut self, clock: &ProjectionClock) -> Result<(), SinkError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandEmitter {
    /// Period of each clock pulse.
    ///
    /// Units: seconds
    clock_period_s: f64,
}

/// A velocity command ready to publish.
#[derive(Debug, Clone)]
pub struct VelocityCommand {
    /// The message as published
    pub msg: JointState,

    /// Commanded velocity of each chain joint, in chain order
    pub chain_velocities: DVector<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("The command sink is not connected")]
    NotConnected,

    #[error("Could not send to the command sink: {0}")]
    Transport(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CommandEmitter {
    pub fn new(clock_period_s: f64) -> Self {
        Self { clock_period_s }
    }

    /// Build the velocity command from a solution vector.
    ///
    /// The first `dof` elements of the solution are the chain joint velocities. Arm joints and
    /// the planar base joints are commanded directly, the base rotation is commanded zero, and
    /// the torso is always driven in the direction of the depth error `ez`.
    pub fn build_command(
        &self,
        snapshot: &RobotSnapshot,
        solution: &DVector<f64>,
        ez: f64
    ) -> VelocityCommand {
        let chain = &snapshot.chain;
        let roles = &snapshot.roles;
        let limits = chain.velocity_limits();

        let mut vel = DVector::zeros(chain.dof());

        for &i in roles.arm.iter() {
            vel[i] = solution[i];
        }
        for i in [roles.base_x, roles.base_y].iter().flatten() {
            vel[*i] = solution[*i];
        }
        if let Some(i) = roles.torso {
            vel[i] = if solution[i] * ez < 0.0 {
                -solution[i]
            }
            else {
                solution[i]
            };
        }

        for (i, joint) in chain.joints().iter().enumerate() {
            if vel[i].abs() > limits[i] {
                warn!(
                    "Commanded velocity {:.4} of {} exceeds its limit {:.4}, clamping",
                    vel[i], joint.name, limits[i]
                );
                vel[i] = vel[i].signum() * limits[i];
            }
        }

        VelocityCommand {
            msg: self.named(snapshot, &vel),
            chain_velocities: vel,
        }
    }

    /// A command stopping every chain joint.
    pub fn zero_command(&self, snapshot: &RobotSnapshot) -> VelocityCommand {
        let vel = DVector::zeros(snapshot.chain.dof());

        VelocityCommand {
            msg: self.named(snapshot, &vel),
            chain_velocities: vel,
        }
    }

    /// Publish the velocity command followed by a clock pulse.
    pub fn emit<S: CommandSink + ?Sized>(
        &self,
        sink: &mut S,
        cmd: &VelocityCommand
    ) -> Result<(), SinkError> {
        sink.send_velocity(&cmd.msg)?;
        self.pulse(sink)
    }

    /// Publish a clock pulse on its own.
    pub fn pulse<S: CommandSink + ?Sized>(&self, sink: &mut S) -> Result<(), SinkError> {
        sink.send_clock(&ProjectionClock::new(self.clock_period_s))
    }

    /// Name the chain velocities.
    ///
    /// Names follow the latest joint state message, joints outside the chain are commanded zero
    /// and chain joints missing from the message are appended.
    fn named(&self, snapshot: &RobotSnapshot, vel: &DVector<f64>) -> JointState {
        let chain = &snapshot.chain;

        let mut names = snapshot.raw.names.clone();
        let mut missing = vec![true; chain.dof()];
        for i in names.iter().filter_map(|n| chain.index_of(n)) {
            missing[i] = false;
        }
        names.extend(
            chain.joints().iter()
                .zip(missing.iter())
                .filter(|&(_, &m)| m)
                .map(|(j, _)| j.name.clone())
        );

        let velocities = names
            .iter()
            .map(|n| chain.index_of(n).map(|i| vel[i]).unwrap_or(0.0))
            .collect();

        JointState::velocity_command(names, velocities)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        params::TrajExecParams,
        sim::DUAL_ARM_URDF,
        state_tracker::{DescriptionSource, StateTracker},
    };
    use comms_if::goal::Arm;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<String>,
    }

    impl CommandSink for Recorder {
        fn send_velocity(&mut self, _cmd: &JointState) -> Result<(), SinkError> {
            self.sent.push("velocity".into());
            Ok(())
        }

        fn send_clock(&mut self, clock: &ProjectionClock) -> Result<(), SinkError> {
            assert_eq!(clock.period_s, 0.01);
            self.sent.push("clock".into());
            Ok(())
        }
    }

    fn snapshot() -> RobotSnapshot {
        let t = StateTracker::with_source(
            TrajExecParams::default(),
            DescriptionSource::Xml(DUAL_ARM_URDF.into())
        );
        t.select_arm(Arm::Left).unwrap();
        t.on_joint_state(&JointState::from_positions(
            vec!["right_arm_0_joint".into(), "odom_y_joint".into(), "odom_x_joint".into()],
            vec![0.0, 0.0, 0.0]
        ));
        t.snapshot().unwrap()
    }

    fn solution(values: &[(usize, f64)]) -> DVector<f64> {
        let mut sol = DVector::zeros(17);
        for &(i, v) in values {
            sol[i] = v;
        }
        sol
    }

    #[test]
    fn test_command_mapping() {
        let snap = snapshot();
        let emitter = CommandEmitter::new(0.01);

        let cmd = emitter.build_command(
            &snap,
            &solution(&[(0, 0.3), (1, -0.2), (2, 0.7), (3, 0.1), (4, 0.5), (10, -0.4), (12, 9.0)]),
            -1.0
        );
        let msg = &cmd.msg;

        // Message order first, then the missing chain joints
        assert_eq!(msg.names.len(), 3 + 9);
        assert_eq!(msg.names[0], "right_arm_0_joint");
        assert_eq!(msg.names[3], "odom_z_joint");
        assert_eq!(msg.names[11], "left_arm_6_joint");

        assert_eq!(msg.velocity_of("right_arm_0_joint"), Some(0.0));
        assert_eq!(msg.velocity_of("odom_x_joint"), Some(0.3));
        assert_eq!(msg.velocity_of("odom_y_joint"), Some(-0.2));
        // Base rotation is never commanded
        assert_eq!(msg.velocity_of("odom_z_joint"), Some(0.0));
        // Torso follows the depth error
        assert_eq!(msg.velocity_of("triangle_base_joint"), Some(-0.1));
        assert_eq!(msg.velocity_of("left_arm_0_joint"), Some(0.5));
        assert_eq!(msg.velocity_of("left_arm_6_joint"), Some(-0.4));
        assert_eq!(msg.positions, vec![0.0; 12]);
        assert_eq!(msg.efforts, vec![0.0; 12]);

        assert_eq!(cmd.chain_velocities[3], -0.1);
        assert_eq!(cmd.chain_velocities.len(), 11);
    }

    #[test]
    fn test_command_clamped_to_limits() {
        let snap = snapshot();
        let emitter = CommandEmitter::new(0.01);

        let cmd = emitter.build_command(&snap, &solution(&[(0, 7.0), (3, 0.9), (5, -3.0)]), 1.0);

        assert_eq!(cmd.chain_velocities[0], 4.0);
        assert_eq!(cmd.chain_velocities[3], 0.5);
        assert_eq!(cmd.chain_velocities[5], -2.0);

        let limits = snap.chain.velocity_limits();
        for (v, l) in cmd.chain_velocities.iter().zip(limits.iter()) {
            assert!(v.abs() <= *l);
        }
    }

    #[test]
    fn test_emit_order() {
        let snap = snapshot();
        let emitter = CommandEmitter::new(0.01);
        let mut sink = Recorder::default();

        emitter.emit(&mut sink, &emitter.zero_command(&snap)).unwrap();
        emitter.pulse(&mut sink).unwrap();

        assert_eq!(sink.sent, vec!["velocity", "clock", "clock"]);
    }
}
