//! # Kinematic chain
//!
//! Serial chain of joints between a base frame and an end-effector (tip) frame, providing joint
//! limits, forward kinematics and the geometric Jacobian. Chains are built from a URDF robot
//! description, see [`KinematicChain::from_urdf`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod urdf;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub use self::urdf::*;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Limits applied to joints that don't declare their own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitDefaults {
    /// Symmetric position limit used when a joint declares no position limits.
    ///
    /// Units: radians or meters
    pub default_pos_limit: f64,

    /// Velocity limit used when a joint declares a non-positive velocity limit.
    ///
    /// Units: radians/second or meters/second
    pub default_vel_limit: f64,
}

/// Position and velocity limits of a single joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointLimits {
    pub lower: f64,
    pub upper: f64,
    pub velocity: f64,
}

/// A movable joint in the chain.
#[derive(Debug, Clone)]
pub struct ChainJoint {
    pub name: String,

    pub kind: JointKind,

    /// Transform from the previous movable joint's frame (or the chain base) to this joint's
    /// frame, including any fixed joints in between.
    pub origin: Isometry3<f64>,

    /// Joint axis in the joint's own frame
    pub axis: Unit<Vector3<f64>>,

    pub limits: JointLimits,
}

/// An ordered chain of movable joints from `base_frame` to `tip_frame`.
#[derive(Debug, Clone)]
pub struct KinematicChain {
    base_frame: String,
    tip_frame: String,
    joints: Vec<ChainJoint>,

    /// Chain index of each joint by name, built with the chain
    index: HashMap<String, usize>,

    /// Fixed transform from the last movable joint to the tip frame
    tip_offset: Isometry3<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JointKind {
    Revolute,
    Prismatic,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainBuildError {
    #[error("No kinematic path from {base} to {tip}")]
    NoPath { base: String, tip: String },

    #[error("Joint {joint} has type {kind} which cannot be part of a serial chain")]
    UnsupportedJoint { joint: String, kind: String },

    #[error("Joint {0} has a zero length axis")]
    InvalidAxis(String),

    #[error("The chain from {base} to {tip} contains no movable joints")]
    NoMovableJoints { base: String, tip: String },

    #[error("Could not read the robot description: {0}")]
    Description(String),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FkError {
    #[error("Expected {expected} joint positions but got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("Joint positions or the resulting pose are not finite")]
    NonFinite,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JointKind {
    /// Transform produced by moving a joint of this kind about/along `axis` by `q`.
    fn motion(&self, axis: &Unit<Vector3<f64>>, q: f64) -> Isometry3<f64> {
        match self {
            JointKind::Revolute => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(axis, q)
            ),
            JointKind::Prismatic => Isometry3::from_parts(
                Translation3::from(axis.into_inner() * q),
                UnitQuaternion::identity()
            ),
        }
    }
}

impl KinematicChain {
    /// Number of movable joints (degrees of freedom) in the chain.
    pub fn dof(&self) -> usize {
        self.joints.len()
    }

    pub fn joints(&self) -> &[ChainJoint] {
        &self.joints
    }

    pub fn base_frame(&self) -> &str {
        &self.base_frame
    }

    pub fn tip_frame(&self) -> &str {
        &self.tip_frame
    }

    /// Index of the named joint in the chain.
    pub fn index_of(&self, joint_name: &str) -> Option<usize> {
        self.index.get(joint_name).copied()
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.joints.iter().map(|j| j.name.clone()).collect()
    }

    pub fn lower_limits(&self) -> DVector<f64> {
        DVector::from_iterator(self.dof(), self.joints.iter().map(|j| j.limits.lower))
    }

    pub fn upper_limits(&self) -> DVector<f64> {
        DVector::from_iterator(self.dof(), self.joints.iter().map(|j| j.limits.upper))
    }

    pub fn velocity_limits(&self) -> DVector<f64> {
        DVector::from_iterator(self.dof(), self.joints.iter().map(|j| j.limits.velocity))
    }

    /// Pose of the tip frame in the base frame for the given chain-ordered joint positions.
    pub fn forward_kinematics(&self, q: &[f64]) -> Result<Isometry3<f64>, FkError> {
        self.check_positions(q)?;

        let tip = self.joints.iter()
            .zip(q.iter())
            .fold(Isometry3::identity(), |pose, (joint, &qi)| {
                pose * joint.origin * joint.kind.motion(&joint.axis, qi)
            }) * self.tip_offset;

        check_pose(&tip)?;

        Ok(tip)
    }

    /// Geometric Jacobian of the tip frame expressed in the base frame.
    ///
    /// Rows are the linear velocity `[vx, vy, vz]` followed by the angular velocity
    /// `[wx, wy, wz]`, one column per joint in chain order.
    pub fn jacobian(&self, q: &[f64]) -> Result<DMatrix<f64>, FkError> {
        self.check_positions(q)?;

        // World position and axis of each joint
        let mut axes = Vec::with_capacity(self.dof());
        let mut pose = Isometry3::identity();

        for (joint, &qi) in self.joints.iter().zip(q.iter()) {
            let frame = pose * joint.origin;
            axes.push((frame.translation.vector, frame.rotation * joint.axis.into_inner()));
            pose = frame * joint.kind.motion(&joint.axis, qi);
        }

        let tip = pose * self.tip_offset;
        check_pose(&tip)?;
        let tip_pos = tip.translation.vector;

        let mut jac = DMatrix::zeros(6, self.dof());

        for (i, (joint, (pos, axis))) in self.joints.iter().zip(axes.iter()).enumerate() {
            let (lin, ang) = match joint.kind {
                JointKind::Revolute => (axis.cross(&(tip_pos - pos)), *axis),
                JointKind::Prismatic => (*axis, Vector3::zeros()),
            };

            for r in 0..3 {
                jac[(r, i)] = lin[r];
                jac[(r + 3, i)] = ang[r];
            }
        }

        Ok(jac)
    }

    fn check_positions(&self, q: &[f64]) -> Result<(), FkError> {
        if q.len() != self.dof() {
            return Err(FkError::WrongLength {
                expected: self.dof(),
                actual: q.len()
            })
        }

        if q.iter().any(|v| !v.is_finite()) {
            return Err(FkError::NonFinite)
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_pose(pose: &Isometry3<f64>) -> Result<(), FkError> {
    let finite = pose.translation.vector.iter()
        .chain(pose.rotation.coords.iter())
        .all(|v| v.is_finite());

    match finite {
        true => Ok(()),
        false => Err(FkError::NonFinite)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
