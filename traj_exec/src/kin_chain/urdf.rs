//! Building kinematic chains from URDF robot descriptions

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::HashMap, f64::consts::PI, path::Path};

use log::debug;
use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use urdf_rs::{Joint, JointType, Robot};

use super::{ChainBuildError, ChainJoint, JointKind, JointLimits, KinematicChain, LimitDefaults};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Axes shorter than this are rejected.
const MIN_AXIS_NORM: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read a robot description from a URDF file.
pub fn load_robot<P: AsRef<Path>>(path: P) -> Result<Robot, ChainBuildError> {
    urdf_rs::read_file(path.as_ref())
        .map_err(|e| ChainBuildError::Description(format!("{:?}: {}", path.as_ref(), e)))
}

/// Parse a robot description from a URDF string.
pub fn parse_robot(xml: &str) -> Result<Robot, ChainBuildError> {
    urdf_rs::read_from_string(xml)
        .map_err(|e| ChainBuildError::Description(e.to_string()))
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl KinematicChain {
    /// Build the chain of joints from `base_frame` to `tip_frame` in the given description.
    ///
    /// Fixed joints are folded into the origin of the next movable joint, or into the tip offset
    /// if no movable joint follows.
    pub fn from_urdf(
        robot: &Robot,
        base_frame: &str,
        tip_frame: &str,
        defaults: &LimitDefaults
    ) -> Result<Self, ChainBuildError> {
        let no_path = || ChainBuildError::NoPath {
            base: base_frame.into(),
            tip: tip_frame.into()
        };

        // Map from child link to the joint which moves it
        let parent_joints: HashMap<&str, &Joint> = robot.joints.iter()
            .map(|j| (j.child.link.as_str(), j))
            .collect();

        // Walk up from the tip to the base
        let mut path = Vec::new();
        let mut link = tip_frame;

        while link != base_frame {
            let joint = parent_joints.get(link).ok_or_else(no_path)?;

            // A well formed tree can't be deeper than its number of joints
            if path.len() >= robot.joints.len() {
                return Err(no_path())
            }

            path.push(*joint);
            link = joint.parent.link.as_str();
        }

        path.reverse();

        // Fold fixed joints and convert the movable ones
        let mut joints = Vec::new();
        let mut pending = Isometry3::identity();

        for joint in path {
            let origin = pending * origin_to_isometry(joint);

            let (kind, continuous) = match joint.joint_type {
                JointType::Fixed => {
                    pending = origin;
                    continue
                },
                JointType::Revolute => (JointKind::Revolute, false),
                JointType::Continuous => (JointKind::Revolute, true),
                JointType::Prismatic => (JointKind::Prismatic, false),
                ref other => return Err(ChainBuildError::UnsupportedJoint {
                    joint: joint.name.clone(),
                    kind: format!("{:?}", other)
                })
            };

            let axis_vec = Vector3::new(joint.axis.xyz[0], joint.axis.xyz[1], joint.axis.xyz[2]);
            let axis = Unit::try_new(axis_vec, MIN_AXIS_NORM)
                .ok_or_else(|| ChainBuildError::InvalidAxis(joint.name.clone()))?;

            joints.push(ChainJoint {
                name: joint.name.clone(),
                kind,
                origin,
                axis,
                limits: joint_limits(joint, continuous, defaults),
            });

            pending = Isometry3::identity();
        }

        if joints.is_empty() {
            return Err(ChainBuildError::NoMovableJoints {
                base: base_frame.into(),
                tip: tip_frame.into()
            })
        }

        debug!(
            "Built kinematic chain {} -> {} with joints {:?}",
            base_frame,
            tip_frame,
            joints.iter().map(|j| j.name.as_str()).collect::<Vec<_>>()
        );

        let index = joints.iter()
            .enumerate()
            .map(|(i, j)| (j.name.clone(), i))
            .collect();

        Ok(Self {
            base_frame: base_frame.into(),
            tip_frame: tip_frame.into(),
            joints,
            index,
            tip_offset: pending,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn origin_to_isometry(joint: &Joint) -> Isometry3<f64> {
    let xyz = &joint.origin.xyz;
    let rpy = &joint.origin.rpy;

    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2])
    )
}

/// Limits of a joint, substituting defaults where none are declared.
///
/// A URDF limit with `lower == upper == 0` is how a missing limit element is represented.
fn joint_limits(joint: &Joint, continuous: bool, defaults: &LimitDefaults) -> JointLimits {
    let limit = &joint.limit;

    let (lower, upper) = if continuous {
        (-PI, PI)
    }
    else if limit.lower == 0.0 && limit.upper == 0.0 {
        (-defaults.default_pos_limit, defaults.default_pos_limit)
    }
    else {
        (limit.lower, limit.upper)
    };

    let velocity = match limit.velocity {
        v if v > 0.0 => v,
        _ => defaults.default_vel_limit
    };

    JointLimits {
        lower,
        upper,
        velocity
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::DUAL_ARM_URDF;

    const DEFAULTS: LimitDefaults = LimitDefaults {
        default_pos_limit: 1.5,
        default_vel_limit: 0.25,
    };

    const SMALL_URDF: &str = r#"
        <robot name="small">
            <link name="world"/>
            <link name="a"/>
            <link name="b"/>
            <link name="c"/>
            <link name="tool"/>
            <link name="floater"/>
            <joint name="j_a" type="revolute">
                <parent link="world"/>
                <child link="a"/>
                <axis xyz="0 0 1"/>
            </joint>
            <joint name="j_b" type="fixed">
                <parent link="a"/>
                <child link="b"/>
                <origin xyz="1 0 0" rpy="0 0 0"/>
            </joint>
            <joint name="j_c" type="prismatic">
                <parent link="b"/>
                <child link="c"/>
                <axis xyz="0 0 2"/>
                <limit lower="-0.2" upper="0.4" effort="10" velocity="0"/>
            </joint>
            <joint name="j_tool" type="fixed">
                <parent link="c"/>
                <child link="tool"/>
                <origin xyz="0.5 0 0" rpy="0 0 0"/>
            </joint>
            <joint name="j_float" type="floating">
                <parent link="tool"/>
                <child link="floater"/>
            </joint>
        </robot>
    "#;

    #[test]
    fn test_dual_arm_chains() {
        let robot = parse_robot(DUAL_ARM_URDF).unwrap();

        for side in &["left", "right"] {
            let chain = KinematicChain::from_urdf(
                &robot, "odom", &format!("{}_gripper_tool_frame", side), &DEFAULTS
            ).unwrap();

            assert_eq!(chain.dof(), 11);
            assert_eq!(chain.joint_names()[0], "odom_x_joint");
            assert_eq!(chain.joint_names()[3], "triangle_base_joint");
            assert_eq!(chain.joint_names()[10], format!("{}_arm_6_joint", side));

            // Continuous base rotation
            assert_eq!(chain.joints()[2].limits.lower, -PI);
            assert_eq!(chain.joints()[2].limits.upper, PI);
        }
    }

    #[test]
    fn test_fixed_joints_folded_and_defaults() {
        let robot = parse_robot(SMALL_URDF).unwrap();
        let chain = KinematicChain::from_urdf(&robot, "world", "tool", &DEFAULTS).unwrap();

        assert_eq!(chain.joint_names(), vec!["j_a".to_string(), "j_c".to_string()]);

        // Undeclared limits on j_a
        assert_eq!(chain.joints()[0].limits, JointLimits {
            lower: -1.5,
            upper: 1.5,
            velocity: 0.25
        });

        // Declared position limits, zero velocity replaced
        assert_eq!(chain.joints()[1].limits, JointLimits {
            lower: -0.2,
            upper: 0.4,
            velocity: 0.25
        });

        // Fixed offsets are kept and the axis is normalised
        let tip = chain.forward_kinematics(&[0.0, 0.1]).unwrap();
        assert!((tip.translation.vector - Vector3::new(1.5, 0.0, 0.1)).norm() < 1e-12);
    }

    #[test]
    fn test_chain_errors() {
        let robot = parse_robot(SMALL_URDF).unwrap();

        assert!(matches!(
            KinematicChain::from_urdf(&robot, "world", "floater", &DEFAULTS),
            Err(ChainBuildError::UnsupportedJoint { .. })
        ));
        assert!(matches!(
            KinematicChain::from_urdf(&robot, "world", "missing_frame", &DEFAULTS),
            Err(ChainBuildError::NoPath { .. })
        ));
        assert!(matches!(
            KinematicChain::from_urdf(&robot, "c", "a", &DEFAULTS),
            Err(ChainBuildError::NoPath { .. })
        ));
        assert!(matches!(
            KinematicChain::from_urdf(&robot, "c", "tool", &DEFAULTS),
            Err(ChainBuildError::NoMovableJoints { .. })
        ));
        assert!(matches!(
            parse_robot("<robot"),
            Err(ChainBuildError::Description(_))
        ));
    }
}
