//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Quaternion, Vector3};
use num_traits::Float;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Above this absolute dot product two quaternions are close enough that slerp falls back to
/// normalised linear interpolation.
pub const SLERP_DOT_THRESHOLD: f64 = 0.9995;

// ---------------------------------------------------------------------------
// SCALAR FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where 
    T: Float 
{
    target_range.0 
        + ((value - source_range.0) 
        * (target_range.1 - target_range.0) 
        / (source_range.1 - source_range.0))
}

/// Linearly interpolate between `from` (at `t = 0`) and `to` (at `t = 1`).
pub fn lerp<T>(from: T, to: T, t: T) -> T
where
    T: Float
{
    lin_map((T::zero(), T::one()), (from, to), t)
}

/// Limit a value to the range `[min, max]`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T 
where
    T: Float
{
    Float::min(Float::max(*value, *min), *max)
}

/// Get the signed angular distance between two angles in the range of [0, 2pi].
///
/// This function will return the shortest signed distance between a and b accounting for wrapping
/// between 0 and 2pi.
pub fn get_ang_dist_2pi<T>(a: T, b: T) -> T
where
    T: Float
{
    let tau_t: T = T::from(std::f64::consts::TAU).unwrap_or_else(T::nan);
    
    let c = rem_euclid(a - b, tau_t);
    let d = rem_euclid(b - a, tau_t);

    if c < d {
        -c
    }
    else {
        d
    }
}

/// Wrap an angle into the range (-pi, pi].
pub fn wrap_pi<T>(angle: T) -> T
where
    T: Float
{
    get_ang_dist_2pi(T::zero(), angle)
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()`, violating the mathematical definition, if
/// `self` is much smaller than `rhs.abs()` in magnitude and `self < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

// ---------------------------------------------------------------------------
// ROTATION FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a quaternion into roll, pitch and yaw angles.
///
/// The angles are rotations about the fixed x, y and z axes applied in that order, i.e. the
/// rotation matrix is `Rz(yaw) * Ry(pitch) * Rx(roll)`. The quaternion is expected to be of unit
/// length.
///
/// # Singularities
///
/// At pitch = ±pi/2 (gimbal lock) roll and yaw are not unique, only their sum (or difference) is
/// defined, and the split returned here is arbitrary. The sine of the pitch is clamped into
/// [-1, 1] so that round-off near the singularity cannot produce NaN.
pub fn quat_to_euler(q: &Quaternion<f64>) -> Vector3<f64> {
    let (x, y, z, w) = (q.i, q.j, q.k, q.w);

    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = clamp(&(2.0 * (w * y - z * x)), &-1.0, &1.0).asin();
    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));

    Vector3::new(roll, pitch, yaw)
}

/// Convert a rotation matrix into a unit quaternion with a non-negative scalar part.
///
/// Uses the largest of the trace and the diagonal elements as the pivot, so unlike the direct
/// `w = sqrt(1 + trace) / 2` form this has no singularity at 180 degree rotations, where the
/// trace approaches -1.
pub fn rot_to_quat(m: &Matrix3<f64>) -> Quaternion<f64> {
    let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];

    let (w, x, y, z) = if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        (
            0.25 * s,
            (m[(2, 1)] - m[(1, 2)]) / s,
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(1, 0)] - m[(0, 1)]) / s,
        )
    }
    else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
        let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0;
        (
            (m[(2, 1)] - m[(1, 2)]) / s,
            0.25 * s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
        )
    }
    else if m[(1, 1)] > m[(2, 2)] {
        let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0;
        (
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            0.25 * s,
            (m[(1, 2)] + m[(2, 1)]) / s,
        )
    }
    else {
        let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0;
        (
            (m[(1, 0)] - m[(0, 1)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
            (m[(1, 2)] + m[(2, 1)]) / s,
            0.25 * s,
        )
    };

    let q = Quaternion::new(w, x, y, z);

    if q.w < 0.0 { -q } else { q }
}

/// Spherical linear interpolation from `q0` (at `t = 0`) towards `q1` (at `t = 1`).
///
/// Inputs are normalised first and must not be zero. When the dot product is negative `q1` is
/// negated so that the interpolation follows the shortest arc, this happens before the closeness
/// test so that nearly antiparallel inputs (which represent nearly the same rotation) take the
/// linear path instead of dividing by a vanishing sine.
pub fn slerp(q0: &Quaternion<f64>, q1: &Quaternion<f64>, t: f64) -> Quaternion<f64> {
    let q0 = q0.normalize();
    let mut q1 = q1.normalize();

    let mut dot = q0.dot(&q1);
    if dot < 0.0 {
        q1 = -q1;
        dot = -dot;
    }

    if dot > SLERP_DOT_THRESHOLD {
        return (q0 + (q1 - q0) * t).normalize()
    }

    let theta = dot.min(1.0).acos() * t;
    let q2 = (q1 - q0 * dot).normalize();

    q0 * theta.cos() + q2 * theta.sin()
}
