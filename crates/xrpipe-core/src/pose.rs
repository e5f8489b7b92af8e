//! Conversion of native device poses into engine space.
//!
//! The device reports right-handed, Y-up, -Z-forward poses in meters. Engine
//! space is X forward, Y right, Z up, measured in world units.

use glam::{Quat, Vec3, Vec4};

use crate::types::{NativePose, Pose};

/// Tracking-origin calibration applied on top of the raw device pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Offset in meters, already in engine axes.
    pub base_offset: Vec3,
    pub base_orientation: Quat,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            base_offset: Vec3::ZERO,
            base_orientation: Quat::IDENTITY,
        }
    }
}

/// Device axes to engine axes.
pub fn to_engine_vector(v: Vec3) -> Vec3 {
    Vec3::new(-v.z, v.x, v.y)
}

/// Device rotation to engine rotation. The axis swap flips handedness, so the
/// angle sign flips along with the permuted axis.
pub fn to_engine_quat(q: Quat) -> Quat {
    Quat::from_xyzw(-q.z, q.x, q.y, -q.w)
}

/// Normalizes `q`, falling back to identity for degenerate input.
pub fn renormalize(q: Quat) -> Quat {
    let v = Vec4::from(q);
    let len_sq = v.length_squared();
    if !len_sq.is_finite() || len_sq <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    Quat::from_vec4(v / len_sq.sqrt())
}

pub fn convert_pose(native: &NativePose, calibration: &Calibration, world_to_meters: f32) -> Pose {
    let inverse_base = calibration.base_orientation.inverse();

    let orientation = renormalize(inverse_base * to_engine_quat(native.orientation));

    let position = (to_engine_vector(native.position) - calibration.base_offset) * world_to_meters;
    let position = inverse_base * position;

    Pose {
        position,
        orientation,
    }
}

/// Yaw-only part of an engine-space rotation (rotation about +Z).
pub fn yaw_only(q: Quat) -> Quat {
    let (yaw, _, _) = q.to_euler(glam::EulerRot::ZYX);
    Quat::from_rotation_z(yaw)
}
