use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// How the two eye views are packed into the eye render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoLayout {
    /// Both eyes side by side in one double-width texture.
    #[default]
    DoubleWide,
    /// One texture array slice per eye.
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Field of view expressed as tangents of the half angles, all positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeFov {
    pub up_tan: f32,
    pub down_tan: f32,
    pub left_tan: f32,
    pub right_tan: f32,
}

impl Default for EyeFov {
    fn default() -> Self {
        Self::symmetric(1.0)
    }
}

impl EyeFov {
    pub const fn symmetric(tan: f32) -> Self {
        Self {
            up_tan: tan,
            down_tan: tan,
            left_tan: tan,
            right_tan: tan,
        }
    }
}

/// Static properties reported by the headset at device init.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescription {
    /// Recommended per-eye resolution at pixel density 1.0.
    pub eye_resolution: Extent,
    pub fov: [EyeFov; 2],
    pub refresh_hz: f32,
    pub supports_cubemap_layers: bool,
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self {
            eye_resolution: Extent::new(1344, 1600),
            fov: [
                EyeFov {
                    up_tan: 1.32,
                    down_tan: 1.48,
                    left_tan: 1.37,
                    right_tan: 1.02,
                },
                EyeFov {
                    up_tan: 1.32,
                    down_tan: 1.48,
                    left_tan: 1.02,
                    right_tan: 1.37,
                },
            ],
            refresh_hz: 90.0,
            supports_cubemap_layers: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedNode {
    Head,
    EyeLeft,
    EyeRight,
    HandLeft,
    HandRight,
}

/// Which simulation step a pose query is predicted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseStage {
    Game,
    Render,
}

/// A pose in the device's convention: right-handed, Y up, -Z forward, meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativePose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for NativePose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

/// A pose in engine space: X forward, Y right, Z up, world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

/// Opaque handle to the graphics queue the compositor submits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandQueueHandle(pub u64);

/// Opaque handle to a swapchain owned by the native compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainHandle(pub u64);
