//! Per-frame stereo configuration.
//!
//! A snapshot is owned by exactly one stage. Stages receive their own copy
//! when a frame is handed over, so mutating the game-side snapshot never
//! affects a frame already in flight.

use glam::{Mat4, Quat, Vec3, Vec4};
use tracing::warn;

use crate::{
    config::PipelineConfig,
    pose::Calibration,
    types::{DeviceDescription, Extent, Eye, EyeFov, Rect, StereoLayout},
};

/// Hard bounds for any pixel density.
pub const MIN_PIXEL_DENSITY: f32 = 0.5;
pub const MAX_PIXEL_DENSITY: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    pub pixel_density: f32,
    pub pixel_density_min: f32,
    pub pixel_density_max: f32,
    pub pixel_density_adaptive: bool,
    pub stereo_layout: StereoLayout,
    /// World units.
    pub near_clipping_plane: f32,
    /// World units; zero means an infinite far plane.
    pub far_clipping_plane: f32,
    pub render_target_size: Extent,
    pub eye_viewports: [Rect; 2],
    pub eye_fov: [EyeFov; 2],
    /// Tracking origin offset in meters, engine axes.
    pub base_offset: Vec3,
    pub base_orientation: Quat,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default(), &DeviceDescription::default())
    }
}

impl SettingsSnapshot {
    pub fn from_config(config: &PipelineConfig, device: &DeviceDescription) -> Self {
        let mut settings = Self {
            pixel_density: config.pixel_density,
            pixel_density_min: config.pixel_density_min,
            pixel_density_max: config.pixel_density_max,
            pixel_density_adaptive: config.pixel_density_adaptive,
            stereo_layout: config.stereo_layout,
            near_clipping_plane: config.near_clipping_plane,
            far_clipping_plane: config.far_clipping_plane,
            render_target_size: Extent::default(),
            eye_viewports: [Rect::default(); 2],
            eye_fov: device.fov,
            base_offset: Vec3::ZERO,
            base_orientation: Quat::IDENTITY,
        };
        settings.update_stereo_params(device, None);
        settings
    }

    /// Sets the current density, widening the min/max range to include it.
    /// Non-finite densities are ignored.
    pub fn set_pixel_density(&mut self, density: f32) {
        if !density.is_finite() {
            warn!("ignoring pixel density {}", density);
            return;
        }
        let density = density.clamp(MIN_PIXEL_DENSITY, MAX_PIXEL_DENSITY);
        self.pixel_density = density;
        self.pixel_density_min = self.pixel_density_min.min(density);
        self.pixel_density_max = self.pixel_density_max.max(density);
    }

    /// Recomputes render-target size and eye viewports. With adaptive density
    /// the target is sized for the maximum density and the viewports shrink,
    /// so swapchains stay put while the ladder moves.
    pub fn update_stereo_params(&mut self, device: &DeviceDescription, adaptive_density: Option<f32>) {
        if self.pixel_density_adaptive {
            if let Some(density) = adaptive_density {
                self.pixel_density = density;
            }
        }
        // Tolerates an inverted range.
        self.pixel_density = self
            .pixel_density
            .max(self.pixel_density_min)
            .min(self.pixel_density_max);

        let target_density = if self.pixel_density_adaptive {
            self.pixel_density_max
        } else {
            self.pixel_density
        };
        let eye_width = scaled(device.eye_resolution.width, target_density);
        let eye_height = scaled(device.eye_resolution.height, target_density);

        let viewport_scale = if self.pixel_density_adaptive {
            self.pixel_density / self.pixel_density_max
        } else {
            1.0
        };
        let view_width = scaled(eye_width, viewport_scale);
        let view_height = scaled(eye_height, viewport_scale);

        match self.stereo_layout {
            StereoLayout::DoubleWide => {
                self.render_target_size = Extent::new(eye_width * 2, eye_height);
                self.eye_viewports = [
                    Rect::new(0, 0, view_width, view_height),
                    Rect::new(eye_width as i32, 0, view_width, view_height),
                ];
            }
            StereoLayout::Array => {
                self.render_target_size = Extent::new(eye_width, eye_height);
                self.eye_viewports = [Rect::new(0, 0, view_width, view_height); 2];
            }
        }
        self.eye_fov = device.fov;
    }

    pub fn eye_viewport(&self, eye: Eye) -> Rect {
        self.eye_viewports[eye.index()]
    }

    pub fn calibration(&self) -> Calibration {
        Calibration {
            base_offset: self.base_offset,
            base_orientation: self.base_orientation,
        }
    }

    /// Off-center reversed-Z projection for `eye` in right-handed view space
    /// (-Z forward). Near maps to depth 1; far maps to 0 or to infinity when
    /// no far plane is set.
    pub fn projection_matrix(&self, eye: Eye) -> Mat4 {
        let fov = self.eye_fov[eye.index()];
        let near = self.near_clipping_plane;
        let far = self.far_clipping_plane;

        let width = fov.left_tan + fov.right_tan;
        let height = fov.up_tan + fov.down_tan;
        let x_scale = 2.0 / width;
        let y_scale = 2.0 / height;
        let x_offset = (fov.right_tan - fov.left_tan) / width;
        let y_offset = (fov.up_tan - fov.down_tan) / height;

        let (m22, m32) = if far > near {
            (near / (far - near), near * far / (far - near))
        } else {
            (0.0, near)
        };

        Mat4::from_cols(
            Vec4::new(x_scale, 0.0, 0.0, 0.0),
            Vec4::new(0.0, y_scale, 0.0, 0.0),
            Vec4::new(x_offset, y_offset, m22, -1.0),
            Vec4::new(0.0, 0.0, m32, 0.0),
        )
    }
}

fn scaled(value: u32, factor: f32) -> u32 {
    ((value as f32 * factor).round() as u32).max(1)
}
