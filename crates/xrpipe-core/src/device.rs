//! Device context: the object the application host drives.

use std::sync::Arc;

use glam::{Quat, Vec3};
use tracing::{info, warn};

use crate::{
    compositor::NativeCompositor,
    config::PipelineConfig,
    frame::ShowFlags,
    layer::{LayerDesc, LayerId},
    pipeline::{ActiveFrames, FramePipeline, PipelineStats},
    settings::SettingsSnapshot,
    status::{DeviceStatus, StatusCell},
    types::{DeviceDescription, Pose, TrackedNode},
    VrError, VrResult,
};

/// One head-mounted display. All methods are called from the game context.
pub struct HmdDevice {
    compositor: Arc<dyn NativeCompositor>,
    description: DeviceDescription,
    config: PipelineConfig,
    pipeline: Option<FramePipeline>,
    status: StatusCell,
}

impl HmdDevice {
    pub fn new(
        compositor: Arc<dyn NativeCompositor>,
        description: DeviceDescription,
        config: PipelineConfig,
    ) -> Self {
        Self {
            compositor,
            description,
            config,
            pipeline: None,
            status: StatusCell::default(),
        }
    }

    /// Starts the worker contexts and creates the eye layer.
    pub fn init(&mut self) -> VrResult<()> {
        if self.pipeline.is_some() {
            return Ok(());
        }
        let pipeline = FramePipeline::new(
            Arc::clone(&self.compositor),
            self.description.clone(),
            &self.config,
            self.status.clone(),
        )?;
        info!(
            "device initialized: {}x{} per eye at {} Hz, render target {}x{}",
            self.description.eye_resolution.width,
            self.description.eye_resolution.height,
            self.description.refresh_hz,
            pipeline.settings().render_target_size.width,
            pipeline.settings().render_target_size.height
        );
        self.pipeline = Some(pipeline);
        self.status.set(DeviceStatus::Running);
        Ok(())
    }

    /// Drains and stops the pipeline. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.shutdown();
            self.status.set(DeviceStatus::Idle);
            info!("device released");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }

    fn pipeline(&self) -> VrResult<&FramePipeline> {
        self.pipeline.as_ref().ok_or(VrError::NotInitialized)
    }

    fn pipeline_mut(&mut self) -> VrResult<&mut FramePipeline> {
        self.pipeline.as_mut().ok_or(VrError::NotInitialized)
    }

    // Host entry points

    pub fn on_game_tick(&mut self) -> VrResult<bool> {
        Ok(self.pipeline_mut()?.start_game_frame())
    }

    pub fn on_game_tick_end(&mut self) -> VrResult<bool> {
        Ok(self.pipeline_mut()?.finish_game_frame())
    }

    /// Starts the render frame and, if one started, the submission frame.
    pub fn on_render_dispatch(&mut self) -> VrResult<bool> {
        let pipeline = self.pipeline_mut()?;
        let started = pipeline.start_render_frame()?;
        if started {
            pipeline.start_rhi_frame()?;
        }
        Ok(started)
    }

    pub fn on_render_complete(&mut self) -> VrResult<bool> {
        self.pipeline_mut()?.finish_render_frame()
    }

    pub fn on_submission_complete(&mut self) -> VrResult<bool> {
        self.pipeline_mut()?.finish_rhi_frame()
    }

    // Layers

    pub fn create_layer(&mut self, desc: LayerDesc) -> VrResult<LayerId> {
        self.pipeline_mut()?.create_layer(desc)
    }

    pub fn destroy_layer(&mut self, id: LayerId) -> VrResult<bool> {
        Ok(self.pipeline_mut()?.destroy_layer(id))
    }

    pub fn set_layer_desc(&mut self, id: LayerId, desc: LayerDesc) -> VrResult<()> {
        self.pipeline_mut()?.set_layer_desc(id, desc)
    }

    pub fn layer_desc(&self, id: LayerId) -> VrResult<LayerDesc> {
        self.pipeline()?
            .layer_desc(id)
            .ok_or(VrError::UnknownLayer(id))
    }

    pub fn layer_ids(&self) -> VrResult<Vec<LayerId>> {
        Ok(self.pipeline()?.layer_ids())
    }

    pub fn mark_texture_for_update(&mut self, id: LayerId) -> VrResult<()> {
        self.pipeline_mut()?.mark_texture_for_update(id)
    }

    // Settings and tracking

    pub fn settings(&self) -> VrResult<SettingsSnapshot> {
        Ok(self.pipeline()?.settings().clone())
    }

    pub fn set_pixel_density(&mut self, density: f32) -> VrResult<()> {
        self.pipeline_mut()?.set_pixel_density(density);
        Ok(())
    }

    pub fn set_adaptive_density(&mut self, enabled: bool) -> VrResult<()> {
        self.pipeline_mut()?.set_adaptive_density(enabled);
        Ok(())
    }

    /// Current rung and density of the adaptive ladder.
    pub fn adaptive_rung(&self) -> VrResult<(usize, f32)> {
        let adaptive = self.pipeline()?.adaptive();
        Ok((adaptive.rung(), adaptive.density()))
    }

    pub fn set_world_to_meters(&mut self, world_to_meters: f32) -> VrResult<()> {
        self.pipeline_mut()?.set_world_to_meters(world_to_meters);
        Ok(())
    }

    pub fn set_show_flags(&mut self, flags: ShowFlags) -> VrResult<()> {
        self.pipeline_mut()?.set_show_flags(flags);
        Ok(())
    }

    pub fn set_splash_visible(&mut self, visible: bool) -> VrResult<()> {
        self.pipeline_mut()?.set_splash_visible(visible);
        Ok(())
    }

    pub fn set_base_offset(&mut self, offset: Vec3) -> VrResult<()> {
        self.pipeline_mut()?.set_base_offset(offset);
        Ok(())
    }

    pub fn set_base_orientation(&mut self, orientation: Quat) -> VrResult<()> {
        self.pipeline_mut()?.set_base_orientation(orientation);
        Ok(())
    }

    pub fn reset_orientation_and_position(&mut self, yaw: f32) -> VrResult<bool> {
        Ok(self.pipeline_mut()?.reset_orientation_and_position(yaw))
    }

    pub fn current_pose(&self, node: TrackedNode) -> VrResult<Option<Pose>> {
        Ok(self.pipeline()?.current_pose(node))
    }

    // Status

    pub fn status(&self) -> DeviceStatus {
        self.status.get()
    }

    /// Reports a device loss once. The host should `release` and `init`.
    pub fn take_device_lost(&self) -> Option<String> {
        let reason = self.status.take_lost()?;
        warn!("device lost: {}", reason);
        Some(reason)
    }

    pub fn stats(&self) -> VrResult<PipelineStats> {
        Ok(self.pipeline()?.stats())
    }

    pub fn active_frames(&self) -> VrResult<ActiveFrames> {
        self.pipeline()?.active_frames()
    }

    pub fn next_frame_number(&self) -> VrResult<u64> {
        Ok(self.pipeline()?.next_frame_number())
    }

    pub fn render_layer_ids(&self) -> VrResult<Vec<LayerId>> {
        self.pipeline()?.render_layer_ids()
    }

    pub fn wait_idle(&self) -> VrResult<()> {
        self.pipeline()?.wait_idle()
    }

    /// Runs every host entry point for one frame, in order.
    pub fn run_frame(&mut self) -> VrResult<()> {
        self.on_game_tick()?;
        self.on_render_dispatch()?;
        self.on_submission_complete()?;
        self.on_render_complete()?;
        self.on_game_tick_end()?;
        Ok(())
    }
}

impl Drop for HmdDevice {
    fn drop(&mut self) {
        self.release();
    }
}
