//! Frame pipeline coordinator.
//!
//! The coordinator lives in the game context (the host's calling thread) and
//! owns the authoritative settings and layer map. Render and submission each
//! run on their own [`StageContext`]; frames reach them through single-slot
//! hand-off channels, and every stage works on its own clone.
//!
//! Finish-submission requests are routed through the render queue so they
//! can never overtake the begin-submission request the render stage posted.

mod render;
mod submission;

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use glam::{Quat, Vec3};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    adaptive::{AdaptiveDensity, Adjustment},
    compositor::NativeCompositor,
    config::PipelineConfig,
    frame::{Frame, ShowFlags},
    layer::{Layer, LayerDesc, LayerId, LayerShape, EYE_LAYER_ID},
    pose::{convert_pose, renormalize, to_engine_quat, to_engine_vector, yaw_only},
    settings::SettingsSnapshot,
    stage::{handoff, HandoffSender, StageContext},
    status::StatusCell,
    types::{DeviceDescription, Pose, PoseStage, TrackedNode},
    VrError, VrResult,
};

use render::RenderStage;
use submission::SubmissionStage;

/// Counters accumulated across all three contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_started: u64,
    pub frames_rendered: u64,
    pub frames_submitted: u64,
    pub wait_failures: u64,
    pub begin_failures: u64,
    pub end_failures: u64,
    pub layers_fresh: u64,
    pub layers_reused: u64,
    pub layers_reallocated: u64,
    pub layer_init_failures: u64,
    pub density_changes: u64,
    pub invariant_violations: u64,
}

pub(crate) type SharedStats = Arc<Mutex<PipelineStats>>;

/// Frame number held by each context, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveFrames {
    pub game: Option<u64>,
    pub render: Option<u64>,
    pub submission: Option<u64>,
}

impl ActiveFrames {
    pub fn is_idle(&self) -> bool {
        self.game.is_none() && self.render.is_none() && self.submission.is_none()
    }
}

/// What crosses a stage boundary: value copies only.
pub(crate) struct FrameSnapshot {
    pub(crate) settings: SettingsSnapshot,
    pub(crate) frame: Frame,
    pub(crate) layers: Vec<Layer>,
}

/// Logs a broken pipeline invariant and skips the offending step. Fatal in
/// debug builds.
pub(crate) fn invariant_violation(stats: &SharedStats, what: &str) {
    error!("pipeline invariant violated: {}", what);
    if let Ok(mut stats) = stats.lock() {
        stats.invariant_violations += 1;
    }
    debug_assert!(false, "pipeline invariant violated: {what}");
}

pub struct FramePipeline {
    compositor: Arc<dyn NativeCompositor>,
    device: DeviceDescription,

    // Game context
    settings: SettingsSnapshot,
    layers: BTreeMap<LayerId, Layer>,
    next_layer_id: LayerId,
    frame: Option<Frame>,
    next_frame_to_render: Option<Frame>,
    last_frame_to_render: Option<u64>,
    next_frame_number: u64,
    last_game_frame_number: u64,
    world_to_meters: f32,
    show_flags: ShowFlags,
    splash_visible: bool,
    adaptive: AdaptiveDensity,
    last_render_start: Option<Instant>,

    // Stage bookkeeping, as seen from the game context
    render_active: bool,
    /// The active render frame was already handed on, or staged for it.
    render_handed_on: bool,
    submission_active: bool,
    /// A staged frame waits in the render context for submission to finish.
    submission_pending: bool,
    closed: bool,

    to_render: HandoffSender<FrameSnapshot>,
    render: StageContext<RenderStage>,
    submission: StageContext<SubmissionStage>,
    stats: SharedStats,
}

impl FramePipeline {
    pub fn new(
        compositor: Arc<dyn NativeCompositor>,
        device: DeviceDescription,
        config: &PipelineConfig,
        status: StatusCell,
    ) -> VrResult<Self> {
        let mut config = config.clone();
        config.validate()?;
        let settings = SettingsSnapshot::from_config(&config, &device);
        let stats = SharedStats::default();

        let eye = Layer::new(
            EYE_LAYER_ID,
            LayerDesc::eye(settings.render_target_size, settings.stereo_layout),
        )?;
        let mut layers = BTreeMap::new();
        layers.insert(EYE_LAYER_ID, eye);

        let (to_render, render_inbox) = handoff();
        let (to_submission, submission_inbox) = handoff();

        let submission = StageContext::spawn(
            "submission",
            SubmissionStage::new(
                Arc::clone(&compositor),
                submission_inbox,
                Arc::clone(&stats),
                status,
            ),
        )?;
        let render = StageContext::spawn(
            "render",
            RenderStage::new(
                Arc::clone(&compositor),
                render_inbox,
                to_submission,
                submission.sender(),
                Arc::clone(&stats),
            ),
        )?;

        Ok(Self {
            compositor,
            device,
            settings,
            layers,
            next_layer_id: EYE_LAYER_ID + 1,
            frame: None,
            next_frame_to_render: None,
            last_frame_to_render: None,
            next_frame_number: 1,
            last_game_frame_number: 0,
            world_to_meters: config.world_to_meters,
            show_flags: ShowFlags::default(),
            splash_visible: false,
            adaptive: AdaptiveDensity::new(config.adaptive.clone()),
            last_render_start: None,
            render_active: false,
            render_handed_on: false,
            submission_active: false,
            submission_pending: false,
            closed: false,
            to_render,
            render,
            submission,
            stats,
        })
    }

    /// Starts a game frame unless one is already active. Returns whether a new
    /// frame was created.
    pub fn start_game_frame(&mut self) -> bool {
        if self.frame.is_some() {
            return false;
        }

        let number = self.next_frame_number.max(self.last_game_frame_number + 1);
        self.next_frame_number = number;
        self.last_game_frame_number = number;

        self.refresh_settings();

        let frame = Frame::new(number, self.world_to_meters, self.show_flags);
        self.next_frame_to_render = Some(frame.clone());
        self.frame = Some(frame);
        if let Ok(mut stats) = self.stats.lock() {
            stats.frames_started += 1;
        }
        debug!("game frame {} started", number);
        true
    }

    /// Releases the game frame. A no-op when none is active.
    pub fn finish_game_frame(&mut self) -> bool {
        match self.frame.take() {
            Some(frame) => {
                debug!("game frame {} finished", frame.frame_number);
                true
            }
            None => false,
        }
    }

    /// Hands the latest game frame to the render context. Returns `Ok(false)`
    /// when there is nothing new to render. Blocks on the compositor's frame
    /// pacing.
    pub fn start_render_frame(&mut self) -> VrResult<bool> {
        let Some(mut frame) = self.next_frame_to_render.clone() else {
            return Ok(false);
        };
        let number = frame.frame_number;
        if self.last_frame_to_render == Some(number) {
            return Ok(false);
        }
        if self.render_active {
            invariant_violation(
                &self.stats,
                &format!("render frame {number} started before the previous one finished"),
            );
            return Ok(false);
        }
        self.last_frame_to_render = Some(number);
        frame.splash_shown = self.splash_visible;

        if frame.should_submit() {
            if let Err(err) = self.compositor.wait_for_frame(number) {
                warn!("wait for frame {} failed: {}", number, err);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.wait_failures += 1;
                }
            }
            self.next_frame_number = self.next_frame_number.max(number) + 1;
        }

        let snapshot = FrameSnapshot {
            settings: self.settings.clone(),
            frame: frame.clone(),
            layers: self.layers.values().cloned().collect(),
        };
        for layer in self.layers.values_mut() {
            layer.clear_texture_update();
        }

        self.to_render.send(snapshot)?;
        self.render.post(RenderStage::begin_frame)?;
        self.render_active = true;
        self.render_handed_on = false;

        let now = Instant::now();
        if !frame.splash_shown {
            let delta = self
                .last_render_start
                .map(|t| now.duration_since(t).as_secs_f64())
                .unwrap_or(0.0);
            self.compositor.advance_simulation(number, delta);
        }
        self.last_render_start = Some(now);

        if self.settings.pixel_density_adaptive {
            self.sample_gpu_time();
        }
        Ok(true)
    }

    /// Hands the render frame on to the submission context. While the
    /// submission context still holds the previous frame, the render frame
    /// is staged and handed on once that frame finishes.
    pub fn start_rhi_frame(&mut self) -> VrResult<bool> {
        if !self.render_active {
            return Ok(false);
        }
        if self.render_handed_on || self.submission_pending {
            invariant_violation(
                &self.stats,
                "submission frame started before the previous one finished",
            );
            return Ok(false);
        }
        if self.submission_active {
            self.render.post(RenderStage::stage_submission)?;
            self.submission_pending = true;
            debug!("submission context busy, staging render frame");
        } else {
            self.render.post(RenderStage::start_submission)?;
            self.submission_active = true;
        }
        self.render_handed_on = true;
        Ok(true)
    }

    pub fn finish_render_frame(&mut self) -> VrResult<bool> {
        if !self.render_active {
            debug!("finish render frame with no render frame active");
            return Ok(false);
        }
        self.render.post(RenderStage::finish_frame)?;
        self.render_active = false;
        self.render_handed_on = false;
        Ok(true)
    }

    pub fn finish_rhi_frame(&mut self) -> VrResult<bool> {
        if !self.submission_active {
            debug!("finish submission frame with no submission frame active");
            return Ok(false);
        }
        self.render.post(RenderStage::forward_finish_submission)?;
        self.submission_active = false;
        if self.submission_pending {
            self.render.post(RenderStage::release_submission)?;
            self.submission_pending = false;
            self.submission_active = true;
        }
        Ok(true)
    }

    fn sample_gpu_time(&mut self) {
        let gpu_ms = self.compositor.query_gpu_frame_time_ms();
        match self.adaptive.sample(gpu_ms) {
            Adjustment::StepUp(n) | Adjustment::StepDown(n) if n > 0 => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.density_changes += 1;
                }
            }
            _ => {}
        }
    }

    /// Recomputes stereo parameters and keeps the eye layer sized to the
    /// render target.
    fn refresh_settings(&mut self) {
        let density = self
            .settings
            .pixel_density_adaptive
            .then(|| self.adaptive.density());
        self.settings.update_stereo_params(&self.device, density);

        let Some(eye) = self.layers.get(&EYE_LAYER_ID) else {
            error!("eye layer missing from layer map");
            return;
        };
        let wanted = LayerDesc {
            shape: LayerShape::Eye {
                layout: self.settings.stereo_layout,
            },
            texture_size: self.settings.render_target_size,
            ..eye.desc().clone()
        };
        if *eye.desc() != wanted {
            let mut replacement = eye.clone();
            match replacement.set_desc(wanted) {
                Ok(()) => {
                    debug!(
                        "eye layer resized to {}x{}",
                        self.settings.render_target_size.width,
                        self.settings.render_target_size.height
                    );
                    self.layers.insert(EYE_LAYER_ID, replacement);
                }
                Err(err) => error!("eye layer update rejected: {}", err),
            }
        }
    }

    // Layers

    pub fn create_layer(&mut self, desc: LayerDesc) -> VrResult<LayerId> {
        if desc.is_eye() {
            return Err(VrError::InvalidLayer(
                "the eye layer is created by the device".into(),
            ));
        }
        self.check_supported(&desc)?;

        let id = self.next_layer_id;
        let layer = Layer::new(id, desc)?;
        self.layers.insert(id, layer);
        self.next_layer_id += 1;
        debug!("created layer {}", id);
        Ok(id)
    }

    /// Removes a layer. Its swapchain goes away once no in-flight frame still
    /// references it. The eye layer cannot be destroyed.
    pub fn destroy_layer(&mut self, id: LayerId) -> bool {
        if id == EYE_LAYER_ID {
            warn!("refusing to destroy the eye layer");
            return false;
        }
        let removed = self.layers.remove(&id).is_some();
        if removed {
            debug!("destroyed layer {}", id);
        }
        removed
    }

    /// Replaces a layer's descriptor with a new layer value. Frames already
    /// handed to other stages keep the old one.
    pub fn set_layer_desc(&mut self, id: LayerId, desc: LayerDesc) -> VrResult<()> {
        let existing = self.layers.get(&id).ok_or(VrError::UnknownLayer(id))?;
        self.check_supported(&desc)?;
        let mut replacement = existing.clone();
        replacement.set_desc(desc)?;
        self.layers.insert(id, replacement);
        Ok(())
    }

    pub fn layer_desc(&self, id: LayerId) -> Option<LayerDesc> {
        self.layers.get(&id).map(|layer| layer.desc().clone())
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.keys().copied().collect()
    }

    pub fn mark_texture_for_update(&mut self, id: LayerId) -> VrResult<()> {
        let layer = self.layers.get_mut(&id).ok_or(VrError::UnknownLayer(id))?;
        layer.mark_texture_for_update();
        Ok(())
    }

    fn check_supported(&self, desc: &LayerDesc) -> VrResult<()> {
        if matches!(desc.shape, LayerShape::Cubemap) && !self.device.supports_cubemap_layers {
            return Err(VrError::InvalidLayer(
                "cubemap layers are not supported by this device".into(),
            ));
        }
        Ok(())
    }

    // Settings and calibration

    pub fn settings(&self) -> &SettingsSnapshot {
        &self.settings
    }

    pub fn device(&self) -> &DeviceDescription {
        &self.device
    }

    pub fn set_pixel_density(&mut self, density: f32) {
        self.settings.set_pixel_density(density);
    }

    pub fn set_adaptive_density(&mut self, enabled: bool) {
        if enabled && !self.settings.pixel_density_adaptive {
            self.adaptive.reset();
        }
        self.settings.pixel_density_adaptive = enabled;
    }

    pub fn adaptive(&self) -> &AdaptiveDensity {
        &self.adaptive
    }

    pub fn set_world_to_meters(&mut self, world_to_meters: f32) {
        if world_to_meters.is_finite() && world_to_meters > 0.0 {
            self.world_to_meters = world_to_meters;
        } else {
            warn!("ignoring world_to_meters {}", world_to_meters);
        }
    }

    pub fn set_show_flags(&mut self, flags: ShowFlags) {
        self.show_flags = flags;
    }

    pub fn set_splash_visible(&mut self, visible: bool) {
        if visible != self.splash_visible {
            info!("splash {}", if visible { "shown" } else { "hidden" });
        }
        self.splash_visible = visible;
    }

    pub fn splash_visible(&self) -> bool {
        self.splash_visible
    }

    /// Base offset in meters, engine axes.
    pub fn set_base_offset(&mut self, offset: Vec3) {
        self.settings.base_offset = offset;
    }

    pub fn set_base_orientation(&mut self, orientation: Quat) {
        self.settings.base_orientation = renormalize(orientation);
    }

    /// Recenters on the current head pose so it reads as the origin facing
    /// `yaw` radians.
    pub fn reset_orientation_and_position(&mut self, yaw: f32) -> bool {
        let Some(native) = self.compositor.query_pose(TrackedNode::Head, PoseStage::Game) else {
            debug!("head pose unavailable, keeping calibration");
            return false;
        };
        let head_yaw = yaw_only(to_engine_quat(native.orientation));
        self.settings.base_orientation = renormalize(head_yaw * Quat::from_rotation_z(-yaw));
        self.settings.base_offset = to_engine_vector(native.position);
        true
    }

    pub fn current_pose(&self, node: TrackedNode) -> Option<Pose> {
        match self.compositor.query_pose(node, PoseStage::Game) {
            Some(native) => Some(convert_pose(
                &native,
                &self.settings.calibration(),
                self.world_to_meters,
            )),
            None => {
                debug!("no valid pose for {:?}", node);
                None
            }
        }
    }

    // Introspection

    pub fn stats(&self) -> PipelineStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn next_frame_number(&self) -> u64 {
        self.next_frame_number
    }

    pub fn game_frame_number(&self) -> Option<u64> {
        self.frame.as_ref().map(|f| f.frame_number)
    }

    /// Waits until both worker contexts have drained their queues.
    pub fn wait_idle(&self) -> VrResult<()> {
        self.render.flush()?;
        self.submission.flush()
    }

    pub fn active_frames(&self) -> VrResult<ActiveFrames> {
        self.wait_idle()?;
        Ok(ActiveFrames {
            game: self.game_frame_number(),
            render: self.render.query(|r| r.frame_number())?,
            submission: self.submission.query(|s| s.frame_number())?,
        })
    }

    /// Layer ids the render context currently holds, in order.
    pub fn render_layer_ids(&self) -> VrResult<Vec<LayerId>> {
        self.render
            .query(|r| r.layers().iter().map(Layer::id).collect())
    }

    /// Drains both worker contexts, drops every per-stage clone and joins the
    /// workers. Frames still in flight are discarded without submission.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(err) = self.render.flush() {
            warn!("render drain failed: {}", err);
        }
        if let Err(err) = self.submission.flush() {
            warn!("submission drain failed: {}", err);
        }
        if let Err(err) = self.render.post(RenderStage::reset) {
            warn!("render reset failed: {}", err);
        }
        if let Err(err) = self.submission.post(SubmissionStage::reset) {
            warn!("submission reset failed: {}", err);
        }

        // Render first: it holds the submission queue's sender.
        drop(self.render.shutdown());
        drop(self.submission.shutdown());

        self.frame = None;
        self.next_frame_to_render = None;
        self.render_active = false;
        self.render_handed_on = false;
        self.submission_active = false;
        self.submission_pending = false;
        self.layers.retain(|id, _| *id == EYE_LAYER_ID);
        info!("frame pipeline shut down after {} frames", self.last_game_frame_number);
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
