//! Render-context state: the frame being drawn and the layers it draws into.

use std::sync::Arc;

use tracing::{debug, error};

use super::{invariant_violation, submission::SubmissionStage, FrameSnapshot, SharedStats};
use crate::{
    compositor::NativeCompositor,
    frame::Frame,
    layer::{merge_layers, Layer, EYE_LAYER_ID},
    settings::SettingsSnapshot,
    stage::{HandoffReceiver, HandoffSender, StageSender},
};

pub(crate) struct RenderStage {
    compositor: Arc<dyn NativeCompositor>,
    inbox: HandoffReceiver<FrameSnapshot>,
    outbox: HandoffSender<FrameSnapshot>,
    submission: StageSender<SubmissionStage>,
    settings: Option<SettingsSnapshot>,
    frame: Option<Frame>,
    /// Submission copy of a frame waiting for the submission context to free up.
    pending: Option<FrameSnapshot>,
    /// Kept between frames so the next merge can carry swapchains over.
    layers: Vec<Layer>,
    last_finished: u64,
    stats: SharedStats,
}

impl RenderStage {
    pub(crate) fn new(
        compositor: Arc<dyn NativeCompositor>,
        inbox: HandoffReceiver<FrameSnapshot>,
        outbox: HandoffSender<FrameSnapshot>,
        submission: StageSender<SubmissionStage>,
        stats: SharedStats,
    ) -> Self {
        Self {
            compositor,
            inbox,
            outbox,
            submission,
            settings: None,
            frame: None,
            pending: None,
            layers: Vec::new(),
            last_finished: 0,
            stats,
        }
    }

    pub(crate) fn frame_number(&self) -> Option<u64> {
        self.frame.as_ref().map(|f| f.frame_number)
    }

    pub(crate) fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn begin_frame(&mut self) {
        let Some(snapshot) = self.inbox.take() else {
            invariant_violation(&self.stats, "render stage started without a frame");
            return;
        };
        let number = snapshot.frame.frame_number;

        if let Some(active) = &self.frame {
            invariant_violation(
                &self.stats,
                &format!(
                    "render stage got frame {} while frame {} is active",
                    number, active.frame_number
                ),
            );
            return;
        }
        if number <= self.last_finished {
            invariant_violation(
                &self.stats,
                &format!(
                    "render stage got frame {} after finishing {}",
                    number, self.last_finished
                ),
            );
            return;
        }

        let previous = std::mem::take(&mut self.layers);
        let (layers, merge) = merge_layers(snapshot.layers, &previous, &self.compositor);
        drop(previous);
        debug_assert_eq!(layers.first().map(Layer::id), Some(EYE_LAYER_ID));
        if layers.first().map(Layer::id) != Some(EYE_LAYER_ID) {
            error!("frame {} has no eye layer", number);
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.layers_fresh += merge.fresh as u64;
            stats.layers_reused += merge.reused as u64;
            stats.layers_reallocated += merge.reallocated as u64;
            stats.layer_init_failures += merge.failed as u64;
        }
        debug!(
            "render frame {}: {} layers ({} fresh, {} reused, {} dropped)",
            number,
            layers.len(),
            merge.fresh,
            merge.reused,
            merge.dropped
        );

        self.layers = layers;
        self.settings = Some(snapshot.settings);
        self.frame = Some(snapshot.frame);
    }

    /// Clones the render-side state and hands it to the submission context.
    pub(crate) fn start_submission(&mut self) {
        self.stage_submission();
        self.release_submission();
    }

    /// Clones the render-side state for the submission context without
    /// handing it over yet.
    pub(crate) fn stage_submission(&mut self) {
        let (Some(frame), Some(settings)) = (&self.frame, &self.settings) else {
            invariant_violation(&self.stats, "submission started without a render frame");
            return;
        };
        if let Some(pending) = &self.pending {
            invariant_violation(
                &self.stats,
                &format!(
                    "render stage staged frame {} while frame {} is waiting",
                    frame.frame_number, pending.frame.frame_number
                ),
            );
            return;
        }
        self.pending = Some(FrameSnapshot {
            settings: settings.clone(),
            frame: frame.clone(),
            layers: self.layers.clone(),
        });
    }

    /// Hands the staged frame to the submission context.
    pub(crate) fn release_submission(&mut self) {
        let Some(snapshot) = self.pending.take() else {
            return;
        };
        let number = snapshot.frame.frame_number;

        let posted = self
            .outbox
            .send(snapshot)
            .and_then(|()| self.submission.post(SubmissionStage::begin_frame));
        if let Err(err) = posted {
            error!("failed to hand frame {} to submission: {}", number, err);
        }
    }

    pub(crate) fn forward_finish_submission(&mut self) {
        if let Err(err) = self.submission.post(SubmissionStage::finish_frame) {
            error!("failed to finish submission: {}", err);
        }
    }

    pub(crate) fn finish_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            invariant_violation(&self.stats, "render stage finished without a frame");
            return;
        };
        if frame.rendering_enabled() {
            for layer in &mut self.layers {
                layer.update_texture();
            }
        }
        self.settings = None;
        self.last_finished = frame.frame_number;
        if let Ok(mut stats) = self.stats.lock() {
            stats.frames_rendered += 1;
        }
        debug!("render frame {} finished", frame.frame_number);
    }

    pub(crate) fn reset(&mut self) {
        while self.inbox.take().is_some() {}
        self.pending = None;
        self.frame = None;
        self.settings = None;
        for layer in &mut self.layers {
            layer.release();
        }
        self.layers.clear();
    }
}
