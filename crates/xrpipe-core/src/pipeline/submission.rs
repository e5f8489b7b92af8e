//! Submission-context state: begin/end frame against the native compositor.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{invariant_violation, FrameSnapshot, SharedStats};
use crate::{
    compositor::{LayerSubmission, NativeCompositor},
    frame::Frame,
    layer::{submission_order, Layer},
    settings::SettingsSnapshot,
    stage::HandoffReceiver,
    status::StatusCell,
    VrError,
};

pub(crate) struct SubmissionStage {
    compositor: Arc<dyn NativeCompositor>,
    inbox: HandoffReceiver<FrameSnapshot>,
    settings: Option<SettingsSnapshot>,
    frame: Option<Frame>,
    layers: Vec<Layer>,
    /// Whether begin-frame succeeded for the active frame.
    begun: bool,
    last_finished: u64,
    stats: SharedStats,
    status: StatusCell,
}

impl SubmissionStage {
    pub(crate) fn new(
        compositor: Arc<dyn NativeCompositor>,
        inbox: HandoffReceiver<FrameSnapshot>,
        stats: SharedStats,
        status: StatusCell,
    ) -> Self {
        Self {
            compositor,
            inbox,
            settings: None,
            frame: None,
            layers: Vec::new(),
            begun: false,
            last_finished: 0,
            stats,
            status,
        }
    }

    pub(crate) fn frame_number(&self) -> Option<u64> {
        self.frame.as_ref().map(|f| f.frame_number)
    }

    pub(crate) fn begin_frame(&mut self) {
        let Some(snapshot) = self.inbox.take() else {
            invariant_violation(&self.stats, "submission stage started without a frame");
            return;
        };
        let number = snapshot.frame.frame_number;
        if let Some(active) = &self.frame {
            invariant_violation(
                &self.stats,
                &format!(
                    "submission stage got frame {} while frame {} is active",
                    number, active.frame_number
                ),
            );
            return;
        }
        if number <= self.last_finished {
            invariant_violation(
                &self.stats,
                &format!(
                    "submission stage got frame {} after finishing {}",
                    number, self.last_finished
                ),
            );
            return;
        }

        self.begun = false;
        if snapshot.frame.should_submit() {
            match self
                .compositor
                .begin_frame(number, self.compositor.command_queue())
            {
                Ok(()) => self.begun = true,
                Err(err) => {
                    warn!("begin frame {} failed: {}", number, err);
                    self.record_failure(&err, |s| s.begin_failures += 1);
                }
            }
        }

        self.settings = Some(snapshot.settings);
        self.frame = Some(snapshot.frame);
        self.layers = snapshot.layers;
    }

    /// Submits the layers and releases the frame, whether or not the
    /// compositor accepted it.
    pub(crate) fn finish_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            invariant_violation(&self.stats, "submission stage finished without a frame");
            return;
        };
        let settings = self.settings.take();
        let mut layers = std::mem::take(&mut self.layers);
        let number = frame.frame_number;

        if frame.should_submit() {
            if let (true, Some(settings)) = (self.begun, settings.as_ref()) {
                layers.sort_by(submission_order);
                let descriptors: Vec<LayerSubmission> = layers
                    .iter()
                    .filter_map(|layer| layer.submission(settings, &frame))
                    .collect();

                match self
                    .compositor
                    .end_frame(number, &descriptors, self.compositor.command_queue())
                {
                    Ok(()) => {
                        if let Ok(mut stats) = self.stats.lock() {
                            stats.frames_submitted += 1;
                        }
                        debug!("submitted frame {} ({} layers)", number, descriptors.len());
                    }
                    Err(err) => {
                        warn!("end frame {} failed: {}", number, err);
                        self.record_failure(&err, |s| s.end_failures += 1);
                    }
                }
            } else {
                debug!("skipping end frame {}: begin frame did not succeed", number);
            }

            for layer in &layers {
                layer.advance_swapchain();
            }
        }

        self.begun = false;
        self.last_finished = number;
    }

    pub(crate) fn reset(&mut self) {
        while self.inbox.take().is_some() {}
        self.frame = None;
        self.settings = None;
        self.layers.clear();
        self.begun = false;
    }

    fn record_failure(&self, err: &VrError, count: impl FnOnce(&mut super::PipelineStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            count(&mut stats);
        }
        if let VrError::DeviceLost(reason) = err {
            self.status.mark_lost(reason.clone());
        }
    }
}
