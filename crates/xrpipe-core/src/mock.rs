//! In-process compositor for tests, benches and the CLI.

use std::{
    collections::{BTreeSet, HashSet},
    sync::{Mutex, MutexGuard},
};

use tracing::debug;

use crate::{
    compositor::{LayerSubmission, NativeCompositor, SwapchainDesc},
    layer::LayerId,
    types::{CommandQueueHandle, NativePose, PoseStage, SwapchainHandle, TrackedNode},
    VrError, VrResult,
};

/// One recorded call into the compositor.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorCall {
    WaitForFrame(u64),
    AdvanceSimulation(u64),
    BeginFrame(u64),
    EndFrame { frame: u64, layers: Vec<LayerId> },
    CreateSwapchain(SwapchainHandle),
    DestroySwapchain(SwapchainHandle),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<CompositorCall>,
    submissions: Vec<(u64, Vec<LayerSubmission>)>,
    next_handle: u64,
    live: HashSet<SwapchainHandle>,
    created: usize,
    gpu_trace: Vec<f32>,
    gpu_cursor: usize,
    fail_begin: BTreeSet<u64>,
    fail_begin_every: Option<u64>,
    fail_end: BTreeSet<u64>,
    lose_device_on_end: Option<u64>,
    head_pose: Option<NativePose>,
}

/// Records every call and fails on demand. Defaults to a steady 5ms GPU time
/// and an identity head pose.
#[derive(Debug)]
pub struct MockCompositor {
    state: Mutex<MockState>,
}

impl Default for MockCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompositor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_handle: 1,
                gpu_trace: vec![5.0],
                head_pose: Some(NativePose::default()),
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_gpu_time(&self, ms: f32) {
        self.set_gpu_trace(vec![ms]);
    }

    /// GPU times returned in order, repeating from the start when exhausted.
    pub fn set_gpu_trace(&self, trace: Vec<f32>) {
        let mut state = self.lock();
        state.gpu_trace = trace;
        state.gpu_cursor = 0;
    }

    pub fn fail_begin_on(&self, frame: u64) {
        self.lock().fail_begin.insert(frame);
    }

    /// Fails begin-frame for every frame number divisible by `every`.
    pub fn fail_begin_every(&self, every: u64) {
        self.lock().fail_begin_every = (every > 0).then_some(every);
    }

    pub fn fail_end_on(&self, frame: u64) {
        self.lock().fail_end.insert(frame);
    }

    pub fn lose_device_on_end(&self, frame: u64) {
        self.lock().lose_device_on_end = Some(frame);
    }

    pub fn set_head_pose(&self, pose: Option<NativePose>) {
        self.lock().head_pose = pose;
    }

    pub fn calls(&self) -> Vec<CompositorCall> {
        self.lock().calls.clone()
    }

    /// Descriptor arrays passed to end-frame, by frame number.
    pub fn submissions(&self) -> Vec<(u64, Vec<LayerSubmission>)> {
        self.lock().submissions.clone()
    }

    pub fn submitted_frames(&self) -> Vec<u64> {
        self.lock().submissions.iter().map(|(n, _)| *n).collect()
    }

    pub fn live_swapchains(&self) -> usize {
        self.lock().live.len()
    }

    pub fn created_swapchains(&self) -> usize {
        self.lock().created
    }
}

impl NativeCompositor for MockCompositor {
    fn wait_for_frame(&self, frame_number: u64) -> VrResult<()> {
        self.lock().calls.push(CompositorCall::WaitForFrame(frame_number));
        Ok(())
    }

    fn advance_simulation(&self, frame_number: u64, _delta_seconds: f64) {
        self.lock()
            .calls
            .push(CompositorCall::AdvanceSimulation(frame_number));
    }

    fn query_pose(&self, node: TrackedNode, _stage: PoseStage) -> Option<NativePose> {
        match node {
            TrackedNode::Head | TrackedNode::EyeLeft | TrackedNode::EyeRight => {
                self.lock().head_pose
            }
            TrackedNode::HandLeft | TrackedNode::HandRight => None,
        }
    }

    fn begin_frame(&self, frame_number: u64, _queue: CommandQueueHandle) -> VrResult<()> {
        let mut state = self.lock();
        state.calls.push(CompositorCall::BeginFrame(frame_number));
        let scheduled = state
            .fail_begin_every
            .is_some_and(|every| frame_number % every == 0);
        if scheduled || state.fail_begin.contains(&frame_number) {
            debug!("mock: failing begin frame {}", frame_number);
            return Err(VrError::Adapter(format!(
                "begin frame {frame_number} rejected"
            )));
        }
        Ok(())
    }

    fn end_frame(
        &self,
        frame_number: u64,
        layers: &[LayerSubmission],
        _queue: CommandQueueHandle,
    ) -> VrResult<()> {
        let mut state = self.lock();
        state.calls.push(CompositorCall::EndFrame {
            frame: frame_number,
            layers: layers.iter().map(|l| l.layer_id).collect(),
        });
        if state.lose_device_on_end == Some(frame_number) {
            return Err(VrError::DeviceLost("display disconnected".into()));
        }
        if state.fail_end.contains(&frame_number) {
            return Err(VrError::Adapter(format!("end frame {frame_number} rejected")));
        }
        state.submissions.push((frame_number, layers.to_vec()));
        Ok(())
    }

    fn query_gpu_frame_time_ms(&self) -> f32 {
        let mut state = self.lock();
        if state.gpu_trace.is_empty() {
            return 0.0;
        }
        let index = state.gpu_cursor % state.gpu_trace.len();
        state.gpu_cursor += 1;
        state.gpu_trace[index]
    }

    fn create_swapchain(&self, _desc: &SwapchainDesc) -> VrResult<SwapchainHandle> {
        let mut state = self.lock();
        let handle = SwapchainHandle(state.next_handle);
        state.next_handle += 1;
        state.created += 1;
        state.live.insert(handle);
        state.calls.push(CompositorCall::CreateSwapchain(handle));
        Ok(handle)
    }

    fn destroy_swapchain(&self, handle: SwapchainHandle) {
        let mut state = self.lock();
        state.live.remove(&handle);
        state.calls.push(CompositorCall::DestroySwapchain(handle));
    }
}
