use crate::{
    layer::{LayerFlags, LayerId, LayerShape, PositionType},
    types::{
        CommandQueueHandle, EyeFov, Extent, NativePose, Pose, PoseStage, Rect, SwapchainHandle,
        TrackedNode,
    },
    VrResult,
};

/// Allocation request for a ring of compositor-visible textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub extent: Extent,
    /// Slices per image: 2 for array-layout eye buffers, 6 for cubemaps.
    pub array_size: u32,
    pub image_count: u32,
    pub cubemap: bool,
}

/// One entry of the array handed to [`NativeCompositor::end_frame`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSubmission {
    pub layer_id: LayerId,
    pub shape: LayerShape,
    pub position_type: PositionType,
    /// Layer pose in meters, relative to the space implied by `position_type`.
    pub pose: Pose,
    pub scale: glam::Vec3,
    pub priority: i32,
    pub flags: LayerFlags,
    pub swapchain: SwapchainHandle,
    pub image_index: u32,
    /// Eye layers only.
    pub viewports: Option<[Rect; 2]>,
    /// Eye layers only.
    pub fov: Option<[EyeFov; 2]>,
}

/// The vendor compositor the pipeline drives. Implementations must be callable
/// from the game, render and submission contexts concurrently.
pub trait NativeCompositor: Send + Sync {
    // Game context
    fn wait_for_frame(&self, frame_number: u64) -> VrResult<()>;
    fn advance_simulation(&self, frame_number: u64, delta_seconds: f64);
    /// `None` when tracking is lost or the node is not present.
    fn query_pose(&self, node: TrackedNode, stage: PoseStage) -> Option<NativePose>;
    /// GPU time of the most recently completed frame.
    fn query_gpu_frame_time_ms(&self) -> f32;

    // Submission context
    fn begin_frame(&self, frame_number: u64, queue: CommandQueueHandle) -> VrResult<()>;
    fn end_frame(
        &self,
        frame_number: u64,
        layers: &[LayerSubmission],
        queue: CommandQueueHandle,
    ) -> VrResult<()>;

    // Render context
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VrResult<SwapchainHandle>;
    /// Runs on whichever context drops the last reference.
    fn destroy_swapchain(&self, handle: SwapchainHandle);

    fn command_queue(&self) -> CommandQueueHandle {
        CommandQueueHandle::default()
    }
}
