//! Cross-thread stereo frame pipeline for head-mounted displays.
//!
//! [`HmdDevice`] is the entry point for the application host. It moves each
//! frame's settings, identity and layers from the game context through the
//! render and submission contexts, talking to the vendor compositor through
//! [`NativeCompositor`].

#![forbid(unsafe_code)]

pub mod adaptive;
pub mod compositor;
pub mod config;
pub mod device;
pub mod frame;
pub mod layer;
pub mod mock;
pub mod pipeline;
pub mod pose;
pub mod settings;
pub mod stage;
pub mod status;
pub mod types;

pub use glam;

pub use adaptive::{AdaptiveConfig, AdaptiveDensity, Adjustment};
pub use compositor::{LayerSubmission, NativeCompositor, SwapchainDesc};
pub use config::PipelineConfig;
pub use device::HmdDevice;
pub use frame::{Frame, ShowFlags};
pub use layer::{
    InitKind, Layer, LayerDesc, LayerFlags, LayerId, LayerShape, LayerState, MergeStats,
    PositionType, Swapchain, Transform, EYE_LAYER_ID,
};
pub use mock::{CompositorCall, MockCompositor};
pub use pipeline::{ActiveFrames, FramePipeline, PipelineStats};
pub use pose::{convert_pose, Calibration};
pub use settings::SettingsSnapshot;
pub use status::{DeviceStatus, StatusCell};
pub use types::{
    CommandQueueHandle, DeviceDescription, Extent, Eye, EyeFov, NativePose, Pose, PoseStage,
    Rect, StereoLayout, SwapchainHandle, TrackedNode,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VrError {
    #[error("compositor unavailable: {0}")]
    Unavailable(String),
    #[error("compositor error: {0}")]
    Adapter(String),
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("invalid layer descriptor: {0}")]
    InvalidLayer(String),
    #[error("unknown layer id {0}")]
    UnknownLayer(u32),
    #[error("device not initialized")]
    NotInitialized,
    #[error("pipeline stage closed: {0}")]
    StageClosed(String),
    #[error(transparent)]
    Config(#[from] xrpipe_common::Error),
}

pub type VrResult<T> = Result<T, VrError>;
