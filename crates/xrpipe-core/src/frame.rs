//! Per-frame identity record handed between pipeline stages.

bitflags::bitflags! {
    /// Snapshot of the host's view flags taken when a frame starts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShowFlags: u32 {
        const RENDERING = 1 << 0;
        const POST_PROCESSING = 1 << 1;
        const SCREEN_PERCENTAGE = 1 << 2;
        const HMD_DISTORTION = 1 << 3;
        const STEREO_RENDERING = 1 << 4;
    }
}

impl Default for ShowFlags {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_number: u64,
    pub world_to_meters: f32,
    pub show_flags: ShowFlags,
    /// Set when the render stage picks the frame up.
    pub splash_shown: bool,
}

impl Frame {
    pub fn new(frame_number: u64, world_to_meters: f32, show_flags: ShowFlags) -> Self {
        Self {
            frame_number,
            world_to_meters,
            show_flags,
            splash_shown: false,
        }
    }

    pub fn rendering_enabled(&self) -> bool {
        self.show_flags.contains(ShowFlags::RENDERING)
    }

    /// Whether the compositor should see begin/end calls for this frame.
    pub fn should_submit(&self) -> bool {
        self.rendering_enabled() && !self.splash_shown
    }
}
