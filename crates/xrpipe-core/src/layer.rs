//! Compositor-visible surfaces and their swapchains.

use std::{
    cmp::Ordering,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering as AtomicOrdering},
        Arc,
    },
};

use glam::{Quat, Vec2, Vec3};
use tracing::{debug, warn};

use crate::{
    compositor::{LayerSubmission, NativeCompositor, SwapchainDesc},
    frame::Frame,
    settings::SettingsSnapshot,
    types::{Extent, Pose, StereoLayout, SwapchainHandle},
    VrError, VrResult,
};

pub type LayerId = u32;

/// The stereo eye layer. Created at device init and never removed.
pub const EYE_LAYER_ID: LayerId = 0;

/// Images per swapchain ring.
pub const SWAPCHAIN_IMAGE_COUNT: u32 = 3;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerFlags: u32 {
        /// Copy the source texture every frame, not only when marked.
        const TEX_CONTINUOUS_UPDATE = 1 << 0;
        const NO_ALPHA_CHANNEL = 1 << 1;
        /// Derive quad height from the texture aspect ratio.
        const QUAD_PRESERVE_TEX_RATIO = 1 << 2;
        const SUPPORT_DEPTH = 1 << 3;
        /// Kept alive but left out of submission.
        const HIDDEN = 1 << 4;
    }
}

impl Default for LayerFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerShape {
    Eye { layout: StereoLayout },
    /// Size in world units.
    Quad { size: Vec2 },
    /// Radius and height in world units, arc in radians.
    Cylinder { radius: f32, arc: f32, height: f32 },
    Cubemap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionType {
    FaceLocked,
    TrackerLocked,
    #[default]
    WorldLocked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerDesc {
    pub shape: LayerShape,
    pub position_type: PositionType,
    pub transform: Transform,
    /// Lower priorities are submitted first and end up behind.
    pub priority: i32,
    pub texture_size: Extent,
    pub flags: LayerFlags,
}

impl LayerDesc {
    pub fn eye(texture_size: Extent, layout: StereoLayout) -> Self {
        Self {
            shape: LayerShape::Eye { layout },
            position_type: PositionType::FaceLocked,
            transform: Transform::default(),
            priority: 0,
            texture_size,
            flags: LayerFlags::empty(),
        }
    }

    pub fn quad(size: Vec2, texture_size: Extent) -> Self {
        Self {
            shape: LayerShape::Quad { size },
            position_type: PositionType::WorldLocked,
            transform: Transform::default(),
            priority: 0,
            texture_size,
            flags: LayerFlags::TEX_CONTINUOUS_UPDATE,
        }
    }

    pub fn cylinder(radius: f32, arc: f32, height: f32, texture_size: Extent) -> Self {
        Self {
            shape: LayerShape::Cylinder {
                radius,
                arc,
                height,
            },
            position_type: PositionType::WorldLocked,
            transform: Transform::default(),
            priority: 0,
            texture_size,
            flags: LayerFlags::TEX_CONTINUOUS_UPDATE,
        }
    }

    pub fn cubemap(face_size: u32) -> Self {
        Self {
            shape: LayerShape::Cubemap,
            position_type: PositionType::TrackerLocked,
            transform: Transform::default(),
            priority: i32::MIN,
            texture_size: Extent::new(face_size, face_size),
            flags: LayerFlags::empty(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_position_type(mut self, position_type: PositionType) -> Self {
        self.position_type = position_type;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_flags(mut self, flags: LayerFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn validate(&self) -> VrResult<()> {
        match self.shape {
            LayerShape::Quad { size } => {
                if !size.is_finite() || size.x <= 0.0 || size.y <= 0.0 {
                    return Err(VrError::InvalidLayer(format!(
                        "quad size must be positive, got {size}"
                    )));
                }
            }
            LayerShape::Cylinder {
                radius,
                arc,
                height,
            } => {
                if !(radius.is_finite() && radius > 0.0) {
                    return Err(VrError::InvalidLayer(format!(
                        "cylinder radius must be positive, got {radius}"
                    )));
                }
                if !(arc > 0.0 && arc <= std::f32::consts::TAU) {
                    return Err(VrError::InvalidLayer(format!(
                        "cylinder arc must be in (0, 2pi], got {arc}"
                    )));
                }
                if !(height.is_finite() && height > 0.0) {
                    return Err(VrError::InvalidLayer(format!(
                        "cylinder height must be positive, got {height}"
                    )));
                }
            }
            LayerShape::Cubemap => {
                if self.texture_size.width != self.texture_size.height {
                    return Err(VrError::InvalidLayer(format!(
                        "cubemap faces must be square, got {}x{}",
                        self.texture_size.width, self.texture_size.height
                    )));
                }
            }
            LayerShape::Eye { .. } => {}
        }

        if self.texture_size.is_empty() {
            return Err(VrError::InvalidLayer("texture size is empty".into()));
        }
        if !self.transform.is_finite() {
            return Err(VrError::InvalidLayer("transform is not finite".into()));
        }
        Ok(())
    }

    pub fn is_eye(&self) -> bool {
        matches!(self.shape, LayerShape::Eye { .. })
    }

    pub fn swapchain_desc(&self) -> SwapchainDesc {
        let (array_size, cubemap) = match self.shape {
            LayerShape::Eye {
                layout: StereoLayout::Array,
            } => (2, false),
            LayerShape::Cubemap => (6, true),
            _ => (1, false),
        };
        SwapchainDesc {
            extent: self.texture_size,
            array_size,
            image_count: SWAPCHAIN_IMAGE_COUNT,
            cubemap,
        }
    }
}

/// A native swapchain ring. Shared between layer clones; the native swapchain
/// is destroyed when the last clone lets go.
pub struct Swapchain {
    handle: SwapchainHandle,
    desc: SwapchainDesc,
    index: AtomicU32,
    compositor: Arc<dyn NativeCompositor>,
}

impl Swapchain {
    pub fn allocate(
        compositor: &Arc<dyn NativeCompositor>,
        desc: SwapchainDesc,
    ) -> VrResult<Arc<Self>> {
        let handle = compositor.create_swapchain(&desc)?;
        debug!(
            "allocated swapchain {:?} ({}x{}, {} images)",
            handle, desc.extent.width, desc.extent.height, desc.image_count
        );
        Ok(Arc::new(Self {
            handle,
            desc,
            index: AtomicU32::new(0),
            compositor: Arc::clone(compositor),
        }))
    }

    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    pub fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    pub fn current_index(&self) -> u32 {
        self.index.load(AtomicOrdering::Acquire)
    }

    /// Moves to the next image in the ring and returns its index.
    pub fn advance(&self) -> u32 {
        let count = self.desc.image_count.max(1);
        let previous = self
            .index
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |i| {
                Some((i + 1) % count)
            })
            .unwrap_or_else(|i| i);
        (previous + 1) % count
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        debug!("destroying swapchain {:?}", self.handle);
        self.compositor.destroy_swapchain(self.handle);
    }
}

impl fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle)
            .field("desc", &self.desc)
            .field("index", &self.current_index())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Created,
    Initializing,
    Ready,
    Updating,
    Releasing,
    Released,
}

/// How a stage obtained the swapchain for a layer it picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitKind {
    /// First time this stage saw the id.
    Fresh,
    /// Carried over from the previous frame's clone.
    Reused,
    /// Seen before, but the descriptor no longer fits the old swapchain.
    Reallocated,
}

#[derive(Debug, Clone)]
pub struct Layer {
    id: LayerId,
    desc: LayerDesc,
    swapchain: Option<Arc<Swapchain>>,
    state: LayerState,
    texture_update_pending: bool,
}

impl Layer {
    pub fn new(id: LayerId, desc: LayerDesc) -> VrResult<Self> {
        desc.validate()?;
        if (id == EYE_LAYER_ID) != desc.is_eye() {
            return Err(VrError::InvalidLayer(format!(
                "layer {id} cannot use shape {:?}",
                desc.shape
            )));
        }
        Ok(Self {
            id,
            desc,
            swapchain: None,
            state: LayerState::Created,
            texture_update_pending: false,
        })
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn desc(&self) -> &LayerDesc {
        &self.desc
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn swapchain(&self) -> Option<&Arc<Swapchain>> {
        self.swapchain.as_ref()
    }

    pub fn texture_update_pending(&self) -> bool {
        self.texture_update_pending
    }

    /// Replaces the descriptor. Invalid descriptors leave the layer untouched.
    pub fn set_desc(&mut self, desc: LayerDesc) -> VrResult<()> {
        desc.validate()?;
        if desc.is_eye() != self.desc.is_eye() {
            return Err(VrError::InvalidLayer(format!(
                "layer {} cannot change shape from {:?} to {:?}",
                self.id, self.desc.shape, desc.shape
            )));
        }
        self.desc = desc;
        Ok(())
    }

    pub fn mark_texture_for_update(&mut self) {
        self.texture_update_pending = true;
    }

    pub fn clear_texture_update(&mut self) {
        self.texture_update_pending = false;
    }

    /// True when the scene renderer must cut a hole in the eye buffer so a
    /// depth-tested overlay stays visible.
    pub fn needs_compositor_presence(&self) -> bool {
        self.id != EYE_LAYER_ID
            && self.desc.flags.contains(LayerFlags::SUPPORT_DEPTH)
            && !self.desc.flags.contains(LayerFlags::HIDDEN)
            && self.desc.position_type != PositionType::FaceLocked
            && matches!(
                self.desc.shape,
                LayerShape::Quad { .. } | LayerShape::Cylinder { .. }
            )
    }

    /// Takes over the previous clone's swapchain when it still fits, otherwise
    /// allocates a new one.
    pub fn initialize(
        &mut self,
        previous: Option<&Layer>,
        compositor: &Arc<dyn NativeCompositor>,
    ) -> VrResult<InitKind> {
        self.state = LayerState::Initializing;
        let wanted = self.desc.swapchain_desc();

        if self.swapchain.as_ref().is_some_and(|s| *s.desc() == wanted) {
            self.state = LayerState::Ready;
            return Ok(InitKind::Reused);
        }

        let kind = match previous.and_then(|p| p.swapchain.as_ref()) {
            Some(existing) if *existing.desc() == wanted => {
                self.swapchain = Some(Arc::clone(existing));
                self.state = LayerState::Ready;
                return Ok(InitKind::Reused);
            }
            Some(_) => InitKind::Reallocated,
            None if previous.is_some() => InitKind::Reallocated,
            None => InitKind::Fresh,
        };

        self.swapchain = Some(Swapchain::allocate(compositor, wanted)?);
        self.state = LayerState::Ready;
        Ok(kind)
    }

    /// Refreshes the backing texture from the current swapchain image.
    /// Returns the image index written, if any.
    pub fn update_texture(&mut self) -> Option<u32> {
        let swapchain = self.swapchain.as_ref()?;
        let wants_copy = self.id == EYE_LAYER_ID
            || self.texture_update_pending
            || self.desc.flags.contains(LayerFlags::TEX_CONTINUOUS_UPDATE);
        if !wants_copy {
            return None;
        }
        self.state = LayerState::Updating;
        let index = swapchain.current_index();
        self.texture_update_pending = false;
        self.state = LayerState::Ready;
        Some(index)
    }

    pub fn advance_swapchain(&self) {
        if let Some(swapchain) = &self.swapchain {
            swapchain.advance();
        }
    }

    /// Drops this clone's swapchain reference.
    pub fn release(&mut self) {
        if self.state == LayerState::Released {
            return;
        }
        self.state = LayerState::Releasing;
        self.swapchain = None;
        self.state = LayerState::Released;
    }

    /// Builds the compositor descriptor. Hidden layers and layers without a
    /// swapchain are left out.
    pub fn submission(&self, settings: &SettingsSnapshot, frame: &Frame) -> Option<LayerSubmission> {
        if self.desc.flags.contains(LayerFlags::HIDDEN) {
            return None;
        }
        let swapchain = self.swapchain.as_ref()?;

        let world_to_meters = if frame.world_to_meters > 0.0 {
            frame.world_to_meters
        } else {
            1.0
        };
        let shape = match self.desc.shape {
            LayerShape::Quad { size } => {
                let mut size = size;
                if self.desc.flags.contains(LayerFlags::QUAD_PRESERVE_TEX_RATIO) {
                    let tex = self.desc.texture_size;
                    size.y = size.x * tex.height as f32 / tex.width as f32;
                }
                LayerShape::Quad {
                    size: size / world_to_meters,
                }
            }
            LayerShape::Cylinder {
                radius,
                arc,
                height,
            } => LayerShape::Cylinder {
                radius: radius / world_to_meters,
                arc,
                height: height / world_to_meters,
            },
            other => other,
        };

        let is_eye = self.desc.is_eye();
        Some(LayerSubmission {
            layer_id: self.id,
            shape,
            position_type: self.desc.position_type,
            pose: Pose {
                position: self.desc.transform.position / world_to_meters,
                orientation: self.desc.transform.rotation,
            },
            scale: self.desc.transform.scale,
            priority: self.desc.priority,
            flags: self.desc.flags,
            swapchain: swapchain.handle(),
            image_index: swapchain.current_index(),
            viewports: is_eye.then_some(settings.eye_viewports),
            fov: is_eye.then_some(settings.eye_fov),
        })
    }
}

/// Total order used when submitting: priority, then id.
pub fn submission_order(a: &Layer, b: &Layer) -> Ordering {
    a.desc
        .priority
        .cmp(&b.desc.priority)
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub fresh: usize,
    pub reused: usize,
    pub reallocated: usize,
    /// Ids held last frame but absent now.
    pub dropped: usize,
    pub failed: usize,
}

/// Diffs an id-sorted incoming list against the id-sorted list a stage held
/// last frame in one pass. Matching ids inherit their swapchain, new ids get
/// a fresh one.
pub fn merge_layers(
    incoming: Vec<Layer>,
    previous: &[Layer],
    compositor: &Arc<dyn NativeCompositor>,
) -> (Vec<Layer>, MergeStats) {
    debug_assert!(incoming.windows(2).all(|w| w[0].id < w[1].id));
    debug_assert!(previous.windows(2).all(|w| w[0].id < w[1].id));

    let mut stats = MergeStats::default();
    let mut merged = Vec::with_capacity(incoming.len());
    let mut prev = previous.iter().peekable();

    for mut layer in incoming {
        while prev.next_if(|p| p.id < layer.id).is_some() {
            stats.dropped += 1;
        }
        let matching = prev.next_if(|p| p.id == layer.id);

        match layer.initialize(matching, compositor) {
            Ok(InitKind::Fresh) => stats.fresh += 1,
            Ok(InitKind::Reused) => stats.reused += 1,
            Ok(InitKind::Reallocated) => stats.reallocated += 1,
            Err(err) => {
                warn!("layer {} swapchain allocation failed: {}", layer.id, err);
                stats.failed += 1;
            }
        }
        merged.push(layer);
    }
    stats.dropped += prev.count();

    (merged, stats)
}
