//! DRM-PRIME buffers: frames whose memory is shared with the display engine
//! through DMA buffer file descriptors.
//!
//! A [`FrameDescriptor`] lists the memory objects backing a frame and how its
//! planes are laid out within them. Any type implementing [`PrimeBuffer`] can
//! be imported into the display engine and presented on a plane.
use std::os::unix::io::RawFd;

use crate::bindings::MAX_PLANES;
use crate::{PictureInfo, PixelFormat, PlaneLayout};

/// A memory object referenced by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmObject {
    /// DMA buffer file descriptor. Remains owned by the buffer.
    pub fd: RawFd,
    pub size: u64,
    pub format_modifier: u64,
}

/// A plane of a layer, located within one of the frame's objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmPlane {
    pub object_index: usize,
    pub layout: PlaneLayout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmLayer {
    pub format: PixelFormat,
    pub planes: Vec<DrmPlane>,
}

/// Complete description of a frame's memory, in the terms DRM understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub objects: Vec<DrmObject>,
    pub layers: Vec<DrmLayer>,
}

impl FrameDescriptor {
    /// The layer that gets presented. Frames with several layers are not
    /// presentable on a single plane anyway.
    pub fn first_layer(&self) -> Option<&DrmLayer> {
        self.layers.first()
    }
}

/// Display engine objects created when importing a buffer: one GEM handle per
/// memory object, and the framebuffer built on top of them. All zeroes when
/// the buffer is not imported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplayImport {
    pub fb_id: u32,
    pub handles: [u32; MAX_PLANES],
}

impl DisplayImport {
    pub fn is_imported(&self) -> bool {
        self.fb_id != 0 || self.handles.iter().any(|&h| h != 0)
    }
}

/// A reference to a frame that can be imported into the display engine.
///
/// Cloning acquires a new reference to the same frame and dropping releases
/// it, so holding a clone keeps the frame from being recycled.
pub trait PrimeBuffer: Clone + Send + 'static {
    /// Identifier of the buffer, unique within its pool.
    fn id(&self) -> usize;

    /// Memory layout of the frame, or `None` if the buffer holds no memory.
    fn descriptor(&self) -> Option<FrameDescriptor>;

    /// Metadata of the picture currently held by the buffer.
    fn picture(&self) -> PictureInfo;

    /// Read or update the display import state of the buffer.
    fn update_import<R, F: FnOnce(&mut DisplayImport) -> R>(&self, f: F) -> R;

    /// Framebuffer currently created for this buffer, or 0.
    fn framebuffer_id(&self) -> u32 {
        self.update_import(|import| import.fb_id)
    }
}
