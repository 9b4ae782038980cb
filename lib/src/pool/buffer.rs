use super::PoolInner;
use crate::ioctl::{DmaBufSyncError, SyncFlags};
use crate::memory::{DmaBufExporter, DmaBufSource, ExportError, RegionError, SealedRegion};
use crate::prime::{DisplayImport, DrmLayer, DrmObject, DrmPlane, FrameDescriptor, PrimeBuffer};
use crate::{bindings, PictureInfo, PixelFormat, PlaneLayout};

use log::{debug, error, info, warn};
use std::ffi::CString;
use std::fmt::{self, Debug};
use std::ops::Deref;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, Weak,
};
use thiserror::Error;

/// Number of planes of the frames held by pool buffers.
pub const NUM_PLANES: usize = 3;

/// Size in bytes of a `width` x `height` frame in the 4:2:0 three-plane layout.
pub fn frame_size(width: u32, height: u32) -> u64 {
    width as u64 * (height as u64 + (height as u64 >> 1))
}

/// Layout of the luma and two chroma planes of a `width` x `height` frame.
///
/// # Examples
///
/// ```
/// # use primebuf::pool::frame_layout;
/// let planes = frame_layout(64, 32);
/// assert_eq!((planes[0].offset, planes[0].pitch), (0, 64));
/// assert_eq!((planes[1].offset, planes[1].pitch), (2048, 32));
/// assert_eq!((planes[2].offset, planes[2].pitch), (2560, 32));
/// ```
pub fn frame_layout(width: u32, height: u32) -> [PlaneLayout; NUM_PLANES] {
    let luma_size = width * height;
    [
        PlaneLayout {
            offset: 0,
            pitch: width,
        },
        PlaneLayout {
            offset: luma_size,
            pitch: width >> 1,
        },
        PlaneLayout {
            offset: luma_size + (luma_size >> 2),
            pitch: width >> 1,
        },
    ]
}

/// Number of lines of each plane for a frame of `height` lines.
fn plane_lines(height: u32) -> [usize; NUM_PLANES] {
    [height as usize, (height >> 1) as usize, (height >> 1) as usize]
}

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("invalid frame dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),
    #[error("memfd name {0:?} contains a nul byte")]
    InvalidName(String),
    #[error("the buffer pool has been destroyed")]
    PoolDestroyed,
    #[error("error while creating memory region: {0}")]
    RegionError(#[from] RegionError),
    #[error("error while exporting memory region: {0}")]
    ExportError(#[from] ExportError),
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("buffer holds no memory")]
    NotAllocated,
    #[error("source plane {0} is too small")]
    SourceTooSmall(usize),
    #[error("source stride of plane {0} is smaller than a line")]
    StrideTooSmall(usize),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("buffer holds no memory")]
    NotAllocated,
    #[error("error while syncing DMA buffer: {0}")]
    DmaBufSyncError(#[from] DmaBufSyncError),
}

/// Memory currently backing a buffer.
struct Allocation<D: DmaBufSource> {
    width: u32,
    height: u32,
    dmabuf: D,
    region: SealedRegion,
}

impl<D: DmaBufSource> Allocation<D> {
    fn new<E>(name: &str, width: u32, height: u32, exporter: &E) -> Result<Self, AllocError>
    where
        E: DmaBufExporter<DmaBuf = D>,
    {
        // Chroma planes need at least one line and one sample.
        if width < 2 || height < 2 {
            return Err(AllocError::InvalidDimensions(width, height));
        }
        let name = CString::new(name).map_err(|_| AllocError::InvalidName(name.to_string()))?;

        let region = SealedRegion::new(&name, frame_size(width, height))?;
        let dmabuf = exporter.export(region.memfd(), region.size())?;

        Ok(Allocation {
            width,
            height,
            dmabuf,
            region,
        })
    }

    /// Tear down in reverse creation order: the DMA buffer export, then the
    /// memfd, then the mapping.
    fn release(self) {
        let Allocation { dmabuf, region, .. } = self;

        drop(dmabuf);
        region.close();
    }

    fn planes_mut(&mut self) -> [&mut [u8]; NUM_PLANES] {
        let layout = frame_layout(self.width, self.height);
        let lines = plane_lines(self.height);
        let data: &mut [u8] = self.region.mapping_mut();

        let (luma, chroma) = data.split_at_mut(layout[1].offset as usize);
        let (cb, cr) = chroma.split_at_mut((layout[2].offset - layout[1].offset) as usize);

        let plane_len = |i: usize, len: usize| (layout[i].pitch as usize * lines[i]).min(len);
        let (luma_len, cb_len, cr_len) = (
            plane_len(0, luma.len()),
            plane_len(1, cb.len()),
            plane_len(2, cr.len()),
        );

        [&mut luma[..luma_len], &mut cb[..cb_len], &mut cr[..cr_len]]
    }
}

/// A zero-copy video frame buffer belonging to a [`super::BufferPool`].
///
/// The buffer keeps track of two independent things:
///
/// * its reference count, i.e. how many [`BufferRef`]s currently point to it.
///   When it drops to zero the buffer is returned to its pool's free list.
/// * its memory, which is only released when the pool is torn down or when
///   the buffer is re-allocated with different dimensions. A buffer in the
///   free list still holds its memory so it can be reused without allocation.
pub struct VideoBuffer<E: DmaBufExporter> {
    id: usize,
    refs: AtomicUsize,
    pool: Weak<PoolInner<E>>,
    memfd_name: String,
    allocation: Mutex<Option<Allocation<E::DmaBuf>>>,
    picture: Mutex<PictureInfo>,
    import: Mutex<DisplayImport>,
}

impl<E: DmaBufExporter> VideoBuffer<E> {
    pub(super) fn new(id: usize, pool: Weak<PoolInner<E>>, memfd_name: String) -> Self {
        debug!("Creating buffer {}", id);
        VideoBuffer {
            id,
            refs: AtomicUsize::new(0),
            pool,
            memfd_name,
            allocation: Mutex::new(None),
            picture: Mutex::new(Default::default()),
            import: Mutex::new(Default::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of references currently held on this buffer.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. Returns `true` if it was the last one.
    fn release(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "buffer {}: reference count underflow", self.id);
        prev == 1
    }

    /// Called by the pool when the buffer goes back to the free list.
    pub(super) fn on_return(&self) {
        debug!("Buffer {}: returned to pool", self.id);
        *self.picture.lock().unwrap() = Default::default();
    }

    /// Make sure the buffer holds memory for a `width` x `height` frame.
    ///
    /// This is a no-op if the buffer already has memory of these dimensions.
    /// Otherwise the current memory, if any, is released and a new region is
    /// created and exported through the pool's exporter. Errors are logged
    /// and returned, and leave the buffer without memory: use
    /// [`VideoBuffer::is_valid`] before using it.
    pub fn allocate(&self, width: u32, height: u32) -> Result<(), AllocError> {
        // The pool reference taken here may end up being the last one. It must
        // be dropped before locking the allocation, as tearing the pool down
        // locks the allocation of every buffer.
        let exporter = self
            .pool
            .upgrade()
            .ok_or(AllocError::PoolDestroyed)
            .and_then(|pool| Ok(pool.exporter()?));

        let mut allocation = self.allocation.lock().unwrap();

        if let Some(current) = allocation.as_ref() {
            if current.width == width && current.height == height {
                return Ok(());
            }
        }

        if let Some(current) = allocation.take() {
            self.release_allocation(current);
        }

        info!(
            "Buffer {}: allocating {}x{} ({} bytes)",
            self.id,
            width,
            height,
            frame_size(width, height)
        );

        let new_allocation = exporter
            .and_then(|exporter| {
                // A pool torn down since the upgrade above has already destroyed
                // this buffer, and nothing would release new memory.
                if self.pool.strong_count() == 0 {
                    return Err(AllocError::PoolDestroyed);
                }
                Allocation::new(&self.memfd_name, width, height, &*exporter)
            })
            .map_err(|e| {
                error!(
                    "Buffer {}: failed to allocate {}x{} frame: {}",
                    self.id, width, height, e
                );
                e
            })?;

        *allocation = Some(new_allocation);
        Ok(())
    }

    /// Release the memory of the buffer. No-op if it holds none.
    ///
    /// Any display import of the buffer must have been undone before, as the
    /// display engine would otherwise keep referencing freed memory.
    pub fn destroy(&self) {
        if let Some(current) = self.allocation.lock().unwrap().take() {
            self.release_allocation(current);
        }
    }

    fn release_allocation(&self, allocation: Allocation<E::DmaBuf>) {
        info!(
            "Buffer {}: releasing {}x{} frame ({} bytes)",
            self.id,
            allocation.width,
            allocation.height,
            allocation.region.size()
        );

        let import = *self.import.lock().unwrap();
        if import.is_imported() {
            error!(
                "Buffer {}: releasing memory still imported by the display engine ({:?})",
                self.id, import
            );
        }

        allocation.release();
    }

    /// Whether the buffer currently holds memory.
    pub fn is_valid(&self) -> bool {
        self.allocation.lock().unwrap().is_some()
    }

    /// Allocated width, or 0.
    pub fn width(&self) -> u32 {
        self.allocation.lock().unwrap().as_ref().map_or(0, |a| a.width)
    }

    /// Allocated height, or 0.
    pub fn height(&self) -> u32 {
        self.allocation.lock().unwrap().as_ref().map_or(0, |a| a.height)
    }

    /// Size of the backing memory in bytes, or 0.
    pub fn size(&self) -> u64 {
        self.allocation
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |a| a.region.size())
    }

    /// Offsets and pitches of the planes, if the buffer holds memory.
    pub fn planes(&self) -> Option<[PlaneLayout; NUM_PLANES]> {
        self.allocation
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| frame_layout(a.width, a.height))
    }

    pub fn strides(&self) -> Option<[u32; NUM_PLANES]> {
        self.planes().map(|planes| planes.map(|p| p.pitch))
    }

    /// Addresses of the first byte of each plane in our address space.
    ///
    /// Only meant for callers that cannot use [`VideoBuffer::with_planes_mut`],
    /// like C code decoding directly into the buffer. The pointers become
    /// dangling once the buffer is re-allocated or destroyed.
    pub fn plane_pointers(&self) -> Option<[*mut u8; NUM_PLANES]> {
        self.allocation.lock().unwrap().as_ref().map(|a| {
            let base = a.region.mapping().as_ptr();
            frame_layout(a.width, a.height).map(|p| base.wrapping_add(p.offset as usize))
        })
    }

    /// DMA buffer file descriptor of the memory, if allocated.
    pub fn dmabuf_fd(&self) -> Option<RawFd> {
        self.allocation
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| a.dmabuf.as_raw_fd())
    }

    /// Run `f` with mutable access to the luma and chroma planes. Returns
    /// `None` if the buffer holds no memory.
    pub fn with_planes_mut<R, F: FnOnce([&mut [u8]; NUM_PLANES]) -> R>(&self, f: F) -> Option<R> {
        let mut allocation = self.allocation.lock().unwrap();
        allocation.as_mut().map(|a| f(a.planes_mut()))
    }

    /// Copy a frame whose planes live elsewhere into this buffer. `strides`
    /// are the line lengths in bytes of the `src` planes.
    pub fn import_planes(
        &self,
        src: [&[u8]; NUM_PLANES],
        strides: [usize; NUM_PLANES],
    ) -> Result<(), CopyError> {
        let mut allocation = self.allocation.lock().unwrap();
        let allocation = allocation.as_mut().ok_or(CopyError::NotAllocated)?;
        let layout = frame_layout(allocation.width, allocation.height);
        let lines = plane_lines(allocation.height);

        for (i, dst) in allocation.planes_mut().into_iter().enumerate() {
            let line_len = layout[i].pitch as usize;
            if lines[i] == 0 || line_len == 0 {
                continue;
            }
            if strides[i] < line_len {
                return Err(CopyError::StrideTooSmall(i));
            }
            if src[i].len() < strides[i] * (lines[i] - 1) + line_len {
                return Err(CopyError::SourceTooSmall(i));
            }

            if strides[i] == line_len {
                let len = line_len * lines[i];
                dst[..len].copy_from_slice(&src[i][..len]);
            } else {
                dst.chunks_exact_mut(line_len)
                    .zip(src[i].chunks(strides[i]))
                    .for_each(|(d, s)| d.copy_from_slice(&s[..line_len]));
            }
        }

        Ok(())
    }

    /// Signal the start of a CPU access to the buffer's memory.
    pub fn sync_start(&self, flags: SyncFlags) -> Result<(), SyncError> {
        self.sync(flags | SyncFlags::START)
    }

    /// Signal the end of a CPU access started with [`VideoBuffer::sync_start`].
    pub fn sync_end(&self, flags: SyncFlags) -> Result<(), SyncError> {
        self.sync(flags | SyncFlags::END)
    }

    fn sync(&self, flags: SyncFlags) -> Result<(), SyncError> {
        let allocation = self.allocation.lock().unwrap();
        let allocation = allocation.as_ref().ok_or(SyncError::NotAllocated)?;

        allocation.dmabuf.sync(flags).map_err(|e| {
            warn!("Buffer {}: DMA buffer sync {:?} failed: {}", self.id, flags, e);
            e.into()
        })
    }

    /// Attach the metadata of the picture the buffer now holds.
    pub fn set_picture(&self, picture: PictureInfo) {
        *self.picture.lock().unwrap() = picture;
    }

    pub fn picture(&self) -> PictureInfo {
        self.picture.lock().unwrap().clone()
    }

    /// DRM-PRIME description of the buffer: a single memory object holding a
    /// three-plane YUV420 layer. The frame dimensions are those of the picture
    /// when known, clamped to the allocated ones.
    pub fn descriptor(&self) -> Option<FrameDescriptor> {
        let picture = self.picture.lock().unwrap().clone();
        let allocation = self.allocation.lock().unwrap();
        let allocation = allocation.as_ref()?;

        let (width, height) = match (picture.width, picture.height) {
            (0, _) | (_, 0) => (allocation.width, allocation.height),
            (w, h) => (w.min(allocation.width), h.min(allocation.height)),
        };

        Some(FrameDescriptor {
            width,
            height,
            objects: vec![DrmObject {
                fd: allocation.dmabuf.as_raw_fd(),
                size: allocation.region.size(),
                format_modifier: bindings::DRM_FORMAT_MOD_LINEAR,
            }],
            layers: vec![DrmLayer {
                format: PixelFormat::YUV420,
                planes: frame_layout(allocation.width, allocation.height)
                    .into_iter()
                    .map(|layout| DrmPlane {
                        object_index: 0,
                        layout,
                    })
                    .collect(),
            }],
        })
    }

    pub fn display_import(&self) -> DisplayImport {
        *self.import.lock().unwrap()
    }
}

impl<E: DmaBufExporter> Debug for VideoBuffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoBuffer")
            .field("id", &self.id)
            .field("refs", &self.ref_count())
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A counted reference to a pool buffer.
///
/// Cloning the reference acquires the buffer once more, and dropping it
/// releases it. When the last reference is dropped the buffer returns to the
/// free list of its pool, if the pool still exists.
pub struct BufferRef<E: DmaBufExporter> {
    buffer: Arc<VideoBuffer<E>>,
}

impl<E: DmaBufExporter> BufferRef<E> {
    pub(super) fn new(buffer: Arc<VideoBuffer<E>>) -> Self {
        buffer.acquire();
        BufferRef { buffer }
    }
}

impl<E: DmaBufExporter> Clone for BufferRef<E> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.buffer))
    }
}

impl<E: DmaBufExporter> Drop for BufferRef<E> {
    fn drop(&mut self) {
        if self.buffer.release() {
            if let Some(pool) = self.buffer.pool.upgrade() {
                pool.return_buffer(self.buffer.id);
            }
        }
    }
}

impl<E: DmaBufExporter> Deref for BufferRef<E> {
    type Target = VideoBuffer<E>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl<E: DmaBufExporter> Debug for BufferRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.buffer.fmt(f)
    }
}

impl<E: DmaBufExporter> PrimeBuffer for BufferRef<E> {
    fn id(&self) -> usize {
        self.buffer.id
    }

    fn descriptor(&self) -> Option<FrameDescriptor> {
        self.buffer.descriptor()
    }

    fn picture(&self) -> PictureInfo {
        self.buffer.picture()
    }

    fn update_import<R, F: FnOnce(&mut DisplayImport) -> R>(&self, f: F) -> R {
        f(&mut *self.buffer.import.lock().unwrap())
    }
}
