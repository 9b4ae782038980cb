//! Doubles of the kernel-facing parts of the crate, used by unit tests.
use nix::errno::Errno;
use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::display::DisplayDevice;
use crate::ioctl::FramebufferLayout;
use crate::memory::{DmaBufExporter, DmaBufFd, DmaBufSource, ExportError};
use crate::prime::{DisplayImport, DrmLayer, DrmObject, DrmPlane, FrameDescriptor, PrimeBuffer};
use crate::{PictureInfo, PixelFormat, PlaneLayout};

#[derive(Debug, Default)]
struct ExportCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    exports: AtomicUsize,
    releases: AtomicUsize,
}

/// Exporter handing out duplicates of the memfd instead of real DMA buffers,
/// and counting what happens to them.
#[derive(Debug)]
pub struct CountingExporter {
    counters: Arc<ExportCounters>,
    open: bool,
}

impl CountingExporter {
    /// A handle to the counters. Does not count as an open exporter.
    pub fn new() -> Self {
        CountingExporter {
            counters: Default::default(),
            open: false,
        }
    }

    /// A counted exporter sharing our counters, to be given to a pool.
    pub fn opened(&self) -> Self {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        CountingExporter {
            counters: Arc::clone(&self.counters),
            open: true,
        }
    }

    pub fn clone_counters(&self) -> Self {
        CountingExporter {
            counters: Arc::clone(&self.counters),
            open: false,
        }
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn exports(&self) -> usize {
        self.counters.exports.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }
}

impl Clone for CountingExporter {
    fn clone(&self) -> Self {
        self.clone_counters()
    }
}

impl Drop for CountingExporter {
    fn drop(&mut self) {
        if self.open {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub struct CountedDmaBuf {
    fd: DmaBufFd,
    counters: Arc<ExportCounters>,
}

impl AsRawFd for CountedDmaBuf {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl DmaBufSource for CountedDmaBuf {
    fn len(&self) -> u64 {
        self.fd.len()
    }
}

impl Drop for CountedDmaBuf {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl DmaBufExporter for CountingExporter {
    type DmaBuf = CountedDmaBuf;

    fn export(&self, memfd: BorrowedFd<'_>, size: u64) -> Result<CountedDmaBuf, ExportError> {
        let fd = memfd.try_clone_to_owned().unwrap();
        self.counters.exports.fetch_add(1, Ordering::SeqCst);

        Ok(CountedDmaBuf {
            fd: DmaBufFd::new(fd, size),
            counters: Arc::clone(&self.counters),
        })
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    next_id: u32,
    /// Live GEM handles, by imported file descriptor.
    pub handles: BTreeMap<RawFd, u32>,
    pub closed_handles: Vec<u32>,
    pub framebuffers: BTreeMap<u32, FramebufferLayout>,
    pub removed_framebuffers: Vec<u32>,
    pub blobs: BTreeMap<u32, Vec<u8>>,
    pub destroyed_blobs: Vec<u32>,
    /// File descriptors whose import fails.
    pub failing_fds: BTreeSet<RawFd>,
    pub fail_add_framebuffer: bool,
}

/// In-memory display engine. Importing the same file descriptor twice yields
/// the same handle, like the kernel does.
#[derive(Debug)]
pub struct MockDevice {
    driver: String,
    pub state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new(driver: &str) -> Self {
        MockDevice {
            driver: driver.to_string(),
            state: Mutex::new(MockState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn live_handles(&self) -> usize {
        self.state.lock().unwrap().handles.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().unwrap().framebuffers.len()
    }

    pub fn live_blobs(&self) -> Vec<u32> {
        self.state.lock().unwrap().blobs.keys().copied().collect()
    }

    pub fn framebuffer(&self, fb_id: u32) -> Option<FramebufferLayout> {
        self.state.lock().unwrap().framebuffers.get(&fb_id).cloned()
    }

    pub fn blob(&self, blob_id: u32) -> Option<Vec<u8>> {
        self.state.lock().unwrap().blobs.get(&blob_id).cloned()
    }
}

impl MockState {
    fn new_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl DisplayDevice for MockDevice {
    fn driver_name(&self) -> &str {
        &self.driver
    }

    fn prime_fd_to_handle(&self, prime_fd: RawFd) -> Result<u32, Errno> {
        let mut state = self.state.lock().unwrap();
        if state.failing_fds.contains(&prime_fd) {
            return Err(Errno::EINVAL);
        }
        if let Some(&handle) = state.handles.get(&prime_fd) {
            return Ok(handle);
        }

        let handle = state.new_id();
        state.handles.insert(prime_fd, handle);
        Ok(handle)
    }

    fn close_handle(&self, handle: u32) -> Result<(), Errno> {
        let mut state = self.state.lock().unwrap();
        let fd = state
            .handles
            .iter()
            .find(|(_, &h)| h == handle)
            .map(|(&fd, _)| fd)
            .ok_or(Errno::EINVAL)?;

        state.handles.remove(&fd);
        state.closed_handles.push(handle);
        Ok(())
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> Result<u32, Errno> {
        let mut state = self.state.lock().unwrap();
        if state.fail_add_framebuffer {
            return Err(Errno::EINVAL);
        }

        let fb_id = state.new_id();
        state.framebuffers.insert(fb_id, layout.clone());
        Ok(fb_id)
    }

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), Errno> {
        let mut state = self.state.lock().unwrap();
        state.framebuffers.remove(&fb_id).ok_or(Errno::ENOENT)?;
        state.removed_framebuffers.push(fb_id);
        Ok(())
    }

    fn create_property_blob(&self, data: &[u8]) -> Result<u32, Errno> {
        let mut state = self.state.lock().unwrap();
        let blob_id = state.new_id();
        state.blobs.insert(blob_id, data.to_vec());
        Ok(blob_id)
    }

    fn destroy_property_blob(&self, blob_id: u32) -> Result<(), Errno> {
        let mut state = self.state.lock().unwrap();
        state.blobs.remove(&blob_id).ok_or(Errno::ENOENT)?;
        state.destroyed_blobs.push(blob_id);
        Ok(())
    }
}

#[derive(Debug)]
struct FakeFrame {
    id: usize,
    descriptor: Option<FrameDescriptor>,
    picture: PictureInfo,
    import: Mutex<DisplayImport>,
    refs: AtomicUsize,
}

/// A counted reference to a frame with an arbitrary layout. Tracks how many
/// references are alive.
#[derive(Debug)]
pub struct FakeBuffer(Arc<FakeFrame>);

impl FakeBuffer {
    /// A single-object two-plane frame imported from file descriptor `fd`.
    pub fn new(id: usize, fd: RawFd, format: PixelFormat, width: u32, height: u32) -> Self {
        let descriptor = FrameDescriptor {
            width,
            height,
            objects: vec![DrmObject {
                fd,
                size: (width * height * 2) as u64,
                format_modifier: 0,
            }],
            layers: vec![DrmLayer {
                format,
                planes: vec![
                    DrmPlane {
                        object_index: 0,
                        layout: PlaneLayout {
                            offset: 0,
                            pitch: width,
                        },
                    },
                    DrmPlane {
                        object_index: 0,
                        layout: PlaneLayout {
                            offset: width * height,
                            pitch: width,
                        },
                    },
                ],
            }],
        };

        Self::with_descriptor(id, Some(descriptor), Default::default())
    }

    pub fn with_descriptor(
        id: usize,
        descriptor: Option<FrameDescriptor>,
        picture: PictureInfo,
    ) -> Self {
        let frame = FakeFrame {
            id,
            descriptor,
            picture,
            import: Default::default(),
            refs: AtomicUsize::new(1),
        };

        FakeBuffer(Arc::new(frame))
    }

    pub fn with_picture(self, picture: PictureInfo) -> Self {
        Self::with_descriptor(self.0.id, self.0.descriptor.clone(), picture)
    }

    /// Number of live references to the frame, including this one.
    pub fn refs(&self) -> usize {
        self.0.refs.load(Ordering::SeqCst)
    }

    pub fn import(&self) -> DisplayImport {
        *self.0.import.lock().unwrap()
    }
}

impl Clone for FakeBuffer {
    fn clone(&self) -> Self {
        self.0.refs.fetch_add(1, Ordering::SeqCst);
        FakeBuffer(Arc::clone(&self.0))
    }
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        self.0.refs.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PrimeBuffer for FakeBuffer {
    fn id(&self) -> usize {
        self.0.id
    }

    fn descriptor(&self) -> Option<FrameDescriptor> {
        self.0.descriptor.clone()
    }

    fn picture(&self) -> PictureInfo {
        self.0.picture.clone()
    }

    fn update_import<R, F: FnOnce(&mut DisplayImport) -> R>(&self, f: F) -> R {
        f(&mut *self.0.import.lock().unwrap())
    }
}
