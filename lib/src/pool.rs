//! A pool of recyclable zero-copy video buffers.
//!
//! Buffers are obtained from the pool through [`BufferPool::get`], which
//! returns a reference-counted [`BufferRef`]. Once the last reference to a
//! buffer is dropped it goes back to the pool's free list, keeping its memory
//! so the next `get()` can reuse it. Memory is only released when the pool is
//! dropped, or when a buffer is re-allocated with different dimensions.
//!
//! The DMA buffer exporter shared by all the buffers of a pool is opened
//! lazily the first time a buffer is created.
mod buffer;

pub use buffer::*;

use log::{debug, error, info};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::memory::{DmaBufExporter, ExportError, Udmabuf};

/// Configuration of a [`BufferPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    udmabuf_path: PathBuf,
    memfd_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            udmabuf_path: PathBuf::from(Udmabuf::DEFAULT_PATH),
            memfd_name: String::from("videobuffer"),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Default::default()
    }

    /// Device node of the udmabuf exporter.
    pub fn udmabuf_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.udmabuf_path = path.as_ref().to_path_buf();
        self
    }

    /// Name given to the memfds backing the buffers, as shown in
    /// `/proc/<pid>/fd`.
    pub fn memfd_name<S: Into<String>>(mut self, name: S) -> Self {
        self.memfd_name = name.into();
        self
    }

    pub fn get_udmabuf_path(&self) -> &Path {
        &self.udmabuf_path
    }

    pub fn get_memfd_name(&self) -> &str {
        &self.memfd_name
    }
}

/// Number of buffers in each state of the pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

type ExporterOpener<E> = dyn Fn(&PoolConfig) -> Result<E, ExportError> + Send + Sync;

struct PoolState<E: DmaBufExporter> {
    /// Every buffer ever created by the pool. A buffer's id is its index.
    all: Vec<Arc<VideoBuffer<E>>>,
    used: VecDeque<usize>,
    free: VecDeque<usize>,
    exporter: Option<Arc<E>>,
}

pub(crate) struct PoolInner<E: DmaBufExporter> {
    config: PoolConfig,
    opener: Box<ExporterOpener<E>>,
    state: Mutex<PoolState<E>>,
}

impl<E: DmaBufExporter> PoolInner<E> {
    fn open_exporter(&self, state: &mut PoolState<E>) -> Result<Arc<E>, ExportError> {
        if let Some(exporter) = &state.exporter {
            return Ok(Arc::clone(exporter));
        }

        let exporter = Arc::new((self.opener)(&self.config)?);
        state.exporter = Some(Arc::clone(&exporter));
        Ok(exporter)
    }

    /// The exporter shared by all buffers, opened if needed.
    fn exporter(&self) -> Result<Arc<E>, ExportError> {
        let mut state = self.state.lock().unwrap();
        self.open_exporter(&mut state)
    }

    fn get(self: &Arc<Self>) -> BufferRef<E> {
        let mut state = self.state.lock().unwrap();

        let buffer = match state.free.pop_front() {
            Some(id) => Arc::clone(&state.all[id]),
            None => {
                if let Err(e) = self.open_exporter(&mut state) {
                    error!("Failed to open DMA buffer exporter: {}", e);
                }

                let id = state.all.len();
                let buffer = Arc::new(VideoBuffer::new(
                    id,
                    Arc::downgrade(self),
                    self.config.memfd_name.clone(),
                ));
                state.all.push(Arc::clone(&buffer));
                buffer
            }
        };
        state.used.push_back(buffer.id());
        debug!("Buffer pool: handing out buffer {}", buffer.id());

        BufferRef::new(buffer)
    }

    /// Move buffer `id` from the used list to the free list. Called when the
    /// last reference to the buffer is dropped.
    fn return_buffer(&self, id: usize) {
        let mut state = self.state.lock().unwrap();

        assert!(
            id < state.all.len(),
            "buffer {} does not belong to this pool",
            id
        );

        match state.used.iter().position(|&used| used == id) {
            Some(pos) => {
                state.used.remove(pos);
                state.all[id].on_return();
                state.free.push_back(id);
            }
            // The picture of a buffer returned twice is left untouched.
            None => error!("Buffer {} returned to pool while not in use, ignoring", id),
        }
    }

    #[cfg(test)]
    fn ids(&self) -> (Vec<usize>, Vec<usize>) {
        let state = self.state.lock().unwrap();

        (
            state.used.iter().copied().collect(),
            state.free.iter().copied().collect(),
        )
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock().unwrap();

        PoolStats {
            total: state.all.len(),
            used: state.used.len(),
            free: state.free.len(),
        }
    }
}

impl<E: DmaBufExporter> Drop for PoolInner<E> {
    fn drop(&mut self) {
        // Still tear down if a panic poisoned the state.
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        info!(
            "Destroying buffer pool: {} buffers, {} still in use",
            state.all.len(),
            state.used.len()
        );

        for buffer in state.all.iter() {
            buffer.destroy();
        }
        state.used.clear();
        state.free.clear();
        if state.exporter.take().is_some() {
            debug!("Closed DMA buffer exporter");
        }
    }
}

/// A pool of video buffers sharing a single DMA buffer exporter.
///
/// Dropping the pool releases the memory of all its buffers, including the
/// ones still referenced: callers must make sure that no buffer is still in
/// use by the display engine at that point.
pub struct BufferPool<E: DmaBufExporter = Udmabuf> {
    inner: Arc<PoolInner<E>>,
}

impl BufferPool<Udmabuf> {
    /// Create a pool exporting its buffers through the udmabuf device given in
    /// `config`.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_exporter(config, |config| Udmabuf::open(config.get_udmabuf_path()))
    }
}

impl<E: DmaBufExporter> BufferPool<E> {
    /// Create a pool whose exporter is opened by `opener` when the first
    /// buffer is created.
    pub fn with_exporter<F>(config: PoolConfig, opener: F) -> Self
    where
        F: Fn(&PoolConfig) -> Result<E, ExportError> + Send + Sync + 'static,
    {
        BufferPool {
            inner: Arc::new(PoolInner {
                config,
                opener: Box::new(opener),
                state: Mutex::new(PoolState {
                    all: Vec::new(),
                    used: VecDeque::new(),
                    free: VecDeque::new(),
                    exporter: None,
                }),
            }),
        }
    }

    /// Get a buffer from the free list, or create a new one if none is free.
    ///
    /// A newly created buffer holds no memory until
    /// [`VideoBuffer::allocate`] is called on it.
    pub fn get(&self) -> BufferRef<E> {
        self.inner.get()
    }

    /// Return buffer `id` to the free list. This happens automatically when
    /// the last reference to a buffer is dropped.
    ///
    /// Returning a buffer that is not in use is logged and ignored.
    ///
    /// # Panics
    ///
    /// Panics if `id` has never been handed out by this pool.
    pub fn return_buffer(&self, id: usize) {
        self.inner.return_buffer(id)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prime::PrimeBuffer;
    use crate::testing::CountingExporter;
    use crate::{PictureInfo, PixelFormat, TransferCharacteristic};
    use std::collections::BTreeSet;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn pool() -> (BufferPool<CountingExporter>, CountingExporter) {
        let exporter = CountingExporter::new();
        let counters = exporter.clone();
        let pool = BufferPool::with_exporter(PoolConfig::new().memfd_name("test-pool"), move |_| {
            Ok(exporter.opened())
        });

        (pool, counters)
    }

    #[test]
    fn buffers_are_recycled() {
        let (pool, exporter) = pool();

        let b0 = pool.get();
        let b1 = pool.get();
        assert_eq!((b0.id(), b1.id()), (0, 1));
        assert_eq!(
            pool.stats(),
            PoolStats {
                total: 2,
                used: 2,
                free: 0
            }
        );
        // The exporter is opened once for the whole pool.
        assert_eq!(exporter.opens(), 1);

        drop(b0);
        assert_eq!(
            pool.stats(),
            PoolStats {
                total: 2,
                used: 1,
                free: 1
            }
        );

        let b2 = pool.get();
        assert_eq!(b2.id(), 0);
        assert_eq!(pool.stats().total, 2);
        assert_eq!(pool.stats().free, 0);
        drop(b1);
        drop(b2);
        assert_eq!(pool.stats().free, 2);
    }

    #[test]
    fn clones_keep_buffer_in_use() {
        let (pool, _) = pool();

        let b0 = pool.get();
        let clone = b0.clone();
        assert_eq!(b0.ref_count(), 2);

        drop(b0);
        assert_eq!(clone.ref_count(), 1);
        assert_eq!(pool.stats().used, 1);

        drop(clone);
        assert_eq!(pool.stats().used, 0);
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn double_return_is_ignored() {
        let (pool, _) = pool();

        drop(pool.get());
        assert_eq!(pool.stats().free, 1);

        pool.return_buffer(0);
        assert_eq!(pool.stats().free, 1);
        assert_eq!(pool.stats().used, 0);
    }

    #[test]
    #[should_panic]
    fn returning_unknown_buffer_panics() {
        let (pool, _) = pool();

        pool.return_buffer(3);
    }

    #[test]
    fn allocate_and_describe() {
        let (pool, exporter) = pool();

        let buffer = pool.get();
        assert!(!buffer.is_valid());
        assert!(buffer.descriptor().is_none());

        buffer.allocate(64, 32).unwrap();
        assert!(buffer.is_valid());
        assert_eq!(buffer.size(), 64 * 48);
        assert_eq!(buffer.strides(), Some([64, 32, 32]));
        assert_eq!(exporter.exports(), 1);

        // Same dimensions: nothing happens.
        buffer.allocate(64, 32).unwrap();
        assert_eq!(exporter.exports(), 1);

        buffer.set_picture(PictureInfo {
            width: 60,
            height: 30,
            transfer: TransferCharacteristic::Smpte2084,
            ..Default::default()
        });
        let descriptor = buffer.descriptor().unwrap();
        assert_eq!((descriptor.width, descriptor.height), (60, 30));
        assert_eq!(descriptor.objects.len(), 1);
        assert_eq!(descriptor.objects[0].size, 64 * 48);
        assert_eq!(Some(descriptor.objects[0].fd), buffer.dmabuf_fd());
        let layer = descriptor.first_layer().unwrap();
        assert_eq!(layer.format, PixelFormat::YUV420);
        assert_eq!(layer.planes.len(), 3);
        assert_eq!(layer.planes[2].layout.offset, 64 * 32 + 64 * 32 / 4);
        assert_eq!(
            buffer.picture().transfer,
            TransferCharacteristic::Smpte2084
        );

        // New dimensions: the previous memory is released first.
        buffer.allocate(128, 64).unwrap();
        assert_eq!(exporter.exports(), 2);
        assert_eq!(exporter.releases(), 1);
        assert_eq!(buffer.size(), 128 * 96);
    }

    #[test]
    fn picture_is_reset_on_return() {
        let (pool, _) = pool();

        let buffer = pool.get();
        buffer.set_picture(PictureInfo {
            width: 16,
            height: 16,
            ..Default::default()
        });
        drop(buffer);

        assert_eq!(pool.get().picture(), Default::default());
    }

    #[test]
    fn invalid_allocation_leaves_buffer_invalid() {
        let (pool, _) = pool();

        let buffer = pool.get();
        buffer.allocate(64, 32).unwrap();
        assert!(matches!(
            buffer.allocate(0, 32),
            Err(AllocError::InvalidDimensions(0, 32))
        ));
        assert!(!buffer.is_valid());
        assert_eq!((buffer.width(), buffer.height(), buffer.size()), (0, 0, 0));
        assert_eq!(buffer.strides(), None);
    }

    #[test]
    fn failing_exporter_leaves_buffer_invalid() {
        let pool = BufferPool::<CountingExporter>::with_exporter(PoolConfig::new(), |_| {
            Err(ExportError::NoExporter)
        });

        let buffer = pool.get();
        assert!(matches!(
            buffer.allocate(64, 32),
            Err(AllocError::ExportError(ExportError::NoExporter))
        ));
        assert!(!buffer.is_valid());
    }

    #[test]
    fn planes_are_writable() {
        let (pool, _) = pool();

        let buffer = pool.get();
        assert!(buffer.with_planes_mut(|_| ()).is_none());

        buffer.allocate(8, 4).unwrap();
        let lens = buffer
            .with_planes_mut(|[y, u, v]| {
                y.fill(0x10);
                u.fill(0x80);
                v.fill(0xf0);
                [y.len(), u.len(), v.len()]
            })
            .unwrap();
        assert_eq!(lens, [32, 8, 8]);

        let pointers = buffer.plane_pointers().unwrap();
        // Safe because the buffer holds 48 bytes of mapped memory.
        let cr_first = unsafe { *pointers[2] };
        assert_eq!(cr_first, 0xf0);
    }

    #[test]
    fn import_planes_with_padding() {
        let (pool, _) = pool();

        let buffer = pool.get();
        let empty: &[u8] = &[];
        assert!(matches!(
            buffer.import_planes([empty; 3], [0, 0, 0]),
            Err(CopyError::NotAllocated)
        ));

        buffer.allocate(4, 2).unwrap();
        // Source lines are padded to 8 bytes for luma and 4 for chroma.
        let y: &[u8] = &[1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8];
        let u: &[u8] = &[9, 10, 0, 0];
        let v: &[u8] = &[11, 12];
        buffer.import_planes([y, u, v], [8, 4, 2]).unwrap();

        let contents = buffer
            .with_planes_mut(|[y, u, v]| (y.to_vec(), u.to_vec(), v.to_vec()))
            .unwrap();
        assert_eq!(contents.0, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(contents.1, vec![9, 10]);
        assert_eq!(contents.2, vec![11, 12]);

        assert!(matches!(
            buffer.import_planes([&y[..8], u, v], [8, 4, 2]),
            Err(CopyError::SourceTooSmall(0))
        ));
        assert!(matches!(
            buffer.import_planes([y, u, v], [8, 1, 2]),
            Err(CopyError::StrideTooSmall(1))
        ));
    }

    #[test]
    fn teardown_releases_all_memory() {
        let (pool, exporter) = pool();

        let b0 = pool.get();
        let b1 = pool.get();
        let b2 = pool.get();
        for b in [&b0, &b1, &b2] {
            b.allocate(32, 32).unwrap();
        }
        // b1 goes back to the free list but keeps its memory.
        drop(b1);
        assert_eq!(exporter.releases(), 0);

        drop(b0);
        drop(pool);
        assert_eq!(exporter.exports(), 3);
        assert_eq!(exporter.releases(), 3);
        assert_eq!(exporter.closes(), 1);

        // References outliving the pool can no longer allocate.
        assert!(!b2.is_valid());
        assert!(matches!(
            b2.allocate(32, 32),
            Err(AllocError::PoolDestroyed)
        ));
    }

    #[test]
    fn pool_dropped_while_allocating() {
        let exporter = CountingExporter::new();
        let counters = exporter.clone();
        let slot: Arc<Mutex<Option<BufferPool<CountingExporter>>>> = Default::default();
        let handle = Arc::clone(&slot);
        let pool = BufferPool::with_exporter(PoolConfig::new(), move |_| {
            // Drop the last pool handle while a buffer opens the exporter.
            match handle.lock().unwrap().take() {
                Some(pool) => {
                    drop(pool);
                    Ok(exporter.opened())
                }
                None => Err(ExportError::NoExporter),
            }
        });

        let buffer = pool.get();
        *slot.lock().unwrap() = Some(pool);

        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            let res = buffer.allocate(64, 32);
            let valid = buffer.is_valid();
            tx.send((res, valid)).unwrap();
        });

        let (res, valid) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("allocate() did not return after the pool was dropped");
        worker.join().unwrap();

        assert!(matches!(res, Err(AllocError::PoolDestroyed)));
        assert!(!valid);
        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.exports(), 0);
        assert_eq!(counters.closes(), 1);
    }

    #[test]
    fn refcount_survives_concurrent_clones() {
        let (pool, _) = pool();
        let buffer = pool.get();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let clones: Vec<_> = (0..4).map(|_| buffer.clone()).collect();
                        drop(clones);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(buffer.ref_count(), 1);
        assert_eq!(pool.stats().used, 1);
        assert_eq!(pool.inner.ids(), (vec![buffer.id()], vec![]));

        drop(buffer);
        assert_eq!(pool.inner.ids(), (vec![], vec![0]));
    }

    #[test]
    fn concurrent_get_and_return() {
        let (pool, _) = pool();
        let pool = Arc::new(pool);

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let a = pool.get();
                        let b = pool.get();
                        assert_ne!(a.id(), b.id());
                        drop(a.clone());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.used, 0);
        assert_eq!(stats.free, stats.total);
        assert!(stats.total <= 8);
    }

    #[test]
    fn used_and_free_partition_the_pool() {
        let (pool, _) = pool();
        let mut held: Vec<BufferRef<CountingExporter>> = Vec::new();
        let mut seed = 0x2545_f491_u32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };

        for step in 0..2000 {
            let r = next();
            match r % 3 {
                0 | 1 if held.len() < 16 => held.push(pool.get()),
                2 if !held.is_empty() => {
                    let victim = held.swap_remove(r as usize % held.len());
                    if r & 8 != 0 {
                        // An extra reference keeps the buffer in use until
                        // both are gone.
                        let clone = victim.clone();
                        drop(victim);
                        held.push(clone);
                    }
                }
                _ => {
                    if let Some(buffer) = held.pop() {
                        drop(buffer);
                    }
                }
            }

            let (used, free) = pool.inner.ids();
            let used: BTreeSet<_> = used.into_iter().collect();
            let free: BTreeSet<_> = free.into_iter().collect();
            let total = pool.stats().total;
            let held_ids: BTreeSet<_> = held.iter().map(|b| b.id()).collect();

            assert!(used.is_disjoint(&free), "step {}", step);
            assert_eq!(
                used.union(&free).copied().collect::<Vec<_>>(),
                (0..total).collect::<Vec<_>>(),
                "step {}",
                step
            );
            assert_eq!(used, held_ids, "step {}", step);
        }
    }
}
