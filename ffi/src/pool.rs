#![allow(non_camel_case_types)]

use log::{debug, error, warn};
use primebuf::{
    ioctl::SyncFlags,
    memory::Udmabuf,
    pool::{BufferPool, BufferRef, PoolConfig, NUM_PLANES},
    ColorPrimaries, ColorRange, ContentLightLevel, MasteringDisplay, MatrixCoefficients,
    PictureInfo, TransferCharacteristic,
};
use std::{
    ffi::CStr,
    os::raw::{c_char, c_int},
    path::Path,
};

/// A pool of video buffers exported through udmabuf.
pub struct primebuf_pool {
    pool: BufferPool<Udmabuf>,
}

/// A counted reference to a buffer of a [`primebuf_pool`]. Each reference
/// must be released with [`primebuf_buffer_unref`]; the buffer returns to its
/// pool once all its references are released.
pub struct primebuf_buffer {
    buffer: BufferRef<Udmabuf>,
}

/// Metadata of a decoded picture. Enumerations use the ITU-T H.273 code
/// points.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct primebuf_picture_info {
    pub width: u32,
    pub height: u32,
    /// 0 for limited range, 1 for full range.
    pub color_range: u32,
    pub color_primaries: u32,
    pub transfer: u32,
    pub matrix: u32,
    /// Whether the mastering display fields are set.
    pub has_mastering_display: bool,
    /// Red, green and blue primaries, in units of 0.00002.
    pub display_primaries: [[u16; 2]; 3],
    pub white_point: [u16; 2],
    /// In cd/m².
    pub max_luminance: u16,
    /// In units of 0.0001 cd/m².
    pub min_luminance: u16,
    /// Whether the content light level fields are set.
    pub has_content_light: bool,
    pub max_cll: u16,
    pub max_fall: u16,
}

impl From<&primebuf_picture_info> for PictureInfo {
    fn from(info: &primebuf_picture_info) -> Self {
        PictureInfo {
            width: info.width,
            height: info.height,
            color_range: ColorRange::n(info.color_range).unwrap_or_default(),
            color_primaries: ColorPrimaries::n(info.color_primaries).unwrap_or_default(),
            transfer: TransferCharacteristic::n(info.transfer).unwrap_or_default(),
            matrix: MatrixCoefficients::n(info.matrix).unwrap_or_default(),
            mastering_display: info.has_mastering_display.then(|| MasteringDisplay {
                display_primaries: info.display_primaries,
                white_point: info.white_point,
                max_luminance: info.max_luminance,
                min_luminance: info.min_luminance,
            }),
            content_light: info.has_content_light.then(|| ContentLightLevel {
                max_cll: info.max_cll,
                max_fall: info.max_fall,
            }),
        }
    }
}

/// Create a new buffer pool.
///
/// `udmabuf_path` is the path to the udmabuf device, or NULL to use the
/// default one. The device is only opened once the first buffer is created.
///
/// Returns NULL if `udmabuf_path` is not valid UTF-8.
///
/// # Safety
///
/// `udmabuf_path` must be NULL or a valid nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn primebuf_pool_new(udmabuf_path: *const c_char) -> *mut primebuf_pool {
    let mut config = PoolConfig::new();

    if !udmabuf_path.is_null() {
        match CStr::from_ptr(udmabuf_path).to_str() {
            Ok(path) => config = config.udmabuf_path(Path::new(path)),
            Err(e) => {
                error!("Invalid udmabuf path: {}", e);
                return std::ptr::null_mut();
            }
        }
    }

    let pool = Box::into_raw(Box::new(primebuf_pool {
        pool: BufferPool::new(config),
    }));
    debug!("Pool {:p}: created", pool);

    pool
}

/// Destroy `pool`, releasing the memory of all its buffers.
///
/// References to buffers of the pool may outlive it, but their buffers do
/// not hold memory anymore.
///
/// # Safety
///
/// `pool` must be NULL or a pointer returned by [`primebuf_pool_new`] that
/// has not been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn primebuf_pool_destroy(pool: *mut primebuf_pool) {
    debug!("Pool {:p}: destroying", pool);

    if pool.is_null() {
        warn!("Trying to destroy a NULL pool");
        return;
    }

    drop(Box::from_raw(pool));
}

/// Obtain a buffer from `pool`, reusing a free one if possible.
///
/// New buffers hold no memory until [`primebuf_buffer_allocate`] is called.
///
/// # Safety
///
/// `pool` must be a valid pointer returned by [`primebuf_pool_new`].
#[no_mangle]
pub unsafe extern "C" fn primebuf_pool_get(pool: *const primebuf_pool) -> *mut primebuf_buffer {
    assert!(!pool.is_null());
    let pool = &*pool;

    Box::into_raw(Box::new(primebuf_buffer {
        buffer: pool.pool.get(),
    }))
}

/// Take a new reference to `buffer`.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_ref(buffer: *const primebuf_buffer) -> *mut primebuf_buffer {
    assert!(!buffer.is_null());
    let buffer = &*buffer;

    Box::into_raw(Box::new(primebuf_buffer {
        buffer: buffer.buffer.clone(),
    }))
}

/// Release a reference to a buffer.
///
/// # Safety
///
/// `buffer` must be NULL or a valid buffer reference, which cannot be used
/// anymore after this call.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_unref(buffer: *mut primebuf_buffer) {
    if buffer.is_null() {
        warn!("Trying to release a NULL buffer");
        return;
    }

    drop(Box::from_raw(buffer));
}

/// Returns the identifier of `buffer` within its pool.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_id(buffer: *const primebuf_buffer) -> usize {
    assert!(!buffer.is_null());

    (*buffer).buffer.id()
}

/// Make sure `buffer` holds memory for a `width` x `height` frame.
///
/// Returns 0 on success, -1 if the memory could not be allocated, in which
/// case the buffer holds no memory anymore.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_allocate(
    buffer: *const primebuf_buffer,
    width: u32,
    height: u32,
) -> c_int {
    assert!(!buffer.is_null());

    match (*buffer).buffer.allocate(width, height) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Returns whether `buffer` currently holds memory.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_is_valid(buffer: *const primebuf_buffer) -> bool {
    assert!(!buffer.is_null());

    (*buffer).buffer.is_valid()
}

/// Write the addresses of the three planes of `buffer` into `planes`, and
/// their line lengths in bytes into `strides`.
///
/// The addresses remain valid until the buffer is re-allocated or its pool
/// destroyed.
///
/// Returns 0 on success, -1 if the buffer holds no memory.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference. `planes` and `strides` must
/// point to arrays of 3 elements.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_get_planes(
    buffer: *const primebuf_buffer,
    planes: *mut *mut u8,
    strides: *mut u32,
) -> c_int {
    assert!(!buffer.is_null());
    assert!(!planes.is_null());
    assert!(!strides.is_null());
    let buffer = &(*buffer).buffer;

    let (pointers, pitches) = match (buffer.plane_pointers(), buffer.strides()) {
        (Some(pointers), Some(pitches)) => (pointers, pitches),
        _ => return -1,
    };

    let planes = std::slice::from_raw_parts_mut(planes, NUM_PLANES);
    let strides = std::slice::from_raw_parts_mut(strides, NUM_PLANES);
    planes.copy_from_slice(&pointers);
    strides.copy_from_slice(&pitches);

    0
}

/// Returns the DMA buffer file descriptor of `buffer`, or -1 if it holds no
/// memory. The descriptor remains owned by the buffer.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_dmabuf_fd(buffer: *const primebuf_buffer) -> c_int {
    assert!(!buffer.is_null());

    (*buffer).buffer.dmabuf_fd().unwrap_or(-1)
}

/// Signal the start (`start` = true) or end of a CPU access to `buffer`.
/// `flags` is a combination of `DMA_BUF_SYNC_READ` and `DMA_BUF_SYNC_WRITE`.
///
/// Returns 0 on success, -1 on error.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_sync(
    buffer: *const primebuf_buffer,
    start: bool,
    flags: u32,
) -> c_int {
    assert!(!buffer.is_null());
    let buffer = &(*buffer).buffer;
    let flags = SyncFlags::from_bits_truncate(flags as u64) & SyncFlags::RW;

    let res = if start {
        buffer.sync_start(flags)
    } else {
        buffer.sync_end(flags)
    };

    match res {
        Ok(()) => 0,
        Err(e) => {
            error!("Buffer {}: sync failed: {}", buffer.id(), e);
            -1
        }
    }
}

/// Attach the metadata of the picture decoded into `buffer`.
///
/// # Safety
///
/// `buffer` must be a valid buffer reference and `info` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn primebuf_buffer_set_picture(
    buffer: *const primebuf_buffer,
    info: *const primebuf_picture_info,
) {
    assert!(!buffer.is_null());
    assert!(!info.is_null());

    (*buffer).buffer.set_picture(PictureInfo::from(&*info));
}
