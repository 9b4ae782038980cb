use core::num::NonZeroUsize;
use std::{
    ops::{Deref, DerefMut},
    os::unix::io::AsFd,
    ptr::NonNull,
    slice,
};

use log::error;
use nix::{errno::Errno, libc::c_void, sys::mman};
use thiserror::Error;

/// A shared, read-write mapping of a memory object into our address space.
///
/// The mapping remains valid until it is dropped, at which point it is
/// unmapped.
#[derive(Debug)]
pub struct RegionMapping {
    data: NonNull<u8>,
    len: usize,
}

// Safe because the mapping is exclusively owned and only accessed through
// `&self`/`&mut self`.
unsafe impl Send for RegionMapping {}
unsafe impl Sync for RegionMapping {}

impl RegionMapping {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first byte of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }
}

impl Deref for RegionMapping {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // Safe because the pointer and length were obtained from mmap() and
        // remain valid until we munmap() in drop().
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl DerefMut for RegionMapping {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

impl AsRef<[u8]> for RegionMapping {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl AsMut<[u8]> for RegionMapping {
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl Drop for RegionMapping {
    fn drop(&mut self) {
        // Safe because the pointer and length were constructed in mmap() and
        // are always valid.
        unsafe { mman::munmap(self.data.cast::<c_void>(), self.len) }.unwrap_or_else(|e| {
            error!("Error while unmapping region: {}", e);
        });
    }
}

#[derive(Debug, Error)]
pub enum MmapError {
    #[error("cannot map an empty region")]
    ZeroLength,
    #[error("mmap error: {0}")]
    MmapError(#[from] Errno),
}

impl From<MmapError> for Errno {
    fn from(err: MmapError) -> Self {
        match err {
            MmapError::ZeroLength => Errno::EINVAL,
            MmapError::MmapError(e) => e,
        }
    }
}

/// Map the first `length` bytes of `fd` shared and read-write.
pub fn mmap(fd: &impl AsFd, length: usize) -> Result<RegionMapping, MmapError> {
    let non_zero_length = NonZeroUsize::new(length).ok_or(MmapError::ZeroLength)?;
    let data = unsafe {
        mman::mmap(
            None,
            non_zero_length,
            mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
            mman::MapFlags::MAP_SHARED,
            fd,
            0,
        )
    }?;

    Ok(RegionMapping {
        data: data.cast::<u8>(),
        len: length,
    })
}
