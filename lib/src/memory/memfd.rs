//! Sealed anonymous memory regions.
use log::error;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, SealFlag};
use nix::libc::off_t;
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::unistd;
use std::ffi::CStr;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};
use thiserror::Error;

use crate::ioctl::{self, MmapError, RegionMapping};

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("invalid region size {0}")]
    InvalidSize(u64),
    #[error("memfd_create failed: {0}")]
    MemfdCreateError(Errno),
    #[error("ftruncate to {0} bytes failed: {1}")]
    TruncateError(u64, Errno),
    #[error("error while mapping region: {0}")]
    MmapError(#[from] MmapError),
    #[error("adding seals failed: {0}")]
    SealError(Errno),
}

/// Anonymous memory sealed against shrinking and growing, and mapped
/// read-write into our address space.
///
/// The memfd is not sealed against writes: DMA buffer exporters refuse
/// write-sealed memory.
#[derive(Debug)]
pub struct SealedRegion {
    mapping: RegionMapping,
    memfd: OwnedFd,
    size: u64,
}

impl SealedRegion {
    /// Create a region of `size` bytes. Every step that succeeded before a
    /// failure is undone before the error is returned.
    pub fn new(name: &CStr, size: u64) -> Result<Self, RegionError> {
        let len = usize::try_from(size).map_err(|_| RegionError::InvalidSize(size))?;
        let file_len = off_t::try_from(size).map_err(|_| RegionError::InvalidSize(size))?;
        if size == 0 {
            return Err(RegionError::InvalidSize(size));
        }

        let memfd = memfd_create(
            name,
            MemFdCreateFlag::MFD_ALLOW_SEALING | MemFdCreateFlag::MFD_CLOEXEC,
        )
        .map_err(RegionError::MemfdCreateError)?;

        unistd::ftruncate(&memfd, file_len).map_err(|e| RegionError::TruncateError(size, e))?;

        let mapping = ioctl::mmap(&memfd, len)?;

        fcntl(
            memfd.as_raw_fd(),
            FcntlArg::F_ADD_SEALS(SealFlag::F_SEAL_SHRINK | SealFlag::F_SEAL_GROW),
        )
        .map_err(RegionError::SealError)?;

        Ok(SealedRegion {
            mapping,
            memfd,
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn memfd(&self) -> BorrowedFd<'_> {
        self.memfd.as_fd()
    }

    /// Seals currently applied to the memfd.
    pub fn seals(&self) -> Result<SealFlag, Errno> {
        fcntl(self.memfd.as_raw_fd(), FcntlArg::F_GET_SEALS).map(SealFlag::from_bits_truncate)
    }

    pub fn mapping(&self) -> &RegionMapping {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut RegionMapping {
        &mut self.mapping
    }

    /// Close the memfd, then unmap the memory. Errors are logged.
    pub fn close(self) {
        let SealedRegion { mapping, memfd, .. } = self;

        if let Err(e) = unistd::close(memfd.into_raw_fd()) {
            error!("Error while closing memfd: {}", e);
        }
        drop(mapping);
    }
}
