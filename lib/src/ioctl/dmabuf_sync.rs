//! Safe wrapper for the `DMA_BUF_IOCTL_SYNC` ioctl.
use bitflags::bitflags;
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;

bitflags! {
    /// Direction and phase of a CPU access to a DMA buffer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SyncFlags: u64 {
        const READ = bindings::DMA_BUF_SYNC_READ;
        const WRITE = bindings::DMA_BUF_SYNC_WRITE;
        const RW = bindings::DMA_BUF_SYNC_RW;
        const START = bindings::DMA_BUF_SYNC_START;
        const END = bindings::DMA_BUF_SYNC_END;
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::dma_buf_sync;
    nix::ioctl_write_ptr!(dma_buf_ioctl_sync, b'b', 0, dma_buf_sync);
}

#[derive(Debug, Error)]
pub enum DmaBufSyncError {
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<DmaBufSyncError> for Errno {
    fn from(err: DmaBufSyncError) -> Self {
        match err {
            DmaBufSyncError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `DMA_BUF_IOCTL_SYNC` ioctl.
pub fn dmabuf_sync(fd: &impl AsRawFd, flags: SyncFlags) -> Result<(), DmaBufSyncError> {
    let sync = bindings::dma_buf_sync {
        flags: flags.bits(),
    };

    // EINTR and EAGAIN only mean the wait was interrupted, so try again.
    loop {
        match unsafe { ioctl::dma_buf_ioctl_sync(fd.as_raw_fd(), &sync) } {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
