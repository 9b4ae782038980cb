//! Safe wrapper for the `UDMABUF_CREATE` ioctl.
use nix::errno::Errno;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use thiserror::Error;

use crate::bindings;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::udmabuf_create;
    nix::ioctl_write_ptr!(udmabuf_create, b'u', 0x42, udmabuf_create);
}

#[derive(Debug, Error)]
pub enum UdmabufCreateError {
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<UdmabufCreateError> for Errno {
    fn from(err: UdmabufCreateError) -> Self {
        match err {
            UdmabufCreateError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `UDMABUF_CREATE` ioctl.
///
/// `fd` is the opened `/dev/udmabuf` node and `memfd` a memfd sealed against
/// shrinking. The returned descriptor is a DMA buffer covering `size` bytes of
/// `memfd` starting at `offset`.
pub fn udmabuf_create(
    fd: &impl AsRawFd,
    memfd: &impl AsRawFd,
    offset: u64,
    size: u64,
) -> Result<OwnedFd, UdmabufCreateError> {
    let create = bindings::udmabuf_create {
        memfd: memfd.as_raw_fd() as u32,
        flags: bindings::UDMABUF_FLAGS_CLOEXEC,
        offset,
        size,
    };

    let dmabuf_fd = unsafe { ioctl::udmabuf_create(fd.as_raw_fd(), &create) }?;

    // Safe because the ioctl returns a newly created file descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(dmabuf_fd) })
}
