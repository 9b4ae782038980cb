//! Safe wrappers for the `DRM_IOCTL_PRIME_FD_TO_HANDLE` and
//! `DRM_IOCTL_GEM_CLOSE` ioctls.
use nix::errno::Errno;
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;

use crate::bindings;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::{drm_gem_close, drm_prime_handle};
    nix::ioctl_write_ptr!(drm_ioctl_gem_close, b'd', 0x09, drm_gem_close);
    nix::ioctl_readwrite!(drm_ioctl_prime_fd_to_handle, b'd', 0x2e, drm_prime_handle);
}

#[derive(Debug, Error)]
pub enum PrimeFdToHandleError {
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<PrimeFdToHandleError> for Errno {
    fn from(err: PrimeFdToHandleError) -> Self {
        match err {
            PrimeFdToHandleError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `DRM_IOCTL_PRIME_FD_TO_HANDLE` ioctl. Returns the
/// GEM handle the DRM device `fd` uses for the DMA buffer `prime_fd`.
///
/// Importing the same DMA buffer twice returns the same handle, which must then
/// only be closed once.
pub fn prime_fd_to_handle(fd: &impl AsRawFd, prime_fd: RawFd) -> Result<u32, PrimeFdToHandleError> {
    let mut prime = bindings::drm_prime_handle {
        fd: prime_fd,
        ..Default::default()
    };

    unsafe { ioctl::drm_ioctl_prime_fd_to_handle(fd.as_raw_fd(), &mut prime) }?;

    Ok(prime.handle)
}

#[derive(Debug, Error)]
pub enum GemCloseError {
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<GemCloseError> for Errno {
    fn from(err: GemCloseError) -> Self {
        match err {
            GemCloseError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `DRM_IOCTL_GEM_CLOSE` ioctl.
pub fn gem_close(fd: &impl AsRawFd, handle: u32) -> Result<(), GemCloseError> {
    let close = bindings::drm_gem_close {
        handle,
        ..Default::default()
    };

    unsafe { ioctl::drm_ioctl_gem_close(fd.as_raw_fd(), &close) }?;

    Ok(())
}
