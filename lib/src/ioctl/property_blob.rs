//! Safe wrappers for the `DRM_IOCTL_MODE_CREATEPROPBLOB` and
//! `DRM_IOCTL_MODE_DESTROYPROPBLOB` ioctls.
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::bindings;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::{drm_mode_create_blob, drm_mode_destroy_blob};
    nix::ioctl_readwrite!(drm_ioctl_mode_createpropblob, b'd', 0xbd, drm_mode_create_blob);
    nix::ioctl_readwrite!(drm_ioctl_mode_destroypropblob, b'd', 0xbe, drm_mode_destroy_blob);
}

#[derive(Debug, Error)]
pub enum PropertyBlobError {
    #[error("blob data too large ({0} bytes)")]
    TooLarge(usize),
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<PropertyBlobError> for Errno {
    fn from(err: PropertyBlobError) -> Self {
        match err {
            PropertyBlobError::TooLarge(_) => Errno::E2BIG,
            PropertyBlobError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `DRM_IOCTL_MODE_CREATEPROPBLOB` ioctl. Returns the
/// id of the new blob, which must eventually be passed to
/// [`destroy_property_blob`].
pub fn create_property_blob(fd: &impl AsRawFd, data: &[u8]) -> Result<u32, PropertyBlobError> {
    let length = u32::try_from(data.len()).map_err(|_| PropertyBlobError::TooLarge(data.len()))?;
    let mut blob = bindings::drm_mode_create_blob {
        data: data.as_ptr() as u64,
        length,
        blob_id: 0,
    };

    unsafe { ioctl::drm_ioctl_mode_createpropblob(fd.as_raw_fd(), &mut blob) }?;

    Ok(blob.blob_id)
}

/// Safe wrapper around the `DRM_IOCTL_MODE_DESTROYPROPBLOB` ioctl.
pub fn destroy_property_blob(fd: &impl AsRawFd, blob_id: u32) -> Result<(), PropertyBlobError> {
    let mut blob = bindings::drm_mode_destroy_blob { blob_id };

    unsafe { ioctl::drm_ioctl_mode_destroypropblob(fd.as_raw_fd(), &mut blob) }?;

    Ok(())
}
