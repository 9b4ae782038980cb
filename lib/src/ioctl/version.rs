//! Safe wrapper for the `DRM_IOCTL_VERSION` ioctl.
use super::string_from_cstr;
use crate::bindings;
use nix::errno::Errno;
use std::os::raw::c_char;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

#[doc(hidden)]
mod ioctl {
    use crate::bindings::drm_version;
    nix::ioctl_readwrite!(drm_ioctl_version, b'd', 0x00, drm_version);
}

/// Safe variant of the `drm_version` struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverVersion {
    pub major: i32,
    pub minor: i32,
    pub patchlevel: i32,
    /// Short name of the kernel driver, e.g. `rockchip` or `i915`.
    pub name: String,
    pub date: String,
    pub desc: String,
}

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
    #[error("driver returned an invalid string")]
    InvalidString,
}

impl From<VersionError> for Errno {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::IoctlError(e) => e,
            VersionError::InvalidString => Errno::EINVAL,
        }
    }
}

/// Safe wrapper around the `DRM_IOCTL_VERSION` ioctl.
///
/// The first call only retrieves the length of the strings, the second one
/// fills the buffers we allocated accordingly.
pub fn drm_version(fd: &impl AsRawFd) -> Result<DriverVersion, VersionError> {
    let mut version: bindings::drm_version = Default::default();
    unsafe { ioctl::drm_ioctl_version(fd.as_raw_fd(), &mut version) }?;

    // One extra byte so the strings are always nul-terminated.
    let mut name = vec![0u8; version.name_len + 1];
    let mut date = vec![0u8; version.date_len + 1];
    let mut desc = vec![0u8; version.desc_len + 1];

    version.name = name.as_mut_ptr() as *mut c_char;
    version.date = date.as_mut_ptr() as *mut c_char;
    version.desc = desc.as_mut_ptr() as *mut c_char;
    unsafe { ioctl::drm_ioctl_version(fd.as_raw_fd(), &mut version) }?;

    Ok(DriverVersion {
        major: version.version_major,
        minor: version.version_minor,
        patchlevel: version.version_patchlevel,
        name: string_from_cstr(&name).map_err(|_| VersionError::InvalidString)?,
        date: string_from_cstr(&date).map_err(|_| VersionError::InvalidString)?,
        desc: string_from_cstr(&desc).map_err(|_| VersionError::InvalidString)?,
    })
}
