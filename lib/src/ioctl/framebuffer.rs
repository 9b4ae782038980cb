//! Safe wrappers for the `DRM_IOCTL_MODE_ADDFB2` and `DRM_IOCTL_MODE_RMFB`
//! ioctls.
use bitflags::bitflags;
use nix::errno::Errno;
use std::os::unix::io::AsRawFd;
use thiserror::Error;

use crate::{bindings, PixelFormat};

bitflags! {
    /// Flags that can be passed when creating a framebuffer.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FbFlags: u32 {
        const INTERLACED = bindings::DRM_MODE_FB_INTERLACED;
        /// The `modifiers` of the layout are meaningful.
        const MODIFIERS = bindings::DRM_MODE_FB_MODIFIERS;
    }
}

/// Everything needed to create a framebuffer out of imported GEM handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramebufferLayout {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub handles: [u32; bindings::MAX_PLANES],
    pub pitches: [u32; bindings::MAX_PLANES],
    pub offsets: [u32; bindings::MAX_PLANES],
    pub modifiers: [u64; bindings::MAX_PLANES],
    pub flags: FbFlags,
}

impl From<&FramebufferLayout> for bindings::drm_mode_fb_cmd2 {
    fn from(layout: &FramebufferLayout) -> Self {
        bindings::drm_mode_fb_cmd2 {
            fb_id: 0,
            width: layout.width,
            height: layout.height,
            pixel_format: layout.format.into(),
            flags: layout.flags.bits(),
            handles: layout.handles,
            pitches: layout.pitches,
            offsets: layout.offsets,
            modifier: layout.modifiers,
        }
    }
}

#[doc(hidden)]
mod ioctl {
    use crate::bindings::drm_mode_fb_cmd2;
    nix::ioctl_readwrite!(drm_ioctl_mode_addfb2, b'd', 0xb8, drm_mode_fb_cmd2);
    nix::ioctl_readwrite!(drm_ioctl_mode_rmfb, b'd', 0xaf, u32);
}

#[derive(Debug, Error)]
pub enum AddFb2Error {
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<AddFb2Error> for Errno {
    fn from(err: AddFb2Error) -> Self {
        match err {
            AddFb2Error::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `DRM_IOCTL_MODE_ADDFB2` ioctl. Returns the id of the
/// new framebuffer.
pub fn add_fb2(fd: &impl AsRawFd, layout: &FramebufferLayout) -> Result<u32, AddFb2Error> {
    let mut cmd = bindings::drm_mode_fb_cmd2::from(layout);

    unsafe { ioctl::drm_ioctl_mode_addfb2(fd.as_raw_fd(), &mut cmd) }?;

    Ok(cmd.fb_id)
}

#[derive(Debug, Error)]
pub enum RmFbError {
    #[error("ioctl error: {0}")]
    IoctlError(#[from] Errno),
}

impl From<RmFbError> for Errno {
    fn from(err: RmFbError) -> Self {
        match err {
            RmFbError::IoctlError(e) => e,
        }
    }
}

/// Safe wrapper around the `DRM_IOCTL_MODE_RMFB` ioctl.
pub fn rm_fb(fd: &impl AsRawFd, fb_id: u32) -> Result<(), RmFbError> {
    let mut id = fb_id;

    unsafe { ioctl::drm_ioctl_mode_rmfb(fd.as_raw_fd(), &mut id) }?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_to_fb_cmd2() {
        let layout = FramebufferLayout {
            width: 1920,
            height: 1080,
            format: PixelFormat::YUV420,
            handles: [7, 7, 7, 0],
            pitches: [1920, 960, 960, 0],
            offsets: [0, 2073600, 2592000, 0],
            modifiers: [0; bindings::MAX_PLANES],
            flags: FbFlags::empty(),
        };

        let cmd = bindings::drm_mode_fb_cmd2::from(&layout);
        assert_eq!(cmd.fb_id, 0);
        assert_eq!(cmd.pixel_format, u32::from(PixelFormat::YUV420));
        assert_eq!(cmd.handles, layout.handles);
        assert_eq!(cmd.pitches, layout.pitches);
        assert_eq!(cmd.offsets, layout.offsets);
        assert_eq!(cmd.flags, 0);
    }
}
