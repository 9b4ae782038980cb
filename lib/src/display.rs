//! Presentation of DRM-PRIME buffers on a display plane.
//!
//! [`DisplayDevice`] abstracts the few display engine operations needed to
//! import buffers, and is implemented for real DRM devices by [`DrmDevice`].
//! [`ModeRequest`] abstracts the atomic mode-setting request that a frame's
//! plane and connector properties are added to. The caller owns the request
//! and commits it.
mod bridge;
mod importer;
mod rockchip;

pub use bridge::*;
pub use importer::*;
pub use rockchip::*;

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ioctl::{self, DriverVersion, FramebufferLayout, VersionError};

/// Display engine operations used to import and present buffers.
pub trait DisplayDevice: Send + Sync {
    /// Name of the kernel driver, e.g. `rockchip`.
    fn driver_name(&self) -> &str;

    /// Import a DMA buffer and return the GEM handle referencing it.
    fn prime_fd_to_handle(&self, prime_fd: RawFd) -> Result<u32, Errno>;
    fn close_handle(&self, handle: u32) -> Result<(), Errno>;

    /// Create a framebuffer and return its id.
    fn add_framebuffer(&self, layout: &FramebufferLayout) -> Result<u32, Errno>;
    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), Errno>;

    /// Create a property blob holding a copy of `data` and return its id.
    fn create_property_blob(&self, data: &[u8]) -> Result<u32, Errno>;
    fn destroy_property_blob(&self, blob_id: u32) -> Result<(), Errno>;
}

#[derive(Debug, Error)]
pub enum OpenDeviceError {
    #[error("cannot open {0}: {1}")]
    OpenError(PathBuf, Errno),
    #[error("cannot query driver version: {0}")]
    VersionError(#[from] VersionError),
}

/// A DRM device node, e.g. `/dev/dri/card0`.
#[derive(Debug)]
pub struct DrmDevice {
    fd: OwnedFd,
    version: DriverVersion,
}

impl DrmDevice {
    pub fn open(path: &Path) -> Result<Self, OpenDeviceError> {
        let fd = open(path, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty())
            .map_err(|e| OpenDeviceError::OpenError(path.to_path_buf(), e))?;
        // Safe because open() just gave us this descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let version = ioctl::drm_version(&fd)?;

        debug!(
            "Opened DRM device {} (driver {} {}.{}.{})",
            path.display(),
            version.name,
            version.major,
            version.minor,
            version.patchlevel
        );

        Ok(DrmDevice { fd, version })
    }

    pub fn version(&self) -> &DriverVersion {
        &self.version
    }
}

impl AsRawFd for DrmDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl DisplayDevice for DrmDevice {
    fn driver_name(&self) -> &str {
        &self.version.name
    }

    fn prime_fd_to_handle(&self, prime_fd: RawFd) -> Result<u32, Errno> {
        Ok(ioctl::prime_fd_to_handle(&self.fd, prime_fd)?)
    }

    fn close_handle(&self, handle: u32) -> Result<(), Errno> {
        Ok(ioctl::gem_close(&self.fd, handle)?)
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> Result<u32, Errno> {
        Ok(ioctl::add_fb2(&self.fd, layout)?)
    }

    fn remove_framebuffer(&self, fb_id: u32) -> Result<(), Errno> {
        Ok(ioctl::rm_fb(&self.fd, fb_id)?)
    }

    fn create_property_blob(&self, data: &[u8]) -> Result<u32, Errno> {
        Ok(ioctl::create_property_blob(&self.fd, data)?)
    }

    fn destroy_property_blob(&self, blob_id: u32) -> Result<(), Errno> {
        Ok(ioctl::destroy_property_blob(&self.fd, blob_id)?)
    }
}

/// A KMS object whose properties can be set in a mode-setting request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModeObject {
    Plane(u32),
    Crtc(u32),
    Connector(u32),
}

impl Display for ModeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeObject::Plane(id) => write!(f, "plane {}", id),
            ModeObject::Crtc(id) => write!(f, "CRTC {}", id),
            ModeObject::Connector(id) => write!(f, "connector {}", id),
        }
    }
}

/// An atomic mode-setting request being built for the next commit.
pub trait ModeRequest {
    /// Set property `name` of `object` to `value`. Returns `false` if the
    /// object has no such property.
    fn add_property(&mut self, object: ModeObject, name: &str, value: u64) -> bool;

    /// Whether `object` has a property called `name`.
    fn supports_property(&self, object: ModeObject, name: &str) -> bool;

    /// Request the CRTC to be (re)enabled with the next commit.
    fn set_active(&mut self, active: bool);
}

/// The plane, CRTC and connector a video layer is presented through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayTarget {
    pub plane_id: u32,
    pub crtc_id: u32,
    pub connector_id: u32,
}

impl DisplayTarget {
    pub fn new(plane_id: u32, crtc_id: u32, connector_id: u32) -> Self {
        DisplayTarget {
            plane_id,
            crtc_id,
            connector_id,
        }
    }

    pub fn plane(&self) -> ModeObject {
        ModeObject::Plane(self.plane_id)
    }

    pub fn crtc(&self) -> ModeObject {
        ModeObject::Crtc(self.crtc_id)
    }

    pub fn connector(&self) -> ModeObject {
        ModeObject::Connector(self.connector_id)
    }
}

/// A [`ModeRequest`] that records property values, for callers that turn
/// them into an actual atomic commit themselves.
///
/// Only properties declared with [`PropertyBag::with_properties`] are
/// accepted, mimicking the properties exposed by the kernel objects.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    supported: BTreeSet<(ModeObject, String)>,
    values: BTreeMap<(ModeObject, String), u64>,
    active: Option<bool>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Default::default()
    }

    /// Declare properties of `object`.
    pub fn with_properties(mut self, object: ModeObject, names: &[&str]) -> Self {
        self.supported
            .extend(names.iter().map(|name| (object, name.to_string())));
        self
    }

    /// Value of property `name` of `object` if it has been set.
    pub fn get(&self, object: ModeObject, name: &str) -> Option<u64> {
        self.values.get(&(object, name.to_string())).copied()
    }

    /// Whether `set_active()` has been called, and with which value.
    pub fn active(&self) -> Option<bool> {
        self.active
    }

    /// Iterate over the properties set so far.
    pub fn iter(&self) -> impl Iterator<Item = (ModeObject, &str, u64)> {
        self.values
            .iter()
            .map(|((object, name), value)| (*object, name.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.active.is_none()
    }

    /// Forget the recorded values, e.g. after they have been committed.
    pub fn clear(&mut self) {
        self.values.clear();
        self.active = None;
    }
}

impl ModeRequest for PropertyBag {
    fn add_property(&mut self, object: ModeObject, name: &str, value: u64) -> bool {
        if !self.supports_property(object, name) {
            warn!("{} has no property {}", object, name);
            return false;
        }

        self.values.insert((object, name.to_string()), value);
        true
    }

    fn supports_property(&self, object: ModeObject, name: &str) -> bool {
        self.supported.contains(&(object, name.to_string()))
    }

    fn set_active(&mut self, active: bool) {
        self.active = Some(active);
    }
}
