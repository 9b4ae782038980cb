//! DMA buffer sources and exporters.
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use std::fmt::Debug;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ioctl::{self, DmaBufSyncError, SyncFlags, UdmabufCreateError};

pub trait DmaBufSource: AsRawFd + Debug + Send + Sync {
    fn len(&self) -> u64;

    /// Make Clippy happy.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal the start or end of a CPU access to the buffer.
    fn sync(&self, flags: SyncFlags) -> Result<(), DmaBufSyncError> {
        ioctl::dmabuf_sync(&self.as_raw_fd(), flags)
    }
}

impl DmaBufSource for std::fs::File {
    fn len(&self) -> u64 {
        match self.metadata() {
            Err(_) => {
                warn!("Failed to compute File size for use as DMABuf, using 0...");
                0
            }
            Ok(m) => m.len(),
        }
    }
}

/// An owned DMA buffer file descriptor along with the size of its memory. The
/// descriptor is closed when this is dropped.
#[derive(Debug)]
pub struct DmaBufFd {
    fd: OwnedFd,
    len: u64,
}

impl DmaBufFd {
    pub fn new(fd: OwnedFd, len: u64) -> Self {
        DmaBufFd { fd, len }
    }
}

impl AsRawFd for DmaBufFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for DmaBufFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl DmaBufSource for DmaBufFd {
    fn len(&self) -> u64 {
        self.len
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot open exporter {0}: {1}")]
    OpenError(PathBuf, Errno),
    #[error("no exporter available")]
    NoExporter,
    #[error("error while creating udmabuf: {0}")]
    UdmabufError(#[from] UdmabufCreateError),
}

/// Shared context turning memfds into DMA buffers. A single exporter is shared
/// by all the buffers of a pool.
pub trait DmaBufExporter: Send + Sync + 'static {
    type DmaBuf: DmaBufSource + 'static;

    /// Export the first `size` bytes of `memfd` as a DMA buffer.
    fn export(&self, memfd: BorrowedFd<'_>, size: u64) -> Result<Self::DmaBuf, ExportError>;
}

/// Exporter backed by the kernel's `/dev/udmabuf` device.
#[derive(Debug)]
pub struct Udmabuf {
    device: OwnedFd,
}

impl Udmabuf {
    pub const DEFAULT_PATH: &'static str = "/dev/udmabuf";

    pub fn open(path: &Path) -> Result<Self, ExportError> {
        let fd = open(path, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty())
            .map_err(|e| ExportError::OpenError(path.to_path_buf(), e))?;
        debug!("Opened udmabuf exporter {}", path.display());

        Ok(Udmabuf {
            // Safe because open() just gave us this descriptor.
            device: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }
}

impl AsRawFd for Udmabuf {
    fn as_raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }
}

impl DmaBufExporter for Udmabuf {
    type DmaBuf = DmaBufFd;

    fn export(&self, memfd: BorrowedFd<'_>, size: u64) -> Result<DmaBufFd, ExportError> {
        let fd = ioctl::udmabuf_create(&self.device, &memfd, 0, size)?;

        Ok(DmaBufFd::new(fd, size))
    }
}
