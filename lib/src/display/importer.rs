//! Import of DRM-PRIME buffers into the display engine.
use log::{debug, error};
use nix::errno::Errno;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use thiserror::Error;

use crate::bindings::{DRM_FORMAT_MOD_INVALID, DRM_FORMAT_MOD_LINEAR, MAX_PLANES};
use crate::display::DisplayDevice;
use crate::ioctl::{FbFlags, FramebufferLayout};
use crate::prime::PrimeBuffer;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("buffer holds no memory")]
    NoDescriptor,
    #[error("buffer has no layer")]
    NoLayer,
    #[error("too many memory objects ({0})")]
    TooManyObjects(usize),
    #[error("too many planes ({0})")]
    TooManyPlanes(usize),
    #[error("plane {0} references non-existing object {1}")]
    InvalidObjectIndex(usize, usize),
    #[error("cannot import DMA buffer {0}: {1}")]
    PrimeFdToHandleError(RawFd, Errno),
    #[error("cannot create framebuffer: {0}")]
    AddFramebufferError(Errno),
}

/// Creates and destroys the display engine objects of buffers: a GEM handle
/// per memory object, and a framebuffer combining them.
///
/// The objects are recorded into the buffer itself, so importing a buffer
/// that already has a framebuffer is free.
pub struct PrimeImporter<D: DisplayDevice> {
    device: Arc<D>,
}

impl<D: DisplayDevice> PrimeImporter<D> {
    pub fn new(device: Arc<D>) -> Self {
        PrimeImporter { device }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Make sure `buffer` has a framebuffer.
    ///
    /// On error, the handles created so far are left recorded in the buffer:
    /// [`PrimeImporter::unmap`] must be called to close them.
    pub fn map<B: PrimeBuffer>(&self, buffer: &B) -> Result<(), ImportError> {
        if buffer.framebuffer_id() != 0 {
            return Ok(());
        }

        let descriptor = buffer.descriptor().ok_or(ImportError::NoDescriptor)?;
        if descriptor.objects.len() > MAX_PLANES {
            return Err(ImportError::TooManyObjects(descriptor.objects.len()));
        }
        let layer = descriptor.first_layer().ok_or(ImportError::NoLayer)?;
        if layer.planes.len() > MAX_PLANES {
            return Err(ImportError::TooManyPlanes(layer.planes.len()));
        }

        buffer.update_import(|import| {
            for (i, object) in descriptor.objects.iter().enumerate() {
                import.handles[i] = self
                    .device
                    .prime_fd_to_handle(object.fd)
                    .map_err(|e| ImportError::PrimeFdToHandleError(object.fd, e))?;
            }

            let mut layout = FramebufferLayout {
                width: descriptor.width,
                height: descriptor.height,
                format: layer.format,
                ..Default::default()
            };

            for (i, plane) in layer.planes.iter().enumerate() {
                let object = descriptor
                    .objects
                    .get(plane.object_index)
                    .ok_or(ImportError::InvalidObjectIndex(i, plane.object_index))?;
                let handle = import.handles[plane.object_index];

                if handle != 0 && plane.layout.pitch != 0 {
                    layout.handles[i] = handle;
                    layout.pitches[i] = plane.layout.pitch;
                    layout.offsets[i] = plane.layout.offset;
                    layout.modifiers[i] = object.format_modifier;
                }
            }

            if layout
                .modifiers
                .iter()
                .any(|&m| m != DRM_FORMAT_MOD_LINEAR && m != DRM_FORMAT_MOD_INVALID)
            {
                layout.flags |= FbFlags::MODIFIERS;
            }

            import.fb_id = self
                .device
                .add_framebuffer(&layout)
                .map_err(ImportError::AddFramebufferError)?;

            debug!(
                "Buffer {}: imported as framebuffer {} ({}x{} {})",
                buffer.id(),
                import.fb_id,
                layout.width,
                layout.height,
                layout.format
            );
            Ok(())
        })
    }

    /// Destroy the framebuffer and close the handles of `buffer`. Does nothing
    /// if the buffer is not imported.
    pub fn unmap<B: PrimeBuffer>(&self, buffer: &B) {
        buffer.update_import(|import| {
            if import.fb_id != 0 {
                if let Err(e) = self.device.remove_framebuffer(import.fb_id) {
                    error!(
                        "Buffer {}: cannot remove framebuffer {}: {}",
                        buffer.id(),
                        import.fb_id,
                        e
                    );
                }
                import.fb_id = 0;
            }

            // Objects sharing a DMA buffer were given the same handle.
            let mut closed = [0u32; MAX_PLANES];
            for i in 0..MAX_PLANES {
                let handle = std::mem::take(&mut import.handles[i]);
                if handle == 0 || closed.contains(&handle) {
                    continue;
                }

                if let Err(e) = self.device.close_handle(handle) {
                    error!(
                        "Buffer {}: cannot close GEM handle {}: {}",
                        buffer.id(),
                        handle,
                        e
                    );
                }
                closed[i] = handle;
            }
        })
    }

    /// Take a reference to `buffer` for as long as the display engine uses it.
    pub fn acquire<B: PrimeBuffer>(&self, buffer: &B) -> B {
        buffer.clone()
    }

    /// Undo the import of `buffer` and drop the reference taken by
    /// [`PrimeImporter::acquire`].
    pub fn release<B: PrimeBuffer>(&self, buffer: B) {
        self.unmap(&buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prime::FrameDescriptor;
    use crate::testing::{FakeBuffer, MockDevice};
    use crate::PixelFormat;

    fn importer() -> (PrimeImporter<MockDevice>, Arc<MockDevice>) {
        let device = Arc::new(MockDevice::new("mock"));
        (PrimeImporter::new(Arc::clone(&device)), device)
    }

    #[test]
    fn map_then_unmap_restores_device() {
        let (importer, device) = importer();
        let buffer = FakeBuffer::new(0, 42, PixelFormat::NV12, 64, 32);

        importer.map(&buffer).unwrap();
        let import = buffer.import();
        assert_ne!(import.fb_id, 0);
        assert_ne!(import.handles[0], 0);
        assert_eq!(device.live_handles(), 1);
        assert_eq!(device.live_framebuffers(), 1);

        let layout = device.framebuffer(import.fb_id).unwrap();
        assert_eq!((layout.width, layout.height), (64, 32));
        assert_eq!(layout.format, PixelFormat::NV12);
        assert_eq!(layout.handles, [import.handles[0], import.handles[0], 0, 0]);
        assert_eq!(layout.pitches, [64, 64, 0, 0]);
        assert_eq!(layout.offsets, [0, 64 * 32, 0, 0]);
        assert_eq!(layout.flags, FbFlags::empty());

        importer.unmap(&buffer);
        assert_eq!(buffer.import(), Default::default());
        assert_eq!(device.live_handles(), 0);
        assert_eq!(device.live_framebuffers(), 0);
        // The handle shared by both planes is closed once.
        assert_eq!(device.state.lock().unwrap().closed_handles.len(), 1);

        // Unmapping again is harmless.
        importer.unmap(&buffer);
        assert_eq!(device.state.lock().unwrap().closed_handles.len(), 1);
    }

    #[test]
    fn mapping_twice_is_free() {
        let (importer, device) = importer();
        let buffer = FakeBuffer::new(0, 42, PixelFormat::NV12, 64, 32);

        importer.map(&buffer).unwrap();
        let fb_id = buffer.framebuffer_id();
        importer.map(&buffer).unwrap();

        assert_eq!(buffer.framebuffer_id(), fb_id);
        assert_eq!(device.live_framebuffers(), 1);
    }

    #[test]
    fn modifiers_flag() {
        let (importer, device) = importer();
        let mut descriptor = FakeBuffer::new(0, 42, PixelFormat::NV12, 64, 32)
            .descriptor()
            .unwrap();
        descriptor.objects[0].format_modifier = 0x0800_0000_0000_0001;
        let buffer = FakeBuffer::with_descriptor(0, Some(descriptor), Default::default());

        importer.map(&buffer).unwrap();
        let layout = device.framebuffer(buffer.framebuffer_id()).unwrap();
        assert_eq!(layout.flags, FbFlags::MODIFIERS);
        assert_eq!(layout.modifiers[1], 0x0800_0000_0000_0001);
    }

    #[test]
    fn failed_import_is_cleaned_by_unmap() {
        let (importer, device) = importer();
        device.state.lock().unwrap().fail_add_framebuffer = true;
        let buffer = FakeBuffer::new(0, 42, PixelFormat::NV12, 64, 32);

        assert!(matches!(
            importer.map(&buffer),
            Err(ImportError::AddFramebufferError(Errno::EINVAL))
        ));
        assert_eq!(buffer.framebuffer_id(), 0);
        assert_eq!(device.live_handles(), 1);

        importer.unmap(&buffer);
        assert_eq!(device.live_handles(), 0);
        assert_eq!(buffer.import(), Default::default());
    }

    #[test]
    fn invalid_descriptors_are_refused() {
        let (importer, device) = importer();

        let empty = FakeBuffer::with_descriptor(0, None, Default::default());
        assert!(matches!(
            importer.map(&empty),
            Err(ImportError::NoDescriptor)
        ));

        let mut descriptor = FakeBuffer::new(1, 42, PixelFormat::NV12, 64, 32)
            .descriptor()
            .unwrap();
        descriptor.objects = vec![descriptor.objects[0]; MAX_PLANES + 1];
        let too_many = FakeBuffer::with_descriptor(1, Some(descriptor), Default::default());
        assert!(matches!(
            importer.map(&too_many),
            Err(ImportError::TooManyObjects(5))
        ));

        let no_layer = FakeBuffer::with_descriptor(
            2,
            Some(FrameDescriptor {
                width: 16,
                height: 16,
                objects: vec![],
                layers: vec![],
            }),
            Default::default(),
        );
        assert!(matches!(importer.map(&no_layer), Err(ImportError::NoLayer)));

        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn release_unmaps_and_drops_reference() {
        let (importer, device) = importer();
        let buffer = FakeBuffer::new(0, 42, PixelFormat::NV12, 64, 32);

        importer.map(&buffer).unwrap();
        let held = importer.acquire(&buffer);
        assert_eq!(buffer.refs(), 2);

        importer.release(held);
        assert_eq!(buffer.refs(), 1);
        assert_eq!(buffer.framebuffer_id(), 0);
        assert_eq!(device.live_framebuffers(), 0);
    }
}
