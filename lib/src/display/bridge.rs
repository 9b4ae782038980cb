//! Publication of imported buffers onto a display plane.
use log::{debug, info, warn};
use std::sync::Arc;

use crate::display::{
    DisplayDevice, DisplayTarget, ImportError, ModeRequest, PrimeImporter, RockchipLayerBridge,
};
use crate::prime::PrimeBuffer;
use crate::Rect;

/// Plane properties set when presenting a buffer.
pub const PLANE_PROPERTIES: &[&str] = &[
    "FB_ID", "CRTC_ID", "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W",
    "CRTC_H",
];

/// Drives a video plane from a stream of DRM-PRIME buffers.
///
/// A buffer handed to [`VideoLayerBridge::set_video_plane`] stays referenced
/// and imported until two newer buffers have been presented, as the display
/// engine may still be scanning it out until the next commit completes.
pub trait VideoLayerBridge<B: PrimeBuffer>: Send {
    /// Set up the output for the stream `buffer` belongs to. Called before
    /// the first frame of a stream is presented.
    fn configure(&mut self, request: &mut dyn ModeRequest, buffer: &B);

    /// Detach the plane from its framebuffer and CRTC, and restore any output
    /// state changed by `configure()`.
    fn disable(&mut self, request: &mut dyn ModeRequest);

    /// Present `buffer` in the `dest` area of the CRTC. Returns `false` if the
    /// buffer could not be imported, in which case the request is unchanged.
    fn set_video_plane(&mut self, request: &mut dyn ModeRequest, buffer: &B, dest: Rect)
        -> bool;
}

/// Creates the bridge suited to the driver of `device`.
pub fn create_layer_bridge<D, B>(
    device: Arc<D>,
    target: DisplayTarget,
) -> Box<dyn VideoLayerBridge<B>>
where
    D: DisplayDevice + 'static,
    B: PrimeBuffer,
{
    match device.driver_name() {
        "rockchip" => {
            info!("Using rockchip video layer bridge");
            Box::new(RockchipLayerBridge::new(device, target))
        }
        driver => {
            info!("Using generic video layer bridge for driver {}", driver);
            Box::new(PrimeLayerBridge::new(device, target))
        }
    }
}

/// Presents buffers through the standard plane properties.
pub struct PrimeLayerBridge<D: DisplayDevice, B: PrimeBuffer> {
    importer: PrimeImporter<D>,
    target: DisplayTarget,
    /// Buffer being presented by the last request.
    current: Option<B>,
    /// Buffer presented before `current`, possibly still scanned out.
    previous: Option<B>,
}

impl<D: DisplayDevice, B: PrimeBuffer> PrimeLayerBridge<D, B> {
    pub fn new(device: Arc<D>, target: DisplayTarget) -> Self {
        PrimeLayerBridge {
            importer: PrimeImporter::new(device),
            target,
            current: None,
            previous: None,
        }
    }

    pub fn device(&self) -> &Arc<D> {
        self.importer.device()
    }

    pub fn target(&self) -> &DisplayTarget {
        &self.target
    }

    pub fn current(&self) -> Option<&B> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&B> {
        self.previous.as_ref()
    }

    /// Import `buffer` if needed, and make it the current buffer.
    fn map(&mut self, buffer: &B) -> Result<(), ImportError> {
        if buffer.framebuffer_id() == 0 {
            self.importer.map(buffer)?;
            self.acquire_for_present(buffer);
        } else if self.previous.as_ref().map(B::id) == Some(buffer.id())
            && self.current.as_ref().map(B::id) != Some(buffer.id())
        {
            // Presenting the previous buffer again: keep it alive over the
            // current one.
            std::mem::swap(&mut self.current, &mut self.previous);
        }

        Ok(())
    }

    /// Release the previous buffer, and shift the current buffer to its slot.
    fn acquire_for_present(&mut self, buffer: &B) {
        if let Some(previous) = self.previous.take() {
            debug!("Releasing buffer {}", previous.id());
            self.importer.release(previous);
        }
        self.previous = self.current.take();
        self.current = Some(self.importer.acquire(buffer));
    }

    fn add_plane_property(&self, request: &mut dyn ModeRequest, name: &str, value: u64) {
        if !request.add_property(self.target.plane(), name, value) {
            warn!("Failed to set {} of {}", name, self.target.plane());
        }
    }
}

impl<D: DisplayDevice, B: PrimeBuffer> VideoLayerBridge<B> for PrimeLayerBridge<D, B> {
    fn configure(&mut self, _request: &mut dyn ModeRequest, _buffer: &B) {}

    fn disable(&mut self, request: &mut dyn ModeRequest) {
        self.add_plane_property(request, "FB_ID", 0);
        self.add_plane_property(request, "CRTC_ID", 0);
    }

    fn set_video_plane(
        &mut self,
        request: &mut dyn ModeRequest,
        buffer: &B,
        dest: Rect,
    ) -> bool {
        if let Err(e) = self.map(buffer) {
            warn!("Cannot present buffer {}: {}", buffer.id(), e);
            self.importer.unmap(buffer);
            return false;
        }

        let descriptor = match buffer.descriptor() {
            Some(descriptor) => descriptor,
            None => return false,
        };
        let dest = dest.even_aligned();

        self.add_plane_property(request, "FB_ID", buffer.framebuffer_id() as u64);
        self.add_plane_property(request, "CRTC_ID", self.target.crtc_id as u64);
        self.add_plane_property(request, "SRC_X", 0);
        self.add_plane_property(request, "SRC_Y", 0);
        self.add_plane_property(request, "SRC_W", (descriptor.width as u64) << 16);
        self.add_plane_property(request, "SRC_H", (descriptor.height as u64) << 16);
        // Negative positions are passed as their two's complement.
        self.add_plane_property(request, "CRTC_X", dest.left as i64 as u64);
        self.add_plane_property(request, "CRTC_Y", dest.top as i64 as u64);
        self.add_plane_property(request, "CRTC_W", dest.width as u64);
        self.add_plane_property(request, "CRTC_H", dest.height as u64);

        true
    }
}

impl<D: DisplayDevice, B: PrimeBuffer> Drop for PrimeLayerBridge<D, B> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.importer.release(previous);
        }
        if let Some(current) = self.current.take() {
            self.importer.release(current);
        }
    }
}
