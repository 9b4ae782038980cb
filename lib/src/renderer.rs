//! Render loop glue presenting decoded pictures directly on a display plane.
//!
//! A [`PrimeRenderer`] keeps the buffers queued by the player in a small
//! ring of slots, and presents the slot chosen by the render loop through a
//! [`VideoLayerBridge`] created for the display driver on first use.
use log::{debug, error, info};
use std::sync::Arc;

use crate::display::{
    create_layer_bridge, DisplayDevice, DisplayTarget, ModeRequest, VideoLayerBridge,
};
use crate::prime::PrimeBuffer;
use crate::{PictureInfo, PixelFormat, Rect};

/// Number of render queue slots.
pub const NUM_BUFFERS: usize = 6;

/// How decoded pictures end up on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMethod {
    /// Present buffers on a display plane, without any copy.
    #[default]
    DirectToPlane,
    /// Render buffers through the GPU.
    Gles,
}

#[derive(Debug, Clone, Default)]
pub struct RendererConfig {
    render_method: RenderMethod,
}

impl RendererConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn render_method(mut self, method: RenderMethod) -> Self {
        self.render_method = method;
        self
    }

    pub fn get_render_method(&self) -> RenderMethod {
        self.render_method
    }
}

/// What the display path offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayCaps {
    /// The display is driven through atomic mode-setting.
    pub atomic: bool,
    /// A primary plane has been found for the CRTC.
    pub primary_plane: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderInfo {
    /// Number of buffers the player may queue.
    pub max_buffer_size: usize,
}

/// Presents queued buffers on the video plane of `target`.
pub struct PrimeRenderer<D: DisplayDevice + 'static, B: PrimeBuffer> {
    device: Arc<D>,
    target: DisplayTarget,
    buffers: [Option<B>; NUM_BUFFERS],
    last_render: Option<usize>,
    bridge: Option<Box<dyn VideoLayerBridge<B>>>,
    configured: bool,
    format: Option<PixelFormat>,
    source_size: (u32, u32),
}

impl<D: DisplayDevice + 'static, B: PrimeBuffer> PrimeRenderer<D, B> {
    /// Whether buffers can be presented directly on a plane with this display
    /// path and configuration.
    pub fn is_supported(caps: &DisplayCaps, config: &RendererConfig) -> bool {
        caps.atomic && caps.primary_plane && config.render_method == RenderMethod::DirectToPlane
    }

    /// Create a renderer, if supported by the display path.
    pub fn new(
        device: Arc<D>,
        target: DisplayTarget,
        caps: &DisplayCaps,
        config: &RendererConfig,
    ) -> Option<Self> {
        if !Self::is_supported(caps, config) {
            debug!("Direct to plane rendering not supported ({:?}, {:?})", caps, config);
            return None;
        }

        Some(PrimeRenderer {
            device,
            target,
            buffers: Default::default(),
            last_render: None,
            bridge: None,
            configured: false,
            format: None,
            source_size: (0, 0),
        })
    }

    /// Prepare for a new stream of pictures like `picture`, stored in buffers
    /// of `format`. Drops all queued buffers.
    pub fn configure(&mut self, picture: &PictureInfo, format: PixelFormat) -> bool {
        info!(
            "Configuring renderer for {}x{} {} pictures",
            picture.width, picture.height, format
        );

        self.format = Some(format);
        self.source_size = (picture.width, picture.height);
        self.flush(false);
        self.configured = true;

        true
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Dimensions of the stream given to [`PrimeRenderer::configure`].
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    /// Whether pictures stored in `format` need the renderer to be
    /// reconfigured.
    pub fn config_changed(&self, format: PixelFormat) -> bool {
        self.format != Some(format)
    }

    /// Queue `buffer` into slot `index`.
    pub fn add_video_picture(&mut self, index: usize, buffer: &B) {
        let slot = match self.buffers.get_mut(index) {
            Some(slot) => slot,
            None => {
                error!("Invalid render buffer index {}", index);
                return;
            }
        };

        if slot.take().is_some() {
            error!("Unreleased video buffer in slot {}", index);
        }
        *slot = Some(buffer.clone());
    }

    /// Drop the buffer queued in slot `index`, if any.
    pub fn release_buffer(&mut self, index: usize) {
        if let Some(slot) = self.buffers.get_mut(index) {
            slot.take();
        }
    }

    /// Forget what has been presented, and drop the queued buffers unless
    /// `save_buffers` is set. Returns `save_buffers`.
    pub fn flush(&mut self, save_buffers: bool) -> bool {
        if !save_buffers {
            for index in 0..NUM_BUFFERS {
                self.release_buffer(index);
            }
        }
        self.last_render = None;

        save_buffers
    }

    /// Whether the buffer in slot `index` may still be in use by the display
    /// engine, and must therefore not be recycled yet.
    pub fn need_buffer(&self, index: usize) -> bool {
        if self.last_render == Some(index) {
            return true;
        }

        self.buffers
            .get(index)
            .and_then(Option::as_ref)
            .map_or(false, |buffer| buffer.framebuffer_id() != 0)
    }

    pub fn render_info(&self) -> RenderInfo {
        RenderInfo {
            max_buffer_size: NUM_BUFFERS,
        }
    }

    /// Add the properties presenting slot `index` in the `dest` area of the
    /// screen to `request`. Presenting the same slot twice in a row does
    /// nothing.
    pub fn render_update(&mut self, request: &mut dyn ModeRequest, index: usize, dest: Rect) {
        if self.last_render == Some(index) {
            return;
        }

        let buffer = match self.buffers.get(index).and_then(Option::as_ref) {
            Some(buffer) => buffer,
            None => return,
        };
        match buffer.descriptor() {
            Some(descriptor) if !descriptor.layers.is_empty() => (),
            _ => return,
        }

        let (device, target) = (&self.device, self.target);
        let bridge = self
            .bridge
            .get_or_insert_with(|| create_layer_bridge(Arc::clone(device), target));

        if self.last_render.is_none() {
            bridge.configure(request, buffer);
        }
        bridge.set_video_plane(request, buffer, dest);
        self.last_render = Some(index);
    }

    /// Detach the video plane, if anything has been presented on it.
    pub fn disable(&mut self, request: &mut dyn ModeRequest) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.disable(request);
        }
        self.last_render = None;
    }
}

impl<D: DisplayDevice + 'static, B: PrimeBuffer> Drop for PrimeRenderer<D, B> {
    fn drop(&mut self) {
        self.flush(false);
    }
}
