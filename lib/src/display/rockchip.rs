//! Video layer bridge for Rockchip display controllers, which can output HDR
//! video: the plane is told the colour space and transfer function of the
//! frames, and the HDMI connector gets the matching output depth,
//! colorimetry and static metadata infoframe.
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::bindings::{self, hdr_metadata_infoframe, hdr_output_metadata, hdr_xy};
use crate::display::{
    DisplayDevice, DisplayTarget, ModeObject, ModeRequest, PrimeLayerBridge, VideoLayerBridge,
};
use crate::prime::PrimeBuffer;
use crate::{ColorPrimaries, PictureInfo, Rect, TransferCharacteristic};

/// Electro-optical transfer function signalled in the HDMI infoframe.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eotf {
    #[default]
    TraditionalSdr = bindings::HDMI_EOTF_TRADITIONAL_GAMMA_SDR,
    TraditionalHdr = bindings::HDMI_EOTF_TRADITIONAL_GAMMA_HDR,
    SmpteSt2084 = bindings::HDMI_EOTF_SMPTE_ST2084,
    Hlg = bindings::HDMI_EOTF_BT_2100_HLG,
}

impl Eotf {
    /// Transfer function to signal for frames with the given sample depth and
    /// transfer characteristic. Only 10-bit frames can be HDR.
    ///
    /// # Examples
    ///
    /// ```
    /// # use primebuf::display::Eotf;
    /// # use primebuf::TransferCharacteristic;
    /// assert_eq!(Eotf::classify(true, TransferCharacteristic::Smpte2084), Eotf::SmpteSt2084);
    /// assert_eq!(Eotf::classify(false, TransferCharacteristic::Smpte2084), Eotf::TraditionalSdr);
    /// ```
    pub fn classify(is_10bit: bool, transfer: TransferCharacteristic) -> Eotf {
        if !is_10bit {
            return Eotf::TraditionalSdr;
        }

        match transfer {
            TransferCharacteristic::Smpte2084 => Eotf::SmpteSt2084,
            TransferCharacteristic::AribStdB67 | TransferCharacteristic::Bt2020_10 => Eotf::Hlg,
            _ => Eotf::TraditionalSdr,
        }
    }

    pub fn is_hdr(self) -> bool {
        self != Eotf::TraditionalSdr
    }
}

/// Value of the plane `COLOR_SPACE` property for frames with the given sample
/// depth and colour primaries.
pub fn color_space(is_10bit: bool, primaries: ColorPrimaries) -> u64 {
    match primaries {
        ColorPrimaries::Bt709 => bindings::V4L2_COLORSPACE_REC709,
        _ if is_10bit => bindings::V4L2_COLORSPACE_BT2020,
        ColorPrimaries::Smpte170M => bindings::V4L2_COLORSPACE_SMPTE170M,
        _ => bindings::V4L2_COLORSPACE_REC709,
    }
}

/// Builds the static metadata infoframe for frames using `eotf`, filled with
/// the mastering display and content light level of `picture` when known.
pub fn hdr_metadata(eotf: Eotf, picture: &PictureInfo) -> hdr_output_metadata {
    let mut infoframe = hdr_metadata_infoframe {
        eotf: eotf as u8,
        metadata_type: bindings::HDMI_STATIC_METADATA_TYPE1,
        ..Default::default()
    };

    if let Some(mastering) = &picture.mastering_display {
        for (dst, src) in infoframe
            .display_primaries
            .iter_mut()
            .zip(mastering.display_primaries.iter())
        {
            *dst = hdr_xy {
                x: src[0],
                y: src[1],
            };
        }
        infoframe.white_point = hdr_xy {
            x: mastering.white_point[0],
            y: mastering.white_point[1],
        };
        infoframe.max_display_mastering_luminance = mastering.max_luminance;
        infoframe.min_display_mastering_luminance = mastering.min_luminance;
    }

    if let Some(light) = &picture.content_light {
        infoframe.max_cll = light.max_cll;
        infoframe.max_fall = light.max_fall;
    }

    hdr_output_metadata {
        metadata_type: bindings::HDMI_STATIC_METADATA_TYPE1 as u32,
        hdmi_metadata_type1: infoframe,
    }
}

/// Contents of the `HDR_SOURCE_METADATA` blob: the kernel structure in native
/// byte order, including its trailing padding.
pub fn hdr_metadata_blob(metadata: &hdr_output_metadata) -> Vec<u8> {
    let frame = &metadata.hdmi_metadata_type1;
    let mut blob = Vec::with_capacity(std::mem::size_of::<hdr_output_metadata>());

    blob.extend_from_slice(&metadata.metadata_type.to_ne_bytes());
    blob.push(frame.eotf);
    blob.push(frame.metadata_type);
    for xy in frame.display_primaries.iter().chain([&frame.white_point]) {
        blob.extend_from_slice(&xy.x.to_ne_bytes());
        blob.extend_from_slice(&xy.y.to_ne_bytes());
    }
    for v in [
        frame.max_display_mastering_luminance,
        frame.min_display_mastering_luminance,
        frame.max_cll,
        frame.max_fall,
    ] {
        blob.extend_from_slice(&v.to_ne_bytes());
    }
    blob.resize(std::mem::size_of::<hdr_output_metadata>(), 0);

    blob
}

/// Connector properties changed by the rockchip bridge.
pub const ROCKCHIP_CONNECTOR_PROPERTIES: &[&str] = &[
    "HDR_SOURCE_METADATA",
    "hdmi_output_depth",
    "hdmi_output_format",
    "hdmi_output_colorimetry",
];

/// Plane properties changed by the rockchip bridge, in addition to
/// [`super::PLANE_PROPERTIES`].
pub const ROCKCHIP_PLANE_PROPERTIES: &[&str] = &["COLOR_SPACE", "EOTF"];

/// Bridge for the rockchip driver. Presents buffers like
/// [`PrimeLayerBridge`], and configures the HDR output of the connector for
/// each stream.
pub struct RockchipLayerBridge<D: DisplayDevice, B: PrimeBuffer> {
    base: PrimeLayerBridge<D, B>,
    /// Current `HDR_SOURCE_METADATA` blob, or 0.
    hdr_blob_id: u32,
}

impl<D: DisplayDevice, B: PrimeBuffer> RockchipLayerBridge<D, B> {
    pub fn new(device: Arc<D>, target: DisplayTarget) -> Self {
        RockchipLayerBridge {
            base: PrimeLayerBridge::new(device, target),
            hdr_blob_id: 0,
        }
    }

    pub fn base(&self) -> &PrimeLayerBridge<D, B> {
        &self.base
    }

    pub fn hdr_blob_id(&self) -> u32 {
        self.hdr_blob_id
    }

    fn destroy_hdr_blob(&mut self) {
        if self.hdr_blob_id == 0 {
            return;
        }

        if let Err(e) = self.base.device().destroy_property_blob(self.hdr_blob_id) {
            error!("Cannot destroy HDR metadata blob {}: {}", self.hdr_blob_id, e);
        }
        self.hdr_blob_id = 0;
    }

    fn add_property(request: &mut dyn ModeRequest, object: ModeObject, name: &str, value: u64) {
        if !request.add_property(object, name, value) {
            warn!("Failed to set {} of {}", name, object);
        }
    }
}

impl<D: DisplayDevice, B: PrimeBuffer> VideoLayerBridge<B> for RockchipLayerBridge<D, B> {
    fn configure(&mut self, request: &mut dyn ModeRequest, buffer: &B) {
        let is_10bit = match buffer.descriptor() {
            Some(descriptor) => match descriptor.first_layer() {
                Some(layer) => layer.format.is_10bit(),
                None => {
                    warn!("Buffer {} has no layer, not configuring output", buffer.id());
                    return;
                }
            },
            None => {
                warn!("Buffer {} holds no memory, not configuring output", buffer.id());
                return;
            }
        };
        let picture = buffer.picture();
        let eotf = Eotf::classify(is_10bit, picture.transfer);
        let color_space = color_space(is_10bit, picture.color_primaries);

        self.destroy_hdr_blob();
        if eotf.is_hdr() {
            let blob = hdr_metadata_blob(&hdr_metadata(eotf, &picture));
            match self.base.device().create_property_blob(&blob) {
                Ok(blob_id) => self.hdr_blob_id = blob_id,
                Err(e) => error!("Cannot create HDR metadata blob: {}", e),
            }
        }

        info!(
            "Configuring output: {}-bit, {:?}, colour space {}, HDR metadata blob {}",
            if is_10bit { 10 } else { 8 },
            eotf,
            color_space,
            self.hdr_blob_id
        );

        let plane = self.base.target().plane();
        let connector = self.base.target().connector();

        Self::add_property(request, plane, "COLOR_SPACE", color_space);
        Self::add_property(request, plane, "EOTF", eotf as u64);

        if request.supports_property(connector, "HDR_SOURCE_METADATA") {
            Self::add_property(
                request,
                connector,
                "HDR_SOURCE_METADATA",
                self.hdr_blob_id as u64,
            );
        }
        Self::add_property(
            request,
            connector,
            "hdmi_output_depth",
            if is_10bit { 10 } else { 8 },
        );
        if request.supports_property(connector, "hdmi_output_format") {
            Self::add_property(
                request,
                connector,
                "hdmi_output_format",
                bindings::HDMI_OUTPUT_YCBCR_HQ,
            );
        }
        Self::add_property(
            request,
            connector,
            "hdmi_output_colorimetry",
            if is_10bit {
                bindings::RK_HDMI_COLORIMETRY_BT2020
            } else {
                bindings::HDMI_COLORIMETRY_NONE
            },
        );

        request.set_active(true);
    }

    fn disable(&mut self, request: &mut dyn ModeRequest) {
        self.base.disable(request);

        let plane = self.base.target().plane();
        let connector = self.base.target().connector();

        Self::add_property(request, plane, "COLOR_SPACE", bindings::V4L2_COLORSPACE_DEFAULT);
        Self::add_property(request, plane, "EOTF", Eotf::TraditionalSdr as u64);

        if request.supports_property(connector, "HDR_SOURCE_METADATA") {
            Self::add_property(request, connector, "HDR_SOURCE_METADATA", 0);
        }
        Self::add_property(request, connector, "hdmi_output_depth", 8);
        if request.supports_property(connector, "hdmi_output_format") {
            Self::add_property(
                request,
                connector,
                "hdmi_output_format",
                bindings::HDMI_OUTPUT_DEFAULT_RGB,
            );
        }
        Self::add_property(
            request,
            connector,
            "hdmi_output_colorimetry",
            bindings::HDMI_COLORIMETRY_NONE,
        );

        request.set_active(true);
        self.destroy_hdr_blob();
    }

    fn set_video_plane(
        &mut self,
        request: &mut dyn ModeRequest,
        buffer: &B,
        dest: Rect,
    ) -> bool {
        self.base.set_video_plane(request, buffer, dest)
    }
}

impl<D: DisplayDevice, B: PrimeBuffer> Drop for RockchipLayerBridge<D, B> {
    fn drop(&mut self) {
        debug!("Destroying rockchip video layer bridge");
        self.destroy_hdr_blob();
    }
}
