//! Mirrors of the kernel UAPI structures and constants used by this crate.
//!
//! These come from `linux/udmabuf.h`, `linux/dma-buf.h`, `drm/drm.h`,
//! `drm/drm_mode.h` and `drm/drm_fourcc.h`. Only the handful of definitions we
//! actually pass to the kernel are reproduced here.
#![allow(dead_code)]
#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(clippy::all)]

use std::os::raw::{c_char, c_int};

/// Maximum number of planes (and memory objects) a DRM framebuffer can have.
pub const MAX_PLANES: usize = 4;

pub const UDMABUF_FLAGS_CLOEXEC: u32 = 0x01;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct udmabuf_create {
    pub memfd: u32,
    pub flags: u32,
    pub offset: u64,
    pub size: u64,
}

pub const DMA_BUF_SYNC_READ: u64 = 1 << 0;
pub const DMA_BUF_SYNC_WRITE: u64 = 2 << 0;
pub const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
pub const DMA_BUF_SYNC_START: u64 = 0 << 2;
pub const DMA_BUF_SYNC_END: u64 = 1 << 2;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct dma_buf_sync {
    pub flags: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_version {
    pub version_major: c_int,
    pub version_minor: c_int,
    pub version_patchlevel: c_int,
    pub name_len: usize,
    pub name: *mut c_char,
    pub date_len: usize,
    pub date: *mut c_char,
    pub desc_len: usize,
    pub desc: *mut c_char,
}

impl Default for drm_version {
    fn default() -> Self {
        Self {
            version_major: 0,
            version_minor: 0,
            version_patchlevel: 0,
            name_len: 0,
            name: std::ptr::null_mut(),
            date_len: 0,
            date: std::ptr::null_mut(),
            desc_len: 0,
            desc: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct drm_gem_close {
    pub handle: u32,
    pub pad: u32,
}

pub const DRM_CLOEXEC: u32 = 0o2000000;
pub const DRM_RDWR: u32 = 0o2;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct drm_prime_handle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
}

pub const DRM_MODE_FB_INTERLACED: u32 = 1 << 0;
pub const DRM_MODE_FB_MODIFIERS: u32 = 1 << 1;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct drm_mode_fb_cmd2 {
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub flags: u32,
    pub handles: [u32; MAX_PLANES],
    pub pitches: [u32; MAX_PLANES],
    pub offsets: [u32; MAX_PLANES],
    pub modifier: [u64; MAX_PLANES],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct drm_mode_create_blob {
    pub data: u64,
    pub length: u32,
    pub blob_id: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct drm_mode_destroy_blob {
    pub blob_id: u32,
}

pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

// `enum hdmi_metadata_type` from include/linux/hdmi.h.
pub const HDMI_STATIC_METADATA_TYPE1: u8 = 1;

// `enum hdmi_eotf` from include/linux/hdmi.h.
pub const HDMI_EOTF_TRADITIONAL_GAMMA_SDR: u8 = 0;
pub const HDMI_EOTF_TRADITIONAL_GAMMA_HDR: u8 = 1;
pub const HDMI_EOTF_SMPTE_ST2084: u8 = 2;
pub const HDMI_EOTF_BT_2100_HLG: u8 = 3;

// `enum hdmi_colorimetry` and `enum hdmi_extended_colorimetry`.
pub const HDMI_COLORIMETRY_NONE: u64 = 0;
pub const HDMI_COLORIMETRY_EXTENDED: u64 = 3;
pub const HDMI_EXTENDED_COLORIMETRY_BT2020: u64 = 6;
pub const RK_HDMI_COLORIMETRY_BT2020: u64 =
    HDMI_COLORIMETRY_EXTENDED + HDMI_EXTENDED_COLORIMETRY_BT2020;

// `enum hdmi_output_format` as exposed by the rockchip connector.
pub const HDMI_OUTPUT_DEFAULT_RGB: u64 = 0;
pub const HDMI_OUTPUT_YCBCR_HQ: u64 = 4;

// `enum v4l2_colorspace`, which the rockchip plane `COLOR_SPACE` property uses.
pub const V4L2_COLORSPACE_DEFAULT: u64 = 0;
pub const V4L2_COLORSPACE_SMPTE170M: u64 = 1;
pub const V4L2_COLORSPACE_REC709: u64 = 3;
pub const V4L2_COLORSPACE_BT2020: u64 = 10;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct hdr_xy {
    pub x: u16,
    pub y: u16,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct hdr_metadata_infoframe {
    pub eotf: u8,
    pub metadata_type: u8,
    pub display_primaries: [hdr_xy; 3],
    pub white_point: hdr_xy,
    pub max_display_mastering_luminance: u16,
    pub min_display_mastering_luminance: u16,
    pub max_cll: u16,
    pub max_fall: u16,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct hdr_output_metadata {
    pub metadata_type: u32,
    pub hdmi_metadata_type1: hdr_metadata_infoframe,
}
