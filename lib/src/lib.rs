//! This library manages zero-copy video frame buffers and their presentation
//! on a DRM display plane. It is organized in layers, similarly to how the
//! kernel objects it handles depend on each other:
//!
//! * The `ioctl` module provides direct, thin wrappers over the udmabuf,
//!   dma-buf and DRM ioctls this crate needs, with added memory safety. It
//!   won't guard against passing handles the kernel will reject.
//!
//! * The `memory` module models the backing memory of a frame: a sealed
//!   anonymous memory region exported as a DMA buffer through a shared
//!   exporter.
//!
//! * The `pool` module recycles such buffers, hands out reference-counted
//!   handles to them and reclaims them once the last handle is dropped.
//!
//! * The `display` module imports buffers into the display engine (GEM
//!   handles, framebuffers) and publishes them onto a hardware plane through
//!   a layer bridge. The `renderer` module drives a bridge from a render loop.
//!
#[doc(hidden)]
pub mod bindings;
pub mod display;
pub mod ioctl;
pub mod memory;
pub mod pool;
pub mod prime;
pub mod renderer;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::fmt::{Debug, Display};

use enumn::N;

/// A DRM Fourcc pixel format. It can be converted back and forth from a 32-bit
/// integer, or a 4-bytes string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct PixelFormat(u32);

impl PixelFormat {
    /// Three-plane 4:2:0 layout: full-resolution luma followed by two
    /// half-resolution chroma planes.
    pub const YUV420: PixelFormat = PixelFormat::from_fourcc(b"YU12");
    pub const NV12: PixelFormat = PixelFormat::from_fourcc(b"NV12");
    /// Rockchip's packed 10-bit variant of NV12.
    pub const NV12_10: PixelFormat = PixelFormat::from_fourcc(b"NA12");
    pub const NV15: PixelFormat = PixelFormat::from_fourcc(b"NV15");
    pub const P010: PixelFormat = PixelFormat::from_fourcc(b"P010");

    pub const fn from_u32(v: u32) -> Self {
        Self(v)
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    pub const fn from_fourcc(n: &[u8; 4]) -> Self {
        Self(n[0] as u32 | (n[1] as u32) << 8 | (n[2] as u32) << 16 | (n[3] as u32) << 24)
    }

    pub const fn to_fourcc(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Returns whether samples of this format carry 10 bits of precision.
    ///
    /// # Examples
    ///
    /// ```
    /// # use primebuf::PixelFormat;
    /// assert!(PixelFormat::NV12_10.is_10bit());
    /// assert!(!PixelFormat::YUV420.is_10bit());
    /// ```
    pub fn is_10bit(self) -> bool {
        matches!(self, Self::NV12_10 | Self::NV15 | Self::P010)
    }
}

/// Converts a Fourcc in 32-bit integer format (like the ones passed in DRM
/// structures) into the matching pixel format.
///
/// # Examples
///
/// ```
/// # use primebuf::PixelFormat;
/// // Fourcc representation of NV12.
/// let nv12 = u32::from_le(0x3231564e);
/// let f = PixelFormat::from(nv12);
/// assert_eq!(u32::from(f), nv12);
/// assert_eq!(f, PixelFormat::NV12);
/// ```
impl From<u32> for PixelFormat {
    fn from(i: u32) -> Self {
        Self::from_u32(i)
    }
}

impl From<PixelFormat> for u32 {
    fn from(format: PixelFormat) -> Self {
        format.to_u32()
    }
}

/// Simple way to convert a string litteral (e.g. b"YU12") into a pixel
/// format that can be passed to DRM.
///
/// # Examples
///
/// ```
/// # use primebuf::PixelFormat;
/// let f = PixelFormat::from(b"YU12");
/// assert_eq!(f, PixelFormat::YUV420);
/// assert_eq!(&<[u8; 4]>::from(f), b"YU12");
/// ```
impl From<&[u8; 4]> for PixelFormat {
    fn from(n: &[u8; 4]) -> Self {
        Self::from_fourcc(n)
    }
}

impl From<PixelFormat> for [u8; 4] {
    fn from(format: PixelFormat) -> Self {
        format.to_fourcc()
    }
}

/// Produces a debug string for this PixelFormat, including its hexadecimal
/// and string representation.
///
/// # Examples
///
/// ```
/// # use primebuf::PixelFormat;
/// assert_eq!(format!("{:?}", PixelFormat::YUV420), "0x32315559 (YU12)");
/// ```
impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fourcc = self
            .0
            .to_le_bytes()
            .iter()
            .map(|&x| x as char)
            .collect::<String>();
        f.write_str(fourcc.as_str())
    }
}

/// Description of a single plane of a frame within its backing memory.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct PlaneLayout {
    /// Offset of the first byte of the plane from the start of the memory object.
    pub offset: u32,
    /// Bytes per line of data.
    pub pitch: u32,
}

/// A rectangle on the display, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Rect {
        Rect {
            left,
            top,
            width,
            height,
        }
    }

    /// Returns this rectangle with its origin rounded down and its extent
    /// rounded up to even values. Subsampled chroma planes only have a defined
    /// position on even pixel boundaries.
    ///
    /// # Examples
    ///
    /// ```
    /// # use primebuf::Rect;
    /// let r = Rect::new(3, 5, 101, 51).even_aligned();
    /// assert_eq!(r, Rect::new(2, 4, 102, 52));
    ///
    /// // Sizes that cannot be rounded up are rounded down instead.
    /// let r = Rect::new(0, 0, u32::MAX, u32::MAX).even_aligned();
    /// assert_eq!((r.width, r.height), (u32::MAX - 1, u32::MAX - 1));
    /// ```
    pub fn even_aligned(&self) -> Rect {
        Rect {
            left: self.left & !1,
            top: self.top & !1,
            width: self.width.saturating_add(1) & !1,
            height: self.height.saturating_add(1) & !1,
        }
    }
}

impl Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}), {}x{}",
            self.left, self.top, self.width, self.height
        )
    }
}

/// Colour primaries of a decoded picture, as coded in ITU-T H.273.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, N)]
pub enum ColorPrimaries {
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Bt470M = 4,
    Bt470Bg = 5,
    Smpte170M = 6,
    Smpte240M = 7,
    Film = 8,
    Bt2020 = 9,
    Smpte428 = 10,
    Smpte431 = 11,
    Smpte432 = 12,
    Ebu3213 = 22,
}

/// Transfer characteristics of a decoded picture, as coded in ITU-T H.273.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, N)]
pub enum TransferCharacteristic {
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Gamma22 = 4,
    Gamma28 = 5,
    Smpte170M = 6,
    Smpte240M = 7,
    Linear = 8,
    Log = 9,
    LogSqrt = 10,
    Iec61966_2_4 = 11,
    Bt1361Ecg = 12,
    Iec61966_2_1 = 13,
    Bt2020_10 = 14,
    Bt2020_12 = 15,
    Smpte2084 = 16,
    Smpte428 = 17,
    AribStdB67 = 18,
}

/// Matrix coefficients of a decoded picture, as coded in ITU-T H.273.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, N)]
pub enum MatrixCoefficients {
    Rgb = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Fcc = 4,
    Bt470Bg = 5,
    Smpte170M = 6,
    Smpte240M = 7,
    YCgCo = 8,
    Bt2020Ncl = 9,
    Bt2020Cl = 10,
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, N)]
pub enum ColorRange {
    #[default]
    Limited = 0,
    Full = 1,
}

/// Mastering display colour volume, in the units of the HDMI static metadata
/// infoframe: chromaticities in steps of 0.00002, maximum luminance in cd/m²
/// and minimum luminance in steps of 0.0001 cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasteringDisplay {
    /// Red, green and blue primaries, as `[x, y]` pairs.
    pub display_primaries: [[u16; 2]; 3],
    pub white_point: [u16; 2],
    pub max_luminance: u16,
    pub min_luminance: u16,
}

/// Content light level information, in cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    pub max_cll: u16,
    pub max_fall: u16,
}

/// Per-frame metadata supplied by the decoding pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PictureInfo {
    /// Visible width of the picture in pixels.
    pub width: u32,
    /// Visible height of the picture in pixels.
    pub height: u32,
    pub color_range: ColorRange,
    pub color_primaries: ColorPrimaries,
    pub transfer: TransferCharacteristic,
    pub matrix: MatrixCoefficients,
    pub mastering_display: Option<MasteringDisplay>,
    pub content_light: Option<ContentLightLevel>,
}
