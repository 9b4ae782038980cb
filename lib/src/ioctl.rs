//! This module provides safer versions of the kernel ioctls this crate relies on, through simple
//! functions working on anything implementing `AsRawFd`. Higher-level code should go through the
//! `memory`, `pool` and `display` modules instead.
//!
//! Kernel ioctls are usually called with a single structure as argument, which serves to store
//! both the input and output of the ioctl. To keep callers from having to remember which parts of
//! the structure they are supposed to fill, each ioctl proxy function:
//!
//! * takes the relevant input as parameters and not the entire input/output structure,
//! * returns only the part of the structure the kernel filled, converted into a safer type when
//!   relevant.
//!
//! Each ioctl also has its own error type, which can be converted back into the original error
//! code using its `Into<Errno>` implementation.

mod dmabuf_sync;
mod framebuffer;
mod mmap;
mod prime;
mod property_blob;
mod udmabuf;
mod version;

pub use dmabuf_sync::*;
pub use framebuffer::*;
pub use mmap::*;
pub use prime::*;
pub use property_blob::*;
pub use udmabuf::*;
pub use version::*;

use std::ffi::CStr;
use std::ffi::FromBytesWithNulError;

use nix::errno::Errno;

/// Utility function for sub-modules.
/// Constructs an owned String instance from a slice containing a nul-terminated
/// C string, after checking that the passed slice indeed contains a nul
/// character.
fn string_from_cstr(c_str: &[u8]) -> Result<String, FromBytesWithNulError> {
    // Make sure that our string contains a nul character.
    let slice = match c_str.iter().position(|x| *x == b'\0') {
        // Pass the full slice, `from_bytes_with_nul` will return an error.
        None => c_str,
        Some(pos) => &c_str[..pos + 1],
    };

    Ok(CStr::from_bytes_with_nul(slice)?
        .to_string_lossy()
        .into_owned())
}

/// Extension trait for allowing easy conversion of ioctl errors into their originating error code.
pub trait IntoErrno {
    fn into_errno(self) -> i32;
}

impl<T> IntoErrno for T
where
    T: Into<Errno>,
{
    fn into_errno(self) -> i32 {
        self.into() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_from_cstr() {
        // Nul-terminated slice.
        assert_eq!(string_from_cstr(b"rockchip\0"), Ok(String::from("rockchip")));

        // Slice with nul in the middle and not nul-terminated.
        assert_eq!(string_from_cstr(b"i915\0abc"), Ok(String::from("i915")));

        // Slice not nul-terminated.
        assert!(string_from_cstr(b"vc4").is_err());

        // Empty slice.
        assert!(string_from_cstr(b"").is_err());

        // Mix of nuls.
        assert_eq!(string_from_cstr(b"\0\0"), Ok(String::from("")));
    }

    #[test]
    fn test_into_errno() {
        let err: UdmabufCreateError = Errno::EINVAL.into();
        assert_eq!(err.into_errno(), Errno::EINVAL as i32);

        assert_eq!(
            PropertyBlobError::TooLarge(usize::MAX).into_errno(),
            Errno::E2BIG as i32
        );
    }
}
