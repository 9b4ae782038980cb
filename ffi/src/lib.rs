//! C FFI of the primebuf crate.
//!
//! This crate provides a C API that media players written in C or C++ can use
//! to decode into zero-copy buffers. It covers the buffer pool and the
//! buffers themselves; presentation is driven from Rust.

pub mod pool;

static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize the primebuf library. This only sets up the proper hooks for
/// logging, so although it is not a hard requirement to call this function,
/// failure to do so will result in no logs being printed.
#[no_mangle]
pub extern "C" fn primebuf_init() {
    INIT.call_once(|| {
        #[cfg(feature = "env_logger")]
        env_logger::builder().format_timestamp(None).init();

        #[cfg(feature = "android")]
        android_logger::init_once(
            android_logger::Config::default().with_min_level(log::Level::Trace),
        );
    });
}
