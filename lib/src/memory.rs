//! Backing memory of zero-copy video frames.
//!
//! A frame lives in a [`SealedRegion`]: an anonymous memfd, sized once, mapped
//! into our address space and sealed so it can never shrink or grow. The region
//! is then exported as a DMA buffer by a [`DmaBufExporter`], which is the form
//! the display engine can import.
//!
//! Exporters produce [`DmaBufSource`]s, i.e. anything that owns a DMA buffer
//! file descriptor and knows the size of the memory behind it. The kernel
//! exporter is [`Udmabuf`]; other implementations can be used for tests or for
//! memory coming from elsewhere.
mod dmabuf;
mod memfd;

pub use dmabuf::*;
pub use memfd::*;
