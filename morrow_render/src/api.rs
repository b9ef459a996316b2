//! Narrow interface to the render device.
//!
//! The engine core never talks to the GPU directly; it hands byte slices to
//! an [`SsboDevice`] implementation provided by the backend.

use thiserror::Error;

/// Memory heap a storage buffer is placed in.
///
/// Upload-visible and device-local storage have different lifetimes and
/// update cadences, so they are tracked as independent arenas.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferHeap {
    /// Host-visible memory, written directly by the CPU.
    Upload,
    /// Device-local memory, updated through a transfer queue.
    Device,
}

impl BufferHeap {
    pub(crate) const COUNT: usize = 2;

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Upload => 0,
            Self::Device => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Storage-buffer primitives provided by the render backend.
pub trait SsboDevice {
    type Buffer;

    /// Creates a storage buffer in `heap`, initialized with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot allocate the buffer. Buffer
    /// creation is the one point where device memory exhaustion surfaces to
    /// this crate.
    fn create_ssbo(&self, heap: BufferHeap, contents: &[u8])
        -> Result<Self::Buffer, BufferError>;

    /// Overwrites `data.len()` bytes of `buffer` starting at byte `offset`.
    ///
    /// The range must lie within the buffer.
    fn write_ssbo(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);
}
