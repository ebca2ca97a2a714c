//! Target-process seam and the OS-backed implementation.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(windows)]
mod windows;

#[cfg(target_os = "linux")]
pub use linux::Process;
#[cfg(windows)]
pub use windows::Process;

use crate::{
    error::Result,
    memory::MemorySource,
    pages::{PageEnumerator, SystemLayout},
};

/// Everything placement, buffers and discovery need from a target process.
///
/// [`Process`] is the real OS target (the current process or another process
/// on the same host); tests substitute a deterministic in-memory
/// implementation.
pub trait ProcessTarget: MemorySource + PageEnumerator + Send + Sync {
    /// Commit `len` bytes at exactly `addr`. Must fail if the region is not
    /// free; never commits elsewhere.
    fn commit(&self, addr: u64, len: u64) -> Result<u64>;

    /// Page size and allocation granularity governing placement in this
    /// target.
    fn layout(&self) -> SystemLayout {
        SystemLayout::query()
    }
}
