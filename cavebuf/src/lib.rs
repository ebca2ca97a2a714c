//! Range-constrained virtual memory buffers.
//!
//! cavebuf locates, commits and rediscovers small bump-allocated buffers
//! whose entire extent lies inside a caller-supplied address window. The
//! motivating consumer is runtime code patching: jump trampolines, detour
//! thunks and small data blobs frequently must live within ±2 GiB of a
//! target instruction so that relative displacements fit in a 32-bit field.
//! General-purpose allocators give no such guarantee; the OS virtual-memory
//! primitives do, at the cost of scanning the target's address space and
//! aligning to the platform allocation granularity.
//!
//! Every buffer is self-describing: it starts with a fixed magic tag
//! followed by a bookkeeping header, so any cooperating module in the same
//! process can rediscover existing buffers by scanning committed regions.
//! No language-level runtime state is shared between participants; the
//! header's lock flag is the only coordination point.
//!
//! The target process is abstracted behind [`ProcessTarget`]
//! ([`MemorySource`] + [`PageEnumerator`] + commit), so the same placement
//! and discovery code serves both the current process and another process
//! on the same host.
//!
//! ```no_run
//! use cavebuf::{BufferHelper, Process};
//!
//! # fn main() -> cavebuf::Result<()> {
//! let helper = BufferHelper::new(Process::current());
//! let buffer = helper.create_buffer(256, 0, u64::MAX)?;
//! let addr = buffer.append(&[0xAA, 0xBB, 0xCC])?;
//! assert_eq!(buffer.header()?.offset, 4);
//! # let _ = addr;
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
mod tests;

mod buffer;
mod discovery;
mod error;
mod header;
mod helper;
pub mod logging;
mod magic;
mod memory;
mod pages;
mod placement;
mod process;
mod range;
mod spin;

pub use buffer::Buffer;
pub use error::{BufferError, Result};
pub use header::{BufferHeader, LockState, BUFFER_OVERHEAD};
pub use helper::{BufferHelper, DEFAULT_CREATE_RETRIES};
pub use magic::BUFFER_MAGIC;
pub use memory::MemorySource;
pub use pages::{PageEnumerator, PageRecord, PageState, SystemLayout};
pub use placement::{find_buffer_location, Placement};
#[cfg(any(windows, target_os = "linux"))]
pub use process::Process;
pub use process::ProcessTarget;
pub use range::AddressRange;
