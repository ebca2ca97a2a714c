//! Byte-level access to a target process.

use crate::error::Result;

/// Read/write capability over a target process's address space.
///
/// The in-process implementation accesses memory directly; the cross-process
/// one goes through OS read/write primitives. Buffer code never dereferences
/// raw addresses itself, so the same placement, append and discovery logic
/// serves both targets.
///
/// Implementations must be safe to invoke concurrently on disjoint
/// addresses.
pub trait MemorySource {
    /// Fill `out` with the bytes at `addr`.
    fn read(&self, addr: u64, out: &mut [u8]) -> Result<()>;

    /// Write `bytes` at `addr`.
    fn write(&self, addr: u64, bytes: &[u8]) -> Result<()>;

    /// Like [`read`](Self::read), but reports failure as `false`. Used when
    /// probing addresses that may legitimately be unreadable.
    fn safe_read(&self, addr: u64, out: &mut [u8]) -> bool {
        self.read(addr, out).is_ok()
    }
}
