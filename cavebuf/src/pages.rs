//! Address-space page map.

use crate::range::AddressRange;

/// Smallest page size the placement math works with. The effective page
/// size is the larger of this and what the system reports.
pub(crate) const DEFAULT_PAGE_SIZE: u64 = 0x1000;

/// Allocation state of a region of the page map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Free,
    Reserved,
    Committed,
}

/// One region of the target's page map, as reported by the OS. Read-only
/// snapshot data.
#[derive(Debug, Clone, Copy)]
pub struct PageRecord {
    pub base: u64,
    pub size: u64,
    pub state: PageState,
    /// Opaque OS protection bits, carried for diagnostics only.
    pub protection: u32,
}

impl PageRecord {
    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.base, self.base.saturating_add(self.size))
    }
}

/// Produces the page map of a target process.
pub trait PageEnumerator {
    /// Single pass over the target's address space: every address is covered
    /// by exactly one record, records come in ascending `base` order with no
    /// gaps. The sequence is not restartable; call again for a second pass.
    /// Enumeration failures end the sequence early.
    fn pages(&self) -> Box<dyn Iterator<Item = PageRecord> + '_>;

    /// Page-state point query for a single address.
    fn page_at(&self, addr: u64) -> Option<PageRecord> {
        self.pages().find(|record| record.range().contains_address(addr))
    }
}

/// Page size and allocation granularity governing placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemLayout {
    /// Unit at which the OS commits memory.
    pub page_size: u64,
    /// Minimum alignment of a fresh allocation's base address.
    pub allocation_granularity: u64,
}

impl SystemLayout {
    /// The running system's layout.
    pub fn query() -> Self {
        #[cfg(windows)]
        {
            use std::mem;

            use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

            let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
            unsafe { GetSystemInfo(&mut info) };
            Self {
                page_size: u64::from(info.dwPageSize),
                allocation_granularity: u64::from(info.dwAllocationGranularity),
            }
        }

        #[cfg(unix)]
        {
            let reported = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            let page_size = if reported > 0 {
                reported as u64
            } else {
                DEFAULT_PAGE_SIZE
            };
            // mmap only needs page alignment, but buffer bases keep the
            // Windows granularity so they form the same sparse lattice on
            // both platforms and discovery can walk merged map records at a
            // fixed stride.
            Self {
                page_size,
                allocation_granularity: 0x10000,
            }
        }
    }
}
