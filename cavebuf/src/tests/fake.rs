//! Deterministic in-memory process target.
//!
//! Models an address space as a gap-free region list plus byte storage for
//! committed regions, so placement, the append protocol and discovery can
//! be exercised without OS calls.

use std::{collections::BTreeMap, sync::Mutex};

use crate::{
    error::{BufferError, Result},
    memory::MemorySource,
    pages::{PageEnumerator, PageRecord, PageState, SystemLayout},
    process::ProcessTarget,
};

pub(crate) const FAKE_PAGE_SIZE: u64 = 0x1000;
pub(crate) const FAKE_GRANULARITY: u64 = 0x10000;

pub(crate) struct FakeProcess {
    state: Mutex<FakeState>,
    layout: SystemLayout,
}

struct FakeState {
    /// Ascending and gap-free over `[0, space_end)`.
    regions: Vec<PageRecord>,
    /// Byte storage, keyed by committed base address.
    memory: BTreeMap<u64, Vec<u8>>,
    failing_commits: usize,
    commit_attempts: usize,
}

impl FakeProcess {
    pub(crate) fn new(space_end: u64) -> Self {
        Self {
            state: Mutex::new(FakeState {
                regions: vec![PageRecord {
                    base: 0,
                    size: space_end,
                    state: PageState::Free,
                    protection: 0,
                }],
                memory: BTreeMap::new(),
                failing_commits: 0,
                commit_attempts: 0,
            }),
            layout: SystemLayout {
                page_size: FAKE_PAGE_SIZE,
                allocation_granularity: FAKE_GRANULARITY,
            },
        }
    }

    /// Mark `[base, base + size)` reserved (test setup).
    pub(crate) fn reserve(&self, base: u64, size: u64) {
        self.state
            .lock()
            .unwrap()
            .carve(base, size, PageState::Reserved, false)
            .unwrap();
    }

    /// Commit a region without byte storage: reads of it fail, like a
    /// no-access page in a real process.
    pub(crate) fn commit_opaque(&self, base: u64, size: u64) {
        self.state
            .lock()
            .unwrap()
            .carve(base, size, PageState::Committed, false)
            .unwrap();
    }

    /// Make the next `count` commit calls fail, simulating losing the race
    /// for a region.
    pub(crate) fn fail_next_commits(&self, count: usize) {
        self.state.lock().unwrap().failing_commits = count;
    }

    pub(crate) fn commit_attempts(&self) -> usize {
        self.state.lock().unwrap().commit_attempts
    }
}

impl FakeState {
    fn carve(&mut self, base: u64, size: u64, state: PageState, backed: bool) -> Result<(), ()> {
        let end = base + size;
        let index = self
            .regions
            .iter()
            .position(|region| {
                region.state == PageState::Free
                    && region.base <= base
                    && end <= region.base + region.size
            })
            .ok_or(())?;

        let free = self.regions.remove(index);
        let free_end = free.base + free.size;
        let mut replacement = Vec::new();
        if free.base < base {
            replacement.push(PageRecord {
                base: free.base,
                size: base - free.base,
                state: PageState::Free,
                protection: 0,
            });
        }
        replacement.push(PageRecord {
            base,
            size,
            state,
            protection: 0x40,
        });
        if end < free_end {
            replacement.push(PageRecord {
                base: end,
                size: free_end - end,
                state: PageState::Free,
                protection: 0,
            });
        }
        self.regions.splice(index..index, replacement);

        if backed {
            self.memory.insert(base, vec![0; size as usize]);
        }
        Ok(())
    }
}

impl MemorySource for FakeProcess {
    fn read(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        let state = self.state.lock().unwrap();
        let Some((base, bytes)) = state.memory.range(..=addr).next_back() else {
            return Err(BufferError::Unreadable {
                addr,
                len: out.len(),
                code: 0,
            });
        };
        let offset = (addr - base) as usize;
        if offset + out.len() > bytes.len() {
            return Err(BufferError::Unreadable {
                addr,
                len: out.len(),
                code: 0,
            });
        }
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
        Ok(())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some((base, bytes)) = state.memory.range_mut(..=addr).next_back() else {
            return Err(BufferError::Unwritable {
                addr,
                len: data.len(),
                code: 0,
            });
        };
        let offset = (addr - base) as usize;
        if offset + data.len() > bytes.len() {
            return Err(BufferError::Unwritable {
                addr,
                len: data.len(),
                code: 0,
            });
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl PageEnumerator for FakeProcess {
    fn pages(&self) -> Box<dyn Iterator<Item = PageRecord> + '_> {
        let regions = self.state.lock().unwrap().regions.clone();
        // Flush records with the same state and protection collapse into
        // one, the way the kernel's maps view reports merged mappings.
        let mut merged: Vec<PageRecord> = Vec::with_capacity(regions.len());
        for region in regions {
            match merged.last_mut() {
                Some(last)
                    if last.state == region.state
                        && last.protection == region.protection
                        && last.base + last.size == region.base =>
                {
                    last.size += region.size;
                }
                _ => merged.push(region),
            }
        }
        Box::new(merged.into_iter())
    }
}

impl ProcessTarget for FakeProcess {
    fn commit(&self, addr: u64, len: u64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.commit_attempts += 1;
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(BufferError::CommitFailed(1455));
        }
        if len == 0 || addr % self.layout.page_size != 0 {
            return Err(BufferError::CommitFailed(87));
        }
        state
            .carve(addr, len, PageState::Committed, true)
            .map_err(|()| BufferError::CommitFailed(487))?;
        Ok(addr)
    }

    fn layout(&self) -> SystemLayout {
        self.layout
    }
}
