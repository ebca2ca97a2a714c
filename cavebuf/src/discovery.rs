//! Locating existing buffers by their magic tag.

use std::sync::Arc;

use crate::{
    buffer::Buffer,
    header::BUFFER_OVERHEAD,
    pages::PageState,
    placement::round_up,
    process::ProcessTarget,
    range::AddressRange,
};

/// Buffers found by the last bulk scan, kept under the helper's mutex.
pub(crate) struct DiscoveryCache<P: ProcessTarget> {
    buffers: Vec<Buffer<P>>,
    generation: u64,
}

impl<P: ProcessTarget> DiscoveryCache<P> {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Vec::new(),
            generation: 0,
        }
    }

    /// Generation 0 means no scan has populated the cache yet.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn buffers(&self) -> &[Buffer<P>] {
        &self.buffers
    }

    pub(crate) fn refresh(&mut self, process: &Arc<P>) {
        self.buffers = scan(process);
        self.generation += 1;
        tracing::debug!(
            generation = self.generation,
            found = self.buffers.len(),
            "discovery scan complete"
        );
    }

    pub(crate) fn clear(&mut self) {
        self.buffers.clear();
        self.generation = 0;
    }
}

/// Walk the committed regions of `process` and reconstruct a handle for
/// every granularity-aligned address whose leading bytes carry the buffer
/// magic. Buffer bases are always granularity-aligned, but they are not
/// always record bases: the kernel merges flush mappings with identical
/// state and protection into one map record, so a single committed record
/// can hold several buffers. Stepping each record at the granularity
/// visits every possible start.
pub(crate) fn scan<P: ProcessTarget>(process: &Arc<P>) -> Vec<Buffer<P>> {
    let granularity = process.layout().allocation_granularity.max(1);
    let mut found = Vec::new();
    let mut committed = 0usize;
    for record in process.pages() {
        if record.state != PageState::Committed {
            continue;
        }
        committed += 1;
        let end = record.base.saturating_add(record.size);
        let mut probe = round_up(record.base, granularity);
        while probe.saturating_add(BUFFER_OVERHEAD) <= end {
            if let Some(buffer) = Buffer::probe_committed(process, probe) {
                found.push(buffer);
            }
            probe += granularity;
        }
    }
    tracing::trace!(committed, found = found.len(), "scanned committed regions");
    found
}

/// Buffers with at least `min_free` payload bytes remaining whose payload
/// region lies fully inside `window` (when given).
pub(crate) fn filter_buffers<P: ProcessTarget>(
    buffers: &[Buffer<P>],
    min_free: u64,
    window: Option<AddressRange>,
) -> Vec<Buffer<P>> {
    buffers
        .iter()
        .filter(|buffer| {
            let Ok(header) = buffer.header() else {
                return false;
            };
            if header.remaining() < min_free {
                return false;
            }
            match window {
                Some(window) => window.contains(&AddressRange::new(
                    header.data_ptr,
                    header.data_ptr + header.size,
                )),
                None => true,
            }
        })
        .cloned()
        .collect()
}
