//! Free-region search for new buffers.
//!
//! Given a payload size and an absolute address window, walk the target's
//! page map and compute a committable region that is granularity-aligned,
//! page-size-rounded and fully contained in both the window and a single
//! free page region.

use crate::{
    error::{BufferError, Result},
    header::BUFFER_OVERHEAD,
    pages::{PageState, DEFAULT_PAGE_SIZE},
    process::ProcessTarget,
    range::AddressRange,
};

/// A committable location for a new buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Granularity-aligned base address.
    pub address: u64,
    /// Page-rounded size of the whole buffer, bookkeeping included.
    pub total_size: u64,
}

/// Find a region where a buffer with `size` payload bytes can be committed,
/// fully inside `window`.
///
/// Free page regions are scanned in ascending order; within each region four
/// candidate bases are tried, anchored to the region's end, the region's
/// start, the window's end and the window's start, in that order. The
/// anchors cover the three ways a region and the window can relate (region
/// inside window, window inside region, partial overlap): whenever a
/// granularity-aligned placement exists, one of them finds it. Rounding may
/// push an anchor outside the region or the window, so every candidate is
/// checked for containment in both.
pub fn find_buffer_location<P>(process: &P, size: u64, window: AddressRange) -> Result<Placement>
where
    P: ProcessTarget + ?Sized,
{
    let layout = process.layout();
    let total_size = total_buffer_size(size, layout.page_size);
    let granularity = layout.allocation_granularity;

    for page in process.pages() {
        if page.state != PageState::Free {
            continue;
        }
        let page_range = page.range();
        if !page_range.overlaps(&window) {
            continue;
        }
        if let Some(address) = place_in_page(page_range, window, total_size, granularity) {
            tracing::debug!(address, total_size, "found placement");
            return Ok(Placement {
                address,
                total_size,
            });
        }
    }

    tracing::debug!(
        size,
        window_start = window.start,
        window_end = window.end,
        "no free region fits"
    );
    Err(BufferError::NoSuitableRegion)
}

/// Whole-buffer size for `payload` bytes: overhead added, rounded up to the
/// effective page size.
fn total_buffer_size(payload: u64, system_page_size: u64) -> u64 {
    let mut page = DEFAULT_PAGE_SIZE.max(system_page_size);
    if page % system_page_size != 0 {
        page = round_up(page, system_page_size);
    }
    round_up(payload + BUFFER_OVERHEAD, page)
}

fn place_in_page(
    page: AddressRange,
    window: AddressRange,
    total_size: u64,
    granularity: u64,
) -> Option<u64> {
    let candidates = [
        // Highest placement anchored to the page end.
        page.end
            .checked_sub(total_size)
            .map(|base| round_down(base, granularity)),
        // Lowest placement anchored to the page start.
        checked_round_up(page.start, granularity),
        // Highest placement anchored to the window end.
        window
            .end
            .checked_sub(total_size)
            .map(|base| round_down(base, granularity)),
        // Lowest placement anchored to the window start.
        checked_round_up(window.start, granularity),
    ];

    for candidate in candidates.into_iter().flatten() {
        let Some(end) = candidate.checked_add(total_size) else {
            continue;
        };
        let region = AddressRange::new(candidate, end);
        if page.contains(&region) && window.contains(&region) {
            return Some(candidate);
        }
        tracing::trace!(candidate, "candidate rejected");
    }
    None
}

/// Smallest multiple of `multiple` that is `>= value`; identity when
/// `multiple` is zero.
pub(crate) fn round_up(value: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        return value;
    }
    match value % multiple {
        0 => value,
        rem => value + (multiple - rem),
    }
}

/// Largest multiple of `multiple` that is `<= value`; identity when
/// `multiple` is zero.
pub(crate) fn round_down(value: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        return value;
    }
    value - (value % multiple)
}

fn checked_round_up(value: u64, multiple: u64) -> Option<u64> {
    if multiple == 0 {
        return Some(value);
    }
    match value % multiple {
        0 => Some(value),
        rem => value.checked_add(multiple - rem),
    }
}
