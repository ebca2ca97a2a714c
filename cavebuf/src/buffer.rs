//! Buffer handles: creation, discovery probes and the locked append
//! protocol.

use std::sync::{Arc, Mutex};

use crate::{
    error::{BufferError, Result},
    header::{BufferHeader, BUFFER_OVERHEAD, HEADER_LEN},
    magic::{matches_magic, BUFFER_MAGIC, MAGIC_LEN},
    memory::MemorySource,
    pages::PageState,
    placement::Placement,
    process::ProcessTarget,
    spin::SpinWait,
};

/// Handle to a buffer living in a target process.
///
/// The buffer itself (magic, header, payload) is in the target's memory;
/// the handle only carries the base address and an intra-module mutex.
/// Clones share that mutex, so threads of one module appending through
/// clones of the same handle serialize locally before touching the shared
/// lock flag. Handles obtained independently (e.g. through discovery in
/// another module) coordinate through the flag alone.
pub struct Buffer<P: ProcessTarget> {
    process: Arc<P>,
    base: u64,
    append_lock: Arc<Mutex<()>>,
}

impl<P: ProcessTarget> Clone for Buffer<P> {
    fn clone(&self) -> Self {
        Self {
            process: Arc::clone(&self.process),
            base: self.base,
            append_lock: Arc::clone(&self.append_lock),
        }
    }
}

impl<P: ProcessTarget> std::fmt::Debug for Buffer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("base", &self.base).finish()
    }
}

impl<P: ProcessTarget> Buffer<P> {
    /// Commit a fresh buffer at `placement` and write its magic and header.
    pub(crate) fn create(process: Arc<P>, placement: Placement) -> Result<Self> {
        process.commit(placement.address, placement.total_size)?;
        Self::initialize(process, placement)
    }

    /// Write the magic and a fresh header into a region the caller has
    /// already committed, e.g. through an allocator of its own. The region
    /// must cover `placement` exactly as a commit would have.
    pub fn create_preallocated(process: Arc<P>, placement: Placement) -> Result<Self> {
        Self::initialize(process, placement)
    }

    fn initialize(process: Arc<P>, placement: Placement) -> Result<Self> {
        let buffer = Self::handle(process, placement.address);
        buffer.process.write(placement.address, &BUFFER_MAGIC)?;
        let header = BufferHeader::new(
            placement.address + BUFFER_OVERHEAD,
            placement.total_size - BUFFER_OVERHEAD,
        );
        buffer.write_header(&header)?;

        tracing::debug!(
            base = placement.address,
            payload_size = header.size,
            "created buffer"
        );
        Ok(buffer)
    }

    /// Reconstruct a handle for a buffer previously created at `addr`, if
    /// one is there.
    pub fn from_address(process: Arc<P>, addr: u64) -> Option<Self> {
        Self::is_buffer(&*process, addr).then(|| Self::handle(process, addr))
    }

    /// Whether `addr` is the start of a committed region carrying the buffer
    /// magic. Read failures while probing mean "not a buffer"; arbitrary
    /// addresses are legitimately unreadable.
    pub fn is_buffer(process: &P, addr: u64) -> bool {
        let committed = matches!(
            process.page_at(addr),
            Some(record) if record.state == PageState::Committed
        );
        if !committed {
            return false;
        }

        let mut tag = [0u8; MAGIC_LEN];
        if !process.safe_read(addr, &mut tag) {
            tracing::trace!(addr, "magic probe unreadable");
            return false;
        }
        matches_magic(&tag)
    }

    /// Magic probe for an address already known to lie in a committed
    /// region; discovery calls this while walking the page map and skips
    /// the page-state query [`is_buffer`](Self::is_buffer) performs.
    pub(crate) fn probe_committed(process: &Arc<P>, addr: u64) -> Option<Self> {
        let mut tag = [0u8; MAGIC_LEN];
        if !process.safe_read(addr, &mut tag) || !matches_magic(&tag) {
            return None;
        }
        Some(Self::handle(Arc::clone(process), addr))
    }

    fn handle(process: Arc<P>, base: u64) -> Self {
        Self {
            process,
            base,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Address of the magic tag, i.e. the start of the whole buffer.
    pub fn base_address(&self) -> u64 {
        self.base
    }

    fn header_addr(&self) -> u64 {
        self.base + MAGIC_LEN as u64
    }

    /// Current header snapshot.
    pub fn header(&self) -> Result<BufferHeader> {
        let mut bytes = [0u8; HEADER_LEN];
        self.process.read(self.header_addr(), &mut bytes)?;
        Ok(BufferHeader::from_bytes(&bytes))
    }

    fn write_header(&self, header: &BufferHeader) -> Result<()> {
        self.process.write(self.header_addr(), &header.to_bytes())
    }

    /// Whether `bytes` more payload bytes currently fit.
    pub fn can_fit(&self, bytes: u64) -> bool {
        self.header().map(|h| h.can_fit(bytes)).unwrap_or(false)
    }

    /// Append `bytes`, returning the address they were written to. The
    /// write offset is re-aligned to the buffer's current alignment
    /// afterwards.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        self.append_inner(bytes, None)
    }

    /// Append with an explicit post-append alignment instead of the
    /// buffer's current one. `alignment` is recorded in the header, so it
    /// also governs subsequent plain [`append`](Self::append) calls.
    pub fn append_aligned(&self, bytes: &[u8], alignment: u32) -> Result<u64> {
        self.append_inner(bytes, Some(alignment))
    }

    fn append_inner(&self, bytes: &[u8], alignment: Option<u32>) -> Result<u64> {
        // Threads of this module serialize here; the header lock flag below
        // is what other modules (and processes) observe.
        let _guard = self.append_lock.lock()?;

        let mut header = self.acquire_header_lock()?;
        let result = self.write_payload(&mut header, bytes, alignment);

        // The flag must be cleared on every exit path, success or not.
        header.unlock();
        let unlock_result = self.write_header(&header);

        let addr = result?;
        unlock_result?;
        Ok(addr)
    }

    /// Spin until the shared lock flag is clear, then take it. This is the
    /// inter-module coordination: any participant honoring the magic/header
    /// protocol waits here while another writes. [`SpinWait`] supplies the
    /// poll interval and the optional bounds on the wait.
    fn acquire_header_lock(&self) -> Result<BufferHeader> {
        let wait = SpinWait::start();
        loop {
            let mut header = self.header()?;
            if !header.is_locked() {
                header.lock();
                self.write_header(&header)?;
                return Ok(header);
            }
            wait.pause()?;
        }
    }

    fn write_payload(
        &self,
        header: &mut BufferHeader,
        bytes: &[u8],
        alignment: Option<u32>,
    ) -> Result<u64> {
        let requested = bytes.len() as u64;
        if !header.can_fit(requested) {
            return Err(BufferError::NoSpace {
                requested,
                remaining: header.remaining(),
            });
        }

        let addr = header.write_ptr();
        self.process.write(addr, bytes)?;
        header.advance(requested);
        if let Some(alignment) = alignment {
            header.set_alignment(alignment);
        }
        header.align();

        tracing::trace!(addr, len = requested, offset = header.offset, "appended");
        Ok(addr)
    }
}
