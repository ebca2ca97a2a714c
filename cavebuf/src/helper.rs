//! Single entry point: find an existing buffer meeting constraints, or
//! create one.

use std::sync::{Arc, Mutex};

use crate::{
    buffer::Buffer,
    discovery::{self, DiscoveryCache},
    error::{BufferError, Result},
    placement::{self, Placement},
    process::ProcessTarget,
    range::AddressRange,
};

/// Placement/commit attempts before a creation request gives up.
pub const DEFAULT_CREATE_RETRIES: usize = 3;

/// Creation is serialized process-wide (well, module-wide): placement works
/// on a snapshot of the address space, so two creators racing between scan
/// and commit would chase the same region.
static CREATE_LOCK: Mutex<()> = Mutex::new(());

/// Façade composing placement, buffer creation and discovery over one
/// target process.
pub struct BufferHelper<P: ProcessTarget> {
    process: Arc<P>,
    cache: Mutex<DiscoveryCache<P>>,
}

impl<P: ProcessTarget> BufferHelper<P> {
    pub fn new(process: P) -> Self {
        Self::from_arc(Arc::new(process))
    }

    pub fn from_arc(process: Arc<P>) -> Self {
        Self {
            process,
            cache: Mutex::new(DiscoveryCache::new()),
        }
    }

    pub fn process(&self) -> &Arc<P> {
        &self.process
    }

    /// Compute where a buffer with `size` payload bytes could be committed
    /// inside `[min, max]`, without committing anything.
    pub fn find_buffer_location(&self, size: u64, min: u64, max: u64) -> Result<Placement> {
        placement::find_buffer_location(&*self.process, size, window(min, max)?)
    }

    /// Place and commit a new buffer with [`DEFAULT_CREATE_RETRIES`]
    /// attempts.
    pub fn create_buffer(&self, size: u64, min: u64, max: u64) -> Result<Buffer<P>> {
        self.create_buffer_with_retries(size, min, max, DEFAULT_CREATE_RETRIES)
    }

    /// Reuse a known buffer with at least `size` free payload bytes fully
    /// inside `[min, max]`, or place and commit a new one. The filter reads
    /// live headers, so a cached scan still reflects current free space.
    pub fn get_or_create_buffer(&self, size: u64, min: u64, max: u64) -> Result<Buffer<P>> {
        if let Some(buffer) = self
            .get_buffers_in_range(size, min, max, true)?
            .into_iter()
            .next()
        {
            tracing::debug!(base = buffer.base_address(), "reusing discovered buffer");
            return Ok(buffer);
        }
        self.create_buffer(size, min, max)
    }

    /// Place and commit a new buffer.
    ///
    /// Between the placement scan and the commit call another thread or an
    /// external allocator may grab the chosen region, so the loop retries
    /// with a fresh scan. Intermediate errors are all of that same racing
    /// kind; only the last one is surfaced.
    pub fn create_buffer_with_retries(
        &self,
        size: u64,
        min: u64,
        max: u64,
        retries: usize,
    ) -> Result<Buffer<P>> {
        let window = window(min, max)?;
        let _guard = CREATE_LOCK.lock()?;

        let mut last_error = BufferError::NoSuitableRegion;
        for attempt in 1..=retries.max(1) {
            match self.try_create(size, window) {
                Ok(buffer) => {
                    // The cached scan predates this buffer.
                    if let Ok(mut cache) = self.cache.lock() {
                        cache.clear();
                    }
                    return Ok(buffer);
                }
                Err(error) => {
                    tracing::warn!(%error, attempt, "buffer creation attempt failed");
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    fn try_create(&self, size: u64, window: AddressRange) -> Result<Buffer<P>> {
        let placement = placement::find_buffer_location(&*self.process, size, window)?;
        Buffer::create(Arc::clone(&self.process), placement)
    }

    /// All known buffers with at least `size` free payload bytes.
    pub fn get_buffers(&self, size: u64, use_cache: bool) -> Result<Vec<Buffer<P>>> {
        self.filtered(size, None, use_cache)
    }

    /// Like [`get_buffers`](Self::get_buffers), restricted to buffers whose
    /// payload region lies fully inside `[min, max]`.
    pub fn get_buffers_in_range(
        &self,
        size: u64,
        min: u64,
        max: u64,
        use_cache: bool,
    ) -> Result<Vec<Buffer<P>>> {
        self.filtered(size, Some(window(min, max)?), use_cache)
    }

    /// Drop the cached discovery results; the next lookup rescans.
    pub fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn filtered(
        &self,
        min_free: u64,
        window: Option<AddressRange>,
        use_cache: bool,
    ) -> Result<Vec<Buffer<P>>> {
        let mut cache = self.cache.lock()?;
        if !use_cache || cache.generation() == 0 {
            cache.refresh(&self.process);
        }
        Ok(discovery::filter_buffers(cache.buffers(), min_free, window))
    }
}

fn window(min: u64, max: u64) -> Result<AddressRange> {
    if min > max {
        return Err(BufferError::InvalidWindow { min, max });
    }
    Ok(AddressRange::new(min, max))
}
