//! Cached page loading.
//!
//! [`PageCache`] is a fixed-capacity LRU of decoded pages; entries are
//! immutable once built and handed out as [`Rc`] clones, so a walk that
//! still holds an ancestor page is never invalidated by eviction.
//! [`PageReader`] combines a byte source, the format context, and the
//! cache into the `load_page` primitive every tree traversal consumes,
//! and checks a cooperative abort flag on each load.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ese::page::{FormatContext, Page};
use crate::ese::source::ByteSource;
use crate::EseError;

/// Default number of decoded pages kept by a reader.
pub const DEFAULT_PAGE_CACHE_SIZE: usize = 64;

/// A fixed-capacity least-recently-used cache of decoded pages.
pub struct PageCache {
    capacity: usize,
    pages: HashMap<u32, Rc<Page>>,
    order: VecDeque<u32>,
}

impl PageCache {
    /// Create a cache holding at most `capacity` pages.
    pub fn new(capacity: usize) -> Self {
        PageCache {
            capacity: capacity.max(1),
            pages: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Fetch a page, refreshing its recency.
    pub fn get(&mut self, number: u32) -> Option<Rc<Page>> {
        let page = self.pages.get(&number).cloned()?;
        self.touch(number);
        Some(page)
    }

    /// Insert a page, evicting the least recently used entry when full.
    pub fn insert(&mut self, number: u32, page: Rc<Page>) {
        if self.pages.contains_key(&number) {
            self.touch(number);
            self.pages.insert(number, page);
            return;
        }
        if self.pages.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.pages.remove(&evicted);
            }
        }
        self.pages.insert(number, page);
        self.order.push_back(number);
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn touch(&mut self, number: u32) {
        if let Some(position) = self.order.iter().position(|&n| n == number) {
            self.order.remove(position);
            self.order.push_back(number);
        }
    }
}

/// A cooperative interruption flag shared with a [`PageReader`].
///
/// Setting it terminates the next page load; the interrupted iterator is
/// permanently done. The handle is the only part of the engine that may
/// cross a thread boundary (e.g. into a signal handler).
#[derive(Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Request that the owning reader stop at its next page load.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true if an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Loads pages through a byte source with caching and abort checking.
pub struct PageReader<S: ByteSource> {
    source: S,
    ctx: FormatContext,
    cache: PageCache,
    abort: Arc<AtomicBool>,
}

impl<S: ByteSource> PageReader<S> {
    /// Create a reader over `source` with the given cache capacity.
    pub fn new(source: S, ctx: FormatContext, cache_capacity: usize) -> Self {
        PageReader {
            source,
            ctx,
            cache: PageCache::new(cache_capacity),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The format context this reader parses pages with.
    pub fn context(&self) -> &FormatContext {
        &self.ctx
    }

    /// A handle that cooperatively interrupts this reader.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort))
    }

    /// Load page `number` (1-based), from cache when warm.
    pub fn load_page(&mut self, number: u32) -> Result<Rc<Page>, EseError> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(EseError::Io("page load aborted".to_string()));
        }
        if number == 0 || number as u64 > self.ctx.last_page_number {
            return Err(EseError::Io(format!(
                "page {} out of range (last page is {})",
                number, self.ctx.last_page_number
            )));
        }
        if let Some(page) = self.cache.get(number) {
            return Ok(page);
        }

        let mut buf = vec![0u8; self.ctx.page_size as usize];
        self.source
            .read_exact_at(self.ctx.page_offset(number), &mut buf)?;
        let page = Rc::new(Page::parse(&buf, number, &self.ctx)?);
        self.cache.insert(number, Rc::clone(&page));
        Ok(page)
    }
}
