//! Ties the [`Device`] and [`Cache`] together: fetch-through-cache reads,
//! write-through-on-eviction, and page (de)allocation via the freelist.

use crate::cache::Cache;
use crate::device::Device;
use crate::error::Result;
use crate::freelist::Freelist;
use crate::page::{Page, PageKind};

pub(crate) struct Pager {
    device: Device,
    cache: Cache,
    page_size: u64,
}

impl Pager {
    pub fn new(device: Device, cache_capacity: usize, page_size: u64) -> Self {
        Self {
            device,
            cache: Cache::new(cache_capacity),
            page_size,
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn device_len(&self) -> u64 {
        self.device.len()
    }

    pub fn is_in_memory(&self) -> bool {
        self.device.is_in_memory()
    }

    /// Ensure `addr` is resident, reading it from the device if necessary.
    fn ensure_resident(&mut self, addr: u64, kind: PageKind) -> Result<()> {
        if self.cache.contains(addr) {
            return Ok(());
        }
        let mut page = Page::alloc(self.page_size as usize, kind, addr);
        self.device.read(addr, page.buf_mut())?;
        page.clear_dirty();
        let device = &mut self.device;
        self.cache
            .put(page, &mut |p| device.write(p.addr(), p.buf()))
    }

    pub fn fetch(&mut self, addr: u64, kind: PageKind) -> Result<&Page> {
        self.ensure_resident(addr, kind)?;
        Ok(self.cache.get(addr).expect("just made resident"))
    }

    pub fn fetch_mut(&mut self, addr: u64, kind: PageKind) -> Result<&mut Page> {
        self.ensure_resident(addr, kind)?;
        Ok(self.cache.get_mut(addr).expect("just made resident"))
    }

    pub fn pin(&mut self, addr: u64) {
        if let Some(p) = self.cache.get_mut(addr) {
            p.pin();
        }
    }

    pub fn unpin(&mut self, addr: u64) {
        if let Some(p) = self.cache.get_mut(addr) {
            p.unpin();
        }
    }

    /// Allocate `n_pages` contiguous pages, preferring the freelist and
    /// falling back to extending the device.
    pub fn alloc_pages(&mut self, freelist: &mut Freelist, n_pages: u64) -> Result<u64> {
        if let Some(addr) = freelist.alloc(n_pages) {
            return Ok(addr);
        }
        self.device.extend(n_pages * self.page_size)
    }

    /// Allocate a single page bypassing the freelist entirely (used for the
    /// header page on `create`, per the *ignore-freelist* flag in §4.4).
    pub fn alloc_ignoring_freelist(&mut self, n_pages: u64) -> Result<u64> {
        self.device.extend(n_pages * self.page_size)
    }

    /// Insert a freshly-allocated, zeroed, dirty page at `addr`.
    pub fn new_page(&mut self, addr: u64, kind: PageKind) -> Result<&mut Page> {
        let mut page = Page::alloc(self.page_size as usize, kind, addr);
        page.mark_dirty();
        let device = &mut self.device;
        self.cache
            .put(page, &mut |p| device.write(p.addr(), p.buf()))?;
        Ok(self.cache.get_mut(addr).expect("just inserted"))
    }

    pub fn free_page(&mut self, freelist: &mut Freelist, addr: u64, n_pages: u64) {
        self.cache.remove(addr);
        freelist.free(addr, n_pages);
    }

    /// Drop a page from the cache without touching the freelist. Used when
    /// the caller will perform a single, combined `Freelist::free` call for
    /// a whole contiguous run (e.g. a multi-page blob).
    pub fn evict(&mut self, addr: u64) {
        self.cache.remove(addr);
    }

    /// Write a single resident page straight through to the device and
    /// clear its dirty flag. Used by the header write path, which must be
    /// synchronous rather than waiting for cache eviction.
    pub fn write_through(&mut self, addr: u64) -> Result<()> {
        if let Some(page) = self.cache.get_mut(addr) {
            self.device.write(addr, page.buf())?;
            page.clear_dirty();
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<()> {
        let device = &mut self.device;
        self.cache.flush_all(|p| device.write(p.addr(), p.buf()))?;
        self.device.flush()
    }

    pub fn check_integrity(&self) -> Result<()> {
        self.cache.check_integrity()
    }
}
