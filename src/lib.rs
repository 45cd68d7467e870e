//! `hamcrab`: an embedded, file-backed ordered key/value store.
//!
//! A single process opens one database file (or an anonymous in-memory
//! store) at a time, inserts/finds/erases byte-string records under a
//! user-orderable byte-string key, and gets back a consistent image across
//! process restarts. The storage engine is a classic bottom-up stack: a
//! memory-mapped [`Device`](device), a fixed-size [`Page`](page) cache, a
//! first-fit [`Freelist`](freelist), a [`blob`] store for records too large
//! to pack inline, and a [`btree`] index tying it together. [`Database`] is
//! the facade applications actually use.
//!
//! There is no multi-writer concurrency and no write-ahead log: a dirty
//! database that is not cleanly closed is only guaranteed consistent up to
//! its last successful `flush`.

mod blob;
mod btree;
mod cache;
pub mod compare;
mod cursor;
mod device;
pub mod error;
mod freelist;
mod header;
mod page;
mod pager;
mod rid;
mod scope;

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

pub use compare::{lexicographic, CompareFn, PrefixCompareFn, PrefixOrdering};
pub use error::{Error, ErrorCode, Result};

use btree::BTreeConfig;
use cache::DEFAULT_CACHE_PAGES;
use cursor::CursorList;
use device::Device;
use header::{Header, CHAIN_PTR_SIZE, HEADER_ADDR, HEADER_SIZE};
use page::PageKind;
use pager::Pager;
use rid::{entry_flags, RecordLocation};
use scope::Scope;

/// Recognised public flags (§6). Public flags start at `0x1000` so they
/// never collide with the persisted per-entry flags in [`rid::entry_flags`].
pub mod flags {
    /// Flags accepted by [`crate::OpenOptions`].
    pub mod open {
        pub const READ_ONLY: u32 = 0x1000;
        pub const IN_MEMORY: u32 = 0x2000;
        pub const DISABLE_VARIABLE_KEY_LENGTH: u32 = 0x4000;
    }
    /// Flags accepted by [`crate::Database::insert`].
    pub mod insert {
        pub const OVERWRITE: u32 = 0x1000;
    }
    /// Flags accepted by [`crate::Database::begin_scope`].
    pub mod scope {
        pub const TEMPORARY: u32 = 0x1000;
    }
}

/// Default page size: 4 KiB, a multiple of 512 and of every common host
/// page granularity.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Default maximum key length: `32 - sizeof(index-entry-header) - 1` (§6).
pub const DEFAULT_KEY_SIZE: u16 = (32 - btree::ENTRY_FIXED_SIZE - 1) as u16;

/// Builder for [`Database::open`]/[`Database::create`] parameters (§4.9).
#[derive(Clone)]
pub struct OpenOptions {
    page_size: u64,
    cache_pages: usize,
    key_size: Option<u16>,
    flags: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            key_size: None,
            flags: 0,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(&mut self, page_size: u64) -> &mut Self {
        self.page_size = page_size;
        self
    }

    pub fn cache_pages(&mut self, cache_pages: usize) -> &mut Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn key_size(&mut self, key_size: u16) -> &mut Self {
        self.key_size = Some(key_size);
        self
    }

    pub fn flags(&mut self, flags: u32) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Open an existing database file (§4.8 `open` sequence).
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Database> {
        Database::open_with(self, path.as_ref())
    }

    /// Create a new file-backed database (§4.8 `create` sequence).
    pub fn create(&self, path: impl AsRef<Path>, mode: u32) -> Result<Database> {
        Database::create_with(self, Some(path.as_ref()), mode)
    }

    /// Create a new anonymous, in-memory database. Legal even without the
    /// `in-memory` flag set; it can never be reopened by path (§4.1).
    pub fn create_in_memory(&self) -> Result<Database> {
        Database::create_with(self, None, 0)
    }
}

/// Combine the full comparator with an optional prefix comparator per the
/// contract in §4.6: try the prefix comparator first, fall back to the full
/// comparator on [`PrefixOrdering::NeedFullKey`]. A free function (not a
/// `Database` method) so callers can borrow it alongside a disjoint `&mut
/// self.pager` without a whole-`self` borrow conflict.
fn make_cmp<'a>(
    compare: &'a CompareFn,
    prefix_compare: &'a Option<PrefixCompareFn>,
) -> impl Fn(&[u8], &[u8]) -> Ordering + 'a {
    move |a: &[u8], b: &[u8]| {
        if let Some(pc) = prefix_compare {
            match pc(a, a.len(), b, b.len()) {
                PrefixOrdering::Less => return Ordering::Less,
                PrefixOrdering::Equal => return Ordering::Equal,
                PrefixOrdering::Greater => return Ordering::Greater,
                PrefixOrdering::NeedFullKey => {}
            }
        }
        compare(a, b)
    }
}

/// Resolve a persisted `(flags, rid)` pair back into record bytes, reading
/// through the blob store when the record was not packed inline.
fn decode_record(pager: &mut Pager, flags: u8, rid: u64) -> Result<Vec<u8>> {
    match rid::decode(flags, rid) {
        RecordLocation::Empty => Ok(Vec::new()),
        RecordLocation::Tiny(bytes) => Ok(bytes),
        RecordLocation::Small(bytes) => Ok(bytes.to_vec()),
        RecordLocation::Blob(addr) => {
            let mut out = Vec::new();
            blob::read(pager, addr, &mut out)?;
            Ok(out)
        }
    }
}

/// Read the inline freelist payload plus any overflow-page chain out of a
/// freshly-read header page buffer (§4.4, §4.9).
fn load_freelist(pager: &mut Pager, header_buf: &[u8], page_size: u64) -> Result<(freelist::Freelist, Vec<u64>)> {
    let page_size = page_size as usize;
    let inline_cap = page_size - HEADER_SIZE - CHAIN_PTR_SIZE;
    let cont_cap = page_size - CHAIN_PTR_SIZE;

    let mut bytes = header_buf[HEADER_SIZE..HEADER_SIZE + inline_cap].to_vec();
    let mut overflow_pages = Vec::new();
    let mut next = LittleEndian::read_u64(&header_buf[page_size - CHAIN_PTR_SIZE..page_size]);
    while next != 0 {
        overflow_pages.push(next);
        let page = pager.fetch(next, PageKind::FreelistOverflow)?;
        let buf = page.buf();
        bytes.extend_from_slice(&buf[..cont_cap]);
        next = LittleEndian::read_u64(&buf[cont_cap..cont_cap + CHAIN_PTR_SIZE]);
    }

    let fl = freelist::Freelist::decode(page_size as u64, &bytes)?;
    Ok((fl, overflow_pages))
}

/// Top-level database handle (§3 "Database", §4.8).
///
/// Not `Send`/`Sync`: per §5, a handle is single-threaded and unsynchronized
/// access from multiple threads is the caller's responsibility.
pub struct Database {
    pager: Pager,
    freelist: freelist::Freelist,
    /// Addresses of currently-allocated freelist overflow pages, in chain
    /// order. Never shrinks once grown (§4.9 design note): a freelist that
    /// later needs fewer overflow pages leaves the tail ones allocated but
    /// empty rather than freeing and risking churn during `persist`.
    overflow_pages: Vec<u64>,
    root: u64,
    page_size: u64,
    key_size: u16,
    /// Persisted header flags (distinct from the transient open-time flags
    /// in `OpenOptions`, though both share the `flags::open` bit layout).
    header_flags: u32,
    serial: u32,
    dirty: bool,
    read_only: bool,
    path: Option<PathBuf>,
    compare: CompareFn,
    prefix_compare: Option<PrefixCompareFn>,
    cursors: CursorList,
    scope: Option<Scope>,
    default_key_arena: Vec<u8>,
    default_record_arena: Vec<u8>,
    last_error: Option<ErrorCode>,
}

impl Database {
    fn create_with(options: &OpenOptions, path: Option<&Path>, mode: u32) -> Result<Self> {
        header::validate_page_size(options.page_size)?;
        header::check_host_page_alignment(options.page_size)?;
        let page_size = options.page_size;
        let key_size = options.key_size.unwrap_or(DEFAULT_KEY_SIZE);
        if btree::Node::max_entries(page_size, key_size) < 4 {
            return Err(Error::InvalidKeySize(key_size as usize));
        }

        let in_memory = path.is_none() || options.flags & flags::open::IN_MEMORY != 0;
        let device = match path {
            Some(p) if !in_memory => Device::create(p, mode)?,
            _ => Device::create_in_memory(),
        };

        let mut pager = Pager::new(device, options.cache_pages.max(1), page_size);
        let header_addr = pager.alloc_ignoring_freelist(1)?;
        debug_assert_eq!(header_addr, HEADER_ADDR);
        pager.new_page(HEADER_ADDR, PageKind::Header)?;

        let mut freelist = freelist::Freelist::new(page_size);
        let root = btree::create_root(&mut pager, &mut freelist)?;

        let mut db = Self {
            pager,
            freelist,
            overflow_pages: Vec::new(),
            root,
            page_size,
            key_size,
            header_flags: options.flags,
            serial: 1,
            dirty: true,
            read_only: false,
            path: if in_memory { None } else { path.map(|p| p.to_path_buf()) },
            compare: compare::lexicographic(),
            prefix_compare: None,
            cursors: CursorList::default(),
            scope: None,
            default_key_arena: Vec::new(),
            default_record_arena: Vec::new(),
            last_error: None,
        };
        db.persist_header_and_freelist()?;
        db.pager.flush_all()?;
        Ok(db)
    }

    fn open_with(options: &OpenOptions, path: &Path) -> Result<Self> {
        if options.flags & flags::open::IN_MEMORY != 0 {
            return Err(Error::InvalidParameter(
                "in-memory databases cannot be reopened",
            ));
        }
        let read_only = options.flags & flags::open::READ_ONLY != 0;
        let mut device = Device::open(path, read_only)?;

        let mut bootstrap = vec![0u8; header::BOOTSTRAP_SIZE];
        device.read(0, &mut bootstrap)?;
        let page_size = Header::bootstrap_page_size(&bootstrap)? as u64;
        header::validate_page_size(page_size)?;

        let mut pager = Pager::new(device, options.cache_pages.max(1), page_size);
        let header_buf = pager.fetch(HEADER_ADDR, PageKind::Header)?.buf().to_vec();
        let header = Header::decode(&header_buf)?;
        let (freelist, overflow_pages) = load_freelist(&mut pager, &header_buf, page_size)?;

        if btree::Node::max_entries(page_size, header.key_size) < 4 {
            return Err(Error::IntegrityViolated("persisted key size too large for page size"));
        }

        Ok(Self {
            pager,
            freelist,
            overflow_pages,
            root: header.root_page,
            page_size,
            key_size: header.key_size,
            header_flags: header.flags,
            serial: header.serial,
            dirty: false,
            read_only,
            path: Some(path.to_path_buf()),
            compare: compare::lexicographic(),
            prefix_compare: None,
            cursors: CursorList::default(),
            scope: None,
            default_key_arena: Vec::new(),
            default_record_arena: Vec::new(),
            last_error: None,
        })
    }

    /// Allocate (if needed) and write the freelist overflow-page chain, then
    /// write the header page (preamble + database header + inline freelist
    /// payload + overflow chain head) straight through to the device.
    fn persist_header_and_freelist(&mut self) -> Result<()> {
        if self.read_only {
            return Err(Error::DbReadOnly);
        }
        let page_size = self.page_size as usize;
        let inline_cap = page_size - HEADER_SIZE - CHAIN_PTR_SIZE;
        let cont_cap = page_size - CHAIN_PTR_SIZE;

        // Grow the overflow chain until it can hold whatever does not fit
        // inline. Each allocation can itself shrink the freelist's encoded
        // size, so re-check after every grow.
        loop {
            let bytes = self.freelist.encode();
            let overflow_len = bytes.len().saturating_sub(inline_cap);
            let needed = overflow_len.div_ceil(cont_cap.max(1));
            if self.overflow_pages.len() >= needed {
                break;
            }
            let addr = self.pager.alloc_pages(&mut self.freelist, 1)?;
            self.overflow_pages.push(addr);
        }

        let bytes = self.freelist.encode();
        let overflow_len = bytes.len().saturating_sub(inline_cap);
        let mut offset = 0usize;
        let chain = self.overflow_pages.clone();
        for (i, &addr) in chain.iter().enumerate() {
            let next = chain.get(i + 1).copied().unwrap_or(0);
            let take = overflow_len.saturating_sub(offset).min(cont_cap);
            let page = self.pager.fetch_mut(addr, PageKind::FreelistOverflow)?;
            let buf = page.buf_mut();
            buf.iter_mut().for_each(|b| *b = 0);
            if take > 0 {
                buf[..take].copy_from_slice(&bytes[inline_cap + offset..inline_cap + offset + take]);
            }
            LittleEndian::write_u64(&mut buf[cont_cap..cont_cap + CHAIN_PTR_SIZE], next);
            offset += take;
        }
        for &addr in &chain {
            self.pager.write_through(addr)?;
        }

        let mut header_buf = vec![0u8; page_size];
        Header::new(self.serial, self.header_flags, self.page_size as u32, self.key_size, self.root)
            .encode(&mut header_buf);
        let inline_len = bytes.len().min(inline_cap);
        header_buf[HEADER_SIZE..HEADER_SIZE + inline_len].copy_from_slice(&bytes[..inline_len]);
        let head = chain.first().copied().unwrap_or(0);
        LittleEndian::write_u64(&mut header_buf[page_size - CHAIN_PTR_SIZE..page_size], head);

        {
            let page = self.pager.fetch_mut(HEADER_ADDR, PageKind::Header)?;
            page.buf_mut().copy_from_slice(&header_buf);
        }
        self.pager.write_through(HEADER_ADDR)?;
        self.dirty = false;
        Ok(())
    }

    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        self.last_error = Some(match &result {
            Ok(_) => ErrorCode::Success,
            Err(e) => ErrorCode::from(e),
        });
        result
    }

    fn validate_key_size(&self, key: &[u8]) -> Result<()> {
        if self.header_flags & flags::open::DISABLE_VARIABLE_KEY_LENGTH != 0 {
            if key.len() != self.key_size as usize {
                return Err(Error::InvalidKeySize(key.len()));
            }
        } else if key.len() > self.key_size as usize {
            return Err(Error::InvalidKeySize(key.len()));
        }
        Ok(())
    }

    fn find_impl(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.validate_key_size(key)?;
        let cmp = make_cmp(&self.compare, &self.prefix_compare);
        let (flags, rid) = btree::find(&mut self.pager, self.root, key, &cmp)?;
        let record = decode_record(&mut self.pager, flags, rid)?;
        // §3 "Transaction scope": a live scope's key/record arenas hold the
        // bytes for the call that is currently using them, whether or not
        // the caller ever inspects the arenas directly.
        if let Some(scope) = self.scope.as_mut() {
            let key_arena = scope.key_arena_mut();
            key_arena.clear();
            key_arena.extend_from_slice(key);
            let record_arena = scope.record_arena_mut();
            record_arena.clear();
            record_arena.extend_from_slice(&record);
        }
        Ok(record)
    }

    /// Look up `key`. Returns [`Error::KeyNotFound`] if absent (§4.6 Find).
    pub fn find(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let result = self.find_impl(key);
        self.note(result)
    }

    fn insert_impl(&mut self, key: &[u8], record: &[u8], insert_flags: u32) -> Result<()> {
        if self.read_only {
            return Err(Error::DbReadOnly);
        }
        self.validate_key_size(key)?;
        let overwrite = insert_flags & flags::insert::OVERWRITE != 0;

        let (entry_flags_val, rid) = match rid::try_pack_inline(record) {
            Some(pair) => pair,
            None => {
                let addr = blob::write(&mut self.pager, &mut self.freelist, record)?;
                (entry_flags::OVERFLOW, addr)
            }
        };

        let cmp = make_cmp(&self.compare, &self.prefix_compare);
        let cfg = BTreeConfig {
            page_size: self.page_size,
            key_size: self.key_size,
        };
        match btree::insert(
            &mut self.pager,
            &mut self.freelist,
            &cfg,
            &mut self.root,
            key,
            entry_flags_val,
            rid,
            overwrite,
            &cmp,
        ) {
            Ok(Some((old_flags, old_rid))) => {
                if let RecordLocation::Blob(old_addr) = rid::decode(old_flags, old_rid) {
                    blob::free(&mut self.pager, &mut self.freelist, old_addr)?;
                }
                self.dirty = true;
                Ok(())
            }
            Ok(None) => {
                self.dirty = true;
                Ok(())
            }
            Err(e) => {
                // §5: a blob written before the index insert must be freed
                // if the insert itself fails (e.g. DuplicateKey).
                if entry_flags_val & entry_flags::OVERFLOW != 0 {
                    let _ = blob::free(&mut self.pager, &mut self.freelist, rid);
                }
                Err(e)
            }
        }
    }

    /// Insert `key -> record`. Fails with [`Error::DuplicateKey`] unless
    /// `insert_flags` includes [`flags::insert::OVERWRITE`] (§4.6 Insert).
    pub fn insert(&mut self, key: &[u8], record: &[u8], insert_flags: u32) -> Result<()> {
        let result = self.insert_impl(key, record, insert_flags);
        self.note(result)
    }

    fn erase_impl(&mut self, key: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::DbReadOnly);
        }
        self.validate_key_size(key)?;
        let cmp = make_cmp(&self.compare, &self.prefix_compare);
        let cfg = BTreeConfig {
            page_size: self.page_size,
            key_size: self.key_size,
        };
        let (flags_val, rid) =
            btree::erase(&mut self.pager, &mut self.freelist, &cfg, &mut self.root, key, &cmp)?;
        if let RecordLocation::Blob(addr) = rid::decode(flags_val, rid) {
            blob::free(&mut self.pager, &mut self.freelist, addr)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Remove `key` and free any blob it referenced (§4.6 Erase).
    pub fn erase(&mut self, key: &[u8]) -> Result<()> {
        let result = self.erase_impl(key);
        self.note(result)
    }

    /// Walk every entry in key order, decoding each record before invoking
    /// `visit` (§4.9). Collects raw
    /// `(key, flags, rid)` tuples first so the in-order tree walk (which
    /// holds `&mut self.pager` throughout) never overlaps with the
    /// record-decoding pass (which also needs `&mut self.pager`).
    pub fn dump(&mut self, mut visit: impl FnMut(&[u8], &[u8])) -> Result<()> {
        let cursor_id = self.cursors.register();
        let result = (|| {
            let mut raw: Vec<(Vec<u8>, u8, u64)> = Vec::new();
            btree::dump(&mut self.pager, self.root, &mut |k, f, r| {
                raw.push((k.to_vec(), f, r));
            })?;
            for (key, flags_val, rid) in raw {
                let record = decode_record(&mut self.pager, flags_val, rid)?;
                visit(&key, &record);
            }
            Ok(())
        })();
        self.cursors.unregister(cursor_id);
        self.note(result)
    }

    /// Verify cache, freelist, and B-tree invariants (§4.3, §4.4, §4.6, §8
    /// universal invariant 5).
    pub fn check_integrity(&mut self) -> Result<()> {
        let result = (|| {
            self.pager.check_integrity()?;
            self.freelist.check_integrity()?;

            // §8 universal invariant 5: free extents plus all live page
            // allocations account for exactly the file length minus the
            // header page, with nothing left over or double-counted.
            let device_len = self.pager.device_len();
            let free_bytes = self.freelist.total_free_bytes();
            let accounted = self.page_size + free_bytes;
            if accounted > device_len || (device_len - accounted) % self.page_size != 0 {
                return Err(Error::IntegrityViolated(
                    "freelist extents and live allocations do not account for the file length",
                ));
            }

            let cmp = make_cmp(&self.compare, &self.prefix_compare);
            let cfg = BTreeConfig {
                page_size: self.page_size,
                key_size: self.key_size,
            };
            btree::check_integrity(&mut self.pager, &cfg, self.root, &cmp)
        })();
        self.note(result)
    }

    /// Write every dirty page and the header back to the device (§4.8
    /// `close` sequence, without actually releasing the handle).
    pub fn flush(&mut self) -> Result<()> {
        let result = (|| {
            if self.read_only {
                return Ok(());
            }
            if self.dirty {
                self.persist_header_and_freelist()?;
            }
            self.pager.flush_all()
        })();
        self.note(result)
    }

    /// Flush and release the handle (§4.8 `close` sequence). The device is
    /// actually closed when the returned value is dropped.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    /// Remove a database file. The handle must already be closed; this does
    /// not operate on a live `Database` (§6 `delete`).
    pub fn delete(path: impl AsRef<Path>) -> Result<()> {
        std::fs::remove_file(path).map_err(Error::Io)
    }

    /// Depth of the B-tree, in levels (a single-leaf tree has depth 1).
    pub fn depth(&mut self) -> Result<usize> {
        let result = btree::depth(&mut self.pager, self.root);
        self.note(result)
    }

    /// Number of free extents currently tracked (§8 invariant 6: tiny/small/
    /// empty records never allocate a blob page, observable via this count).
    pub fn freelist_extent_count(&self) -> usize {
        self.freelist.extent_count()
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn key_size(&self) -> u16 {
        self.key_size
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_in_memory(&self) -> bool {
        self.pager.is_in_memory()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Install a custom comparator (§4.6 "Comparator contract"). Changing
    /// the comparator on a database that already has data produces
    /// undefined ordering; callers are expected to set this once, right
    /// after `open`/`create`.
    pub fn set_compare_func(&mut self, compare: CompareFn) {
        self.compare = compare;
    }

    pub fn set_prefix_compare_func(&mut self, prefix_compare: Option<PrefixCompareFn>) {
        self.prefix_compare = prefix_compare;
    }

    /// The error code from the most recently completed operation (§6
    /// `get_error`, §7 "Propagation").
    pub fn get_error(&self) -> ErrorCode {
        self.last_error.unwrap_or(ErrorCode::Success)
    }

    pub fn strerror(&self, code: ErrorCode) -> &'static str {
        error::strerror(code)
    }

    /// Begin a transaction scope, taking ownership of the database's
    /// process-wide key/record arenas for the duration (§4.7). At most one
    /// scope may be open at a time.
    pub fn begin_scope(&mut self, scope_flags: u32) -> Result<()> {
        if self.scope.is_some() {
            return Err(Error::InternalError("a scope is already open"));
        }
        let key_arena = std::mem::take(&mut self.default_key_arena);
        let record_arena = std::mem::take(&mut self.default_record_arena);
        let temporary = scope_flags & flags::scope::TEMPORARY != 0;
        self.scope = Some(if temporary {
            Scope::temporary(key_arena, record_arena)
        } else {
            Scope::owned(key_arena, record_arena)
        });
        Ok(())
    }

    /// Commit the open scope, returning its arenas to the database (§4.7).
    pub fn commit_scope(&mut self) -> Result<()> {
        let scope = self
            .scope
            .take()
            .ok_or(Error::InternalError("no open scope to commit"))?;
        let (key_arena, record_arena) = scope.into_arenas();
        self.default_key_arena = key_arena;
        self.default_record_arena = record_arena;
        Ok(())
    }

    /// Abort the open scope. Never itself fails visibly to the caller (§7:
    /// "abort never itself returns an error visible to the caller").
    pub fn abort_scope(&mut self) {
        if let Some(scope) = self.scope.take() {
            let (key_arena, record_arena) = scope.into_arenas();
            self.default_key_arena = key_arena;
            self.default_record_arena = record_arena;
        }
    }

    /// Number of cursors currently registered as live against this handle
    /// (§9 design note "Linked list of cursors").
    pub fn live_cursor_count(&self) -> usize {
        self.cursors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_mem() -> Database {
        OpenOptions::new()
            .page_size(512)
            .cache_pages(32)
            .key_size(16)
            .create_in_memory()
            .unwrap()
    }

    #[test]
    fn s1_empty_find_is_not_found() {
        let mut db = open_mem();
        assert!(matches!(db.find(b"missing"), Err(Error::KeyNotFound)));
        assert_eq!(db.get_error(), ErrorCode::KeyNotFound);
    }

    #[test]
    fn s2_insert_then_find() {
        let mut db = open_mem();
        db.insert(b"alpha", b"one", 0).unwrap();
        assert_eq!(db.find(b"alpha").unwrap(), b"one");
        assert_eq!(db.get_error(), ErrorCode::Success);
    }

    #[test]
    fn s3_duplicate_key_then_overwrite() {
        let mut db = open_mem();
        db.insert(b"k", b"v1", 0).unwrap();
        assert!(matches!(db.insert(b"k", b"v2", 0), Err(Error::DuplicateKey)));
        db.insert(b"k", b"v2", flags::insert::OVERWRITE).unwrap();
        assert_eq!(db.find(b"k").unwrap(), b"v2");
    }

    #[test]
    fn s4_persistence_round_trip() {
        let path = std::env::temp_dir().join(format!("hamcrab-test-{}.db", std::process::id()));
        {
            let mut db = OpenOptions::new()
                .page_size(512)
                .key_size(16)
                .create(&path, 0o600)
                .unwrap();
            db.insert(b"k", b"v", 0).unwrap();
            db.close().unwrap();
        }
        {
            let mut db = OpenOptions::new().open(&path).unwrap();
            assert_eq!(db.find(b"k").unwrap(), b"v");
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn s5_many_inserts_cause_splits_and_check_integrity_passes() {
        let mut db = OpenOptions::new()
            .page_size(512)
            .key_size(16)
            .create_in_memory()
            .unwrap();
        let mut keys = Vec::new();
        for i in 0..2000u32 {
            let key = format!("{i:016x}").into_bytes();
            db.insert(&key, b"0123456789abcdef", 0).unwrap();
            keys.push(key);
        }
        for key in &keys {
            assert!(db.find(key).is_ok());
        }
        db.check_integrity().unwrap();
        assert!(db.depth().unwrap() >= 2);
    }

    #[test]
    fn s6_inline_encoding_allocates_no_blob_page() {
        let mut db = open_mem();
        let before = db.freelist_extent_count();
        db.insert(b"k", b"", 0).unwrap();
        assert_eq!(db.find(b"k").unwrap(), b"");
        db.insert(b"k2", b"1234567", 0).unwrap();
        assert_eq!(db.find(b"k2").unwrap(), b"1234567");
        assert_eq!(db.freelist_extent_count(), before);
    }

    #[test]
    fn erase_then_find_is_not_found() {
        let mut db = open_mem();
        db.insert(b"k", b"v", 0).unwrap();
        db.erase(b"k").unwrap();
        assert!(matches!(db.find(b"k"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn dump_visits_keys_in_comparator_order() {
        let mut db = open_mem();
        for (k, v) in [(b"b".to_vec(), b"2"), (b"a".to_vec(), b"1"), (b"c".to_vec(), b"3")] {
            db.insert(&k, v, 0).unwrap();
        }
        let mut seen = Vec::new();
        db.dump(|k, v| seen.push((k.to_vec(), v.to_vec()))).unwrap();
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn custom_comparator_reorders_dump() {
        let mut db = OpenOptions::new()
            .page_size(512)
            .key_size(16)
            .create_in_memory()
            .unwrap();
        db.set_compare_func(Box::new(|a: &[u8], b: &[u8]| b.cmp(a)));
        for k in [b"a".to_vec(), b"m".to_vec(), b"z".to_vec()] {
            db.insert(&k, b"v", 0).unwrap();
        }
        let mut seen = Vec::new();
        db.dump(|k, _| seen.push(k.to_vec())).unwrap();
        assert_eq!(seen, vec![b"z".to_vec(), b"m".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn read_only_open_rejects_writes() {
        let path = std::env::temp_dir().join(format!("hamcrab-ro-{}.db", std::process::id()));
        {
            let mut db = OpenOptions::new().page_size(512).create(&path, 0o600).unwrap();
            db.insert(b"k", b"v", 0).unwrap();
            db.close().unwrap();
        }
        {
            let mut db = OpenOptions::new()
                .flags(flags::open::READ_ONLY)
                .open(&path)
                .unwrap();
            assert_eq!(db.find(b"k").unwrap(), b"v");
            assert!(matches!(db.insert(b"k2", b"v2", 0), Err(Error::DbReadOnly)));
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn scope_begin_commit_round_trips_arenas() {
        let mut db = open_mem();
        db.begin_scope(0).unwrap();
        assert!(db.begin_scope(0).is_err());
        db.commit_scope().unwrap();
        db.begin_scope(flags::scope::TEMPORARY).unwrap();
        db.abort_scope();
    }

    #[test]
    fn find_under_scope_populates_key_and_record_arenas() {
        let mut db = open_mem();
        db.insert(b"k", b"v", 0).unwrap();
        db.begin_scope(0).unwrap();
        assert_eq!(db.find(b"k").unwrap(), b"v");
        let scope = db.scope.as_mut().unwrap();
        assert_eq!(scope.key_arena_mut().as_slice(), b"k");
        assert_eq!(scope.record_arena_mut().as_slice(), b"v");
        db.commit_scope().unwrap();
    }

    #[test]
    fn overwrite_frees_old_blob() {
        let mut db = open_mem();
        let big = vec![7u8; 500];
        db.insert(b"k", &big, 0).unwrap();
        let after_first = db.freelist_extent_count();
        let _ = after_first;
        db.insert(b"k", b"small", flags::insert::OVERWRITE).unwrap();
        assert_eq!(db.find(b"k").unwrap(), b"small");
        db.check_integrity().unwrap();
    }

    #[test]
    fn key_too_long_is_rejected() {
        let mut db = open_mem();
        let key = vec![b'x'; 64];
        assert!(matches!(db.insert(&key, b"v", 0), Err(Error::InvalidKeySize(_))));
    }

    #[test]
    fn is_read_only_reflects_open_flags() {
        let db = open_mem();
        assert!(!db.is_read_only());

        let path = std::env::temp_dir().join(format!("hamcrab-ro-accessor-{}.db", std::process::id()));
        OpenOptions::new().page_size(512).create(&path, 0o600).unwrap().close().unwrap();
        let ro = OpenOptions::new().flags(flags::open::READ_ONLY).open(&path).unwrap();
        assert!(ro.is_read_only());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn live_cursor_count_is_zero_before_and_after_a_dump() {
        let mut db = open_mem();
        db.insert(b"a", b"1", 0).unwrap();
        db.insert(b"b", b"2", 0).unwrap();
        assert_eq!(db.live_cursor_count(), 0);
        db.dump(|_, _| {}).unwrap();
        // `dump` registers and unregisters its cursor around the walk, so
        // none remain live once it returns.
        assert_eq!(db.live_cursor_count(), 0);
    }

    #[test]
    fn prefix_comparator_can_request_the_full_key() {
        let mut db = open_mem();
        // A prefix comparator that only ever defers to the full comparator;
        // exercises the `NeedFullKey` sentinel path (§4.6).
        db.set_prefix_compare_func(Some(Box::new(
            |_a: &[u8], _a_len: usize, _b: &[u8], _b_len: usize| PrefixOrdering::NeedFullKey,
        )));
        db.insert(b"alpha", b"one", 0).unwrap();
        db.insert(b"beta", b"two", 0).unwrap();
        assert_eq!(db.find(b"alpha").unwrap(), b"one");
        assert_eq!(db.find(b"beta").unwrap(), b"two");

        db.set_prefix_compare_func(None);
        assert_eq!(db.find(b"alpha").unwrap(), b"one");
    }
}
