//! Stores records too large to pack inline into an index entry (§4.5).
//!
//! A blob occupies a whole number of contiguous pages allocated through the
//! freelist. The first page begins with `{total_length: u64, next: u64}`;
//! every page (including the first) ends with the tail bytes needed to
//! chain to the next page, so a blob can in principle be read back even if
//! a future allocator stops guaranteeing contiguity.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::freelist::Freelist;
use crate::page::PageKind;
use crate::pager::Pager;

const FIRST_PAGE_HEADER: usize = 16; // total_length: u64, next: u64
const TAIL_LEN: usize = 8; // next: u64, at the end of every page

fn first_page_capacity(page_size: u64) -> u64 {
    page_size - FIRST_PAGE_HEADER as u64
}

fn cont_page_capacity(page_size: u64) -> u64 {
    page_size - TAIL_LEN as u64
}

fn pages_needed(total_len: u64, page_size: u64) -> u64 {
    if total_len <= first_page_capacity(page_size) {
        return 1;
    }
    let remaining = total_len - first_page_capacity(page_size);
    let cont_cap = cont_page_capacity(page_size);
    1 + remaining.div_ceil(cont_cap)
}

/// Write `data` out as a blob, returning the rid (address of the first
/// page).
pub(crate) fn write(pager: &mut Pager, freelist: &mut Freelist, data: &[u8]) -> Result<u64> {
    let page_size = pager.page_size();
    let n_pages = pages_needed(data.len() as u64, page_size);
    let first_addr = pager.alloc_pages(freelist, n_pages)?;

    let mut offset = 0usize;
    let first_cap = first_page_capacity(page_size) as usize;
    let take_first = data.len().min(first_cap);
    let next_addr = if n_pages > 1 {
        first_addr + page_size
    } else {
        0
    };

    {
        let page = pager.new_page(first_addr, PageKind::Blob)?;
        let buf = page.buf_mut();
        LittleEndian::write_u64(&mut buf[0..8], data.len() as u64);
        LittleEndian::write_u64(&mut buf[8..16], next_addr);
        buf[FIRST_PAGE_HEADER..FIRST_PAGE_HEADER + take_first]
            .copy_from_slice(&data[..take_first]);
    }
    offset += take_first;

    let mut addr = next_addr;
    let cont_cap = cont_page_capacity(page_size) as usize;
    while offset < data.len() {
        let take = (data.len() - offset).min(cont_cap);
        let this_addr = addr;
        let remaining_after = data.len() - offset - take;
        let next = if remaining_after > 0 {
            this_addr + page_size
        } else {
            0
        };
        let page = pager.new_page(this_addr, PageKind::Blob)?;
        let buf = page.buf_mut();
        buf[..take].copy_from_slice(&data[offset..offset + take]);
        LittleEndian::write_u64(&mut buf[cont_cap..cont_cap + TAIL_LEN], next);
        offset += take;
        addr = next;
    }

    Ok(first_addr)
}

/// Read a blob back into `out`, replacing its contents.
pub(crate) fn read(pager: &mut Pager, rid: u64, out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    let page_size = pager.page_size();
    let page = pager.fetch(rid, PageKind::Blob)?;
    let buf = page.buf();
    let total_len = LittleEndian::read_u64(&buf[0..8]) as usize;
    let mut next = LittleEndian::read_u64(&buf[8..16]);

    let first_cap = first_page_capacity(page_size) as usize;
    let take_first = total_len.min(first_cap);
    out.extend_from_slice(&buf[FIRST_PAGE_HEADER..FIRST_PAGE_HEADER + take_first]);

    let cont_cap = cont_page_capacity(page_size) as usize;
    while out.len() < total_len {
        if next == 0 {
            return Err(Error::BlobNotFound);
        }
        let page = pager.fetch(next, PageKind::Blob)?;
        let buf = page.buf();
        let take = (total_len - out.len()).min(cont_cap);
        out.extend_from_slice(&buf[..take]);
        next = LittleEndian::read_u64(&buf[cont_cap..cont_cap + TAIL_LEN]);
    }

    Ok(())
}

/// Free every page occupied by the blob at `rid`.
pub(crate) fn free(pager: &mut Pager, freelist: &mut Freelist, rid: u64) -> Result<()> {
    let page_size = pager.page_size();
    let page = pager.fetch(rid, PageKind::Blob)?;
    let total_len = LittleEndian::read_u64(&page.buf()[0..8]);
    let n_pages = pages_needed(total_len, page_size);
    // Contiguous by construction (see `write`), so the whole run frees as
    // one extent.
    for i in 0..n_pages {
        pager.evict(rid + i * page_size);
    }
    freelist.free(rid, n_pages);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;

    fn pager_with_space(page_size: u64, extra_pages: u64) -> (Pager, Freelist) {
        let device = Device::create_in_memory();
        let mut pager = Pager::new(device, 64, page_size);
        // Reserve page 0 as "header" so blob pages start at page 1.
        pager.alloc_ignoring_freelist(1).unwrap();
        let start = pager.alloc_ignoring_freelist(extra_pages).unwrap();
        let mut freelist = Freelist::new(page_size);
        freelist.free(start, extra_pages);
        (pager, freelist)
    }

    #[test]
    fn single_page_round_trip() {
        let (mut pager, mut fl) = pager_with_space(256, 4);
        let data = b"hello blob";
        let rid = write(&mut pager, &mut fl, data).unwrap();
        let mut out = Vec::new();
        read(&mut pager, rid, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn multi_page_round_trip() {
        let (mut pager, mut fl) = pager_with_space(256, 8);
        let data: Vec<u8> = (0..1000u32).map(|v| (v % 251) as u8).collect();
        let rid = write(&mut pager, &mut fl, &data).unwrap();
        let mut out = Vec::new();
        read(&mut pager, rid, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn free_returns_pages_to_freelist() {
        let (mut pager, mut fl) = pager_with_space(256, 8);
        let before = fl.total_free_bytes();
        let data: Vec<u8> = (0..1000u32).map(|v| (v % 251) as u8).collect();
        let rid = write(&mut pager, &mut fl, &data).unwrap();
        assert!(fl.total_free_bytes() < before);
        free(&mut pager, &mut fl, rid).unwrap();
        assert_eq!(fl.total_free_bytes(), before);
    }
}
