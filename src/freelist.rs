//! Map of free page-aligned extents available for reuse (§4.4).
//!
//! The freelist is stored inline in the header page, with overflow chained
//! as additional pages once the inline payload fills up. Allocation policy
//! is first-fit on ascending address; `free` coalesces with any immediately
//! adjacent extent.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;

/// Bit set on a freelist-overflow chain's tail entry to mark end-of-chain.
const OVERFLOW_TERMINATOR: u64 = u64::MAX;

pub(crate) struct Freelist {
    /// addr -> len, kept sorted by construction (`BTreeMap` iterates in key
    /// order), which gives first-fit-by-ascending-address for free.
    extents: BTreeMap<u64, u64>,
    page_size: u64,
}

impl Freelist {
    pub fn new(page_size: u64) -> Self {
        Self {
            extents: BTreeMap::new(),
            page_size,
        }
    }

    /// Reconstruct a freelist from its serialized inline + overflow bytes.
    pub fn decode(page_size: u64, bytes: &[u8]) -> Result<Self> {
        let mut extents = BTreeMap::new();
        let mut i = 0;
        while i + 16 <= bytes.len() {
            let addr = LittleEndian::read_u64(&bytes[i..i + 8]);
            let len = LittleEndian::read_u64(&bytes[i + 8..i + 16]);
            i += 16;
            if addr == OVERFLOW_TERMINATOR {
                break;
            }
            if len == 0 {
                continue;
            }
            extents.insert(addr, len);
        }
        Ok(Self { extents, page_size })
    }

    /// Serialize as a flat sequence of `(addr, len)` pairs terminated by a
    /// sentinel `(u64::MAX, 0)` pair. Callers slice this across the inline
    /// header payload and any number of overflow pages.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.extents.len() + 1) * 16);
        for (&addr, &len) in self.extents.iter() {
            let mut buf = [0u8; 16];
            LittleEndian::write_u64(&mut buf[0..8], addr);
            LittleEndian::write_u64(&mut buf[8..16], len);
            out.extend_from_slice(&buf);
        }
        let mut term = [0u8; 16];
        LittleEndian::write_u64(&mut term[0..8], OVERFLOW_TERMINATOR);
        out.extend_from_slice(&term);
        out
    }

    /// Number of live extents (used by `check_integrity` and tests that
    /// observe inline/tiny packing by extent count).
    pub fn extent_count(&self) -> usize {
        self.extents.len()
    }

    pub fn total_free_bytes(&self) -> u64 {
        self.extents.values().sum()
    }

    /// First-fit allocation of `n_pages` contiguous pages. Splits the
    /// selected extent if it is larger than requested; drops it entirely if
    /// the remainder is zero. Returns `None` if no extent is big enough,
    /// signalling the caller to extend the file.
    pub fn alloc(&mut self, n_pages: u64) -> Option<u64> {
        let need = n_pages * self.page_size;
        let hit = self
            .extents
            .iter()
            .find(|&(_, &len)| len >= need)
            .map(|(&addr, &len)| (addr, len));
        let (addr, len) = hit?;
        self.extents.remove(&addr);
        let remainder = len - need;
        if remainder > 0 {
            self.extents.insert(addr + need, remainder);
        }
        Some(addr)
    }

    /// Return `n_pages` starting at `addr` to the freelist, coalescing with
    /// any immediately-adjacent extent on either side.
    pub fn free(&mut self, addr: u64, n_pages: u64) {
        let mut start = addr;
        let mut len = n_pages * self.page_size;

        // Merge with a preceding extent that ends exactly at `start`.
        if let Some((&prev_addr, &prev_len)) = self.extents.range(..start).next_back() {
            if prev_addr + prev_len == start {
                start = prev_addr;
                len += prev_len;
                self.extents.remove(&prev_addr);
            }
        }

        // Merge with a following extent that starts exactly at `start + len`.
        let end = start + len;
        if let Some(&next_len) = self.extents.get(&end) {
            len += next_len;
            self.extents.remove(&end);
        }

        self.extents.insert(start, len);
    }

    /// Verify no extents overlap, none are adjacent (they should have been
    /// coalesced), and all are page-aligned multiples of the page size.
    pub fn check_integrity(&self) -> Result<()> {
        let mut prev_end: Option<u64> = None;
        for (&addr, &len) in self.extents.iter() {
            if len == 0 || len % self.page_size != 0 || addr % self.page_size != 0 {
                return Err(crate::error::Error::IntegrityViolated(
                    "freelist extent misaligned or zero-length",
                ));
            }
            if let Some(prev_end) = prev_end {
                if addr <= prev_end {
                    return Err(crate::error::Error::IntegrityViolated(
                        "freelist extents overlap or are unmerged adjacent",
                    ));
                }
            }
            prev_end = Some(addr + len);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_and_split() {
        let mut fl = Freelist::new(4096);
        fl.free(0, 4);
        fl.free(8 * 4096, 2);
        // First-fit picks the first (lowest-address) extent big enough.
        let addr = fl.alloc(2).unwrap();
        assert_eq!(addr, 0);
        // Remainder of the first extent stays.
        assert_eq!(fl.extent_count(), 2);
        assert_eq!(fl.total_free_bytes(), 2 * 4096 + 2 * 4096);
    }

    #[test]
    fn coalesces_adjacent_on_both_sides() {
        let mut fl = Freelist::new(4096);
        fl.free(0, 1);
        fl.free(2 * 4096, 1);
        fl.free(4096, 1);
        assert_eq!(fl.extent_count(), 1);
        assert_eq!(fl.total_free_bytes(), 3 * 4096);
    }

    #[test]
    fn alloc_returns_none_when_no_extent_fits() {
        let mut fl = Freelist::new(4096);
        fl.free(0, 1);
        assert_eq!(fl.alloc(2), None);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let mut fl = Freelist::new(4096);
        fl.free(0, 3);
        fl.free(5 * 4096, 1);
        let bytes = fl.encode();
        let decoded = Freelist::decode(4096, &bytes).unwrap();
        assert_eq!(decoded.extent_count(), fl.extent_count());
        assert_eq!(decoded.total_free_bytes(), fl.total_free_bytes());
    }
}
