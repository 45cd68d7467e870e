//! On-disk header page layout (§3 "Header page", §4.2, §6 "File format").
//!
//! Bytes `0..12` are the preamble (`magic`, `version`, `serial`); bytes
//! `12..HEADER_SIZE` are the database header proper, extended in this
//! implementation with an `xxh3` checksum over the rest of the struct so
//! `open` can reject a header that parses but was never actually written by
//! this engine (§9 "supplemented features"), validated with `xxhash-rust`
//! the same way a root page checksum is. Everything from `HEADER_SIZE`
//! up to `page_size - 8` is the inline freelist payload; the last 8 bytes of
//! the page are the address of the first freelist-overflow page, or 0.

use bytemuck::{Pod, Zeroable};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

/// The header page's address is always 0 (§3 "a page's address is 0 iff it
/// is the header page").
pub(crate) const HEADER_ADDR: u64 = 0;

pub(crate) const MAGIC: [u8; 4] = *b"HAM\0";
pub(crate) const VERSION_MAJOR: u8 = 1;
pub(crate) const VERSION_MINOR: u8 = 0;

/// The minimum legal page size, and the size of the bootstrap read that
/// extracts the real page size before the full header page is read (§4.2).
pub(crate) const BOOTSTRAP_SIZE: usize = 512;

/// Page size upper bound (§9, open question (c): "cap at 64 KiB to keep the
/// in-node binary search on a small integer").
pub(crate) const MAX_PAGE_SIZE: u64 = 1 << 16;

/// Bytes reserved at the tail of the header page (and every freelist
/// overflow page) for the "next page" chain pointer (§4.4, §4.9).
pub(crate) const CHAIN_PTR_SIZE: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 4],
    version_major: u8,
    version_minor: u8,
    version_revision: u8,
    version_reserved: u8,
    serial: u32,
    flags: u32,
    page_size: u32,
    key_size: u16,
    _reserved: u16,
    root_page: u64,
    checksum: u64,
}

/// Size in bytes of the on-disk preamble + database header struct, i.e.
/// everything before the inline freelist payload begins.
pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

/// In-memory view of the decoded header page (§3 "Database header struct").
#[derive(Clone, Debug)]
pub(crate) struct Header {
    pub serial: u32,
    pub flags: u32,
    pub page_size: u32,
    pub key_size: u16,
    pub root_page: u64,
}

impl Header {
    pub fn new(serial: u32, flags: u32, page_size: u32, key_size: u16, root_page: u64) -> Self {
        Self {
            serial,
            flags,
            page_size,
            key_size,
            root_page,
        }
    }

    fn checksum_of(raw: &RawHeader) -> u64 {
        let mut copy = *raw;
        copy.checksum = 0;
        xxh3_64(bytemuck::bytes_of(&copy))
    }

    /// Encode into the first [`HEADER_SIZE`] bytes of `buf`, leaving the
    /// rest (the freelist payload) untouched.
    pub fn encode(&self, buf: &mut [u8]) {
        let mut raw = RawHeader {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            version_revision: 0,
            version_reserved: 0,
            serial: self.serial,
            flags: self.flags,
            page_size: self.page_size,
            key_size: self.key_size,
            _reserved: 0,
            root_page: self.root_page,
            checksum: 0,
        };
        raw.checksum = Self::checksum_of(&raw);
        buf[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&raw));
    }

    /// Decode a full header page, verifying magic, version, and checksum.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::InvalidFileHeader);
        }
        let raw: RawHeader = *bytemuck::from_bytes(&buf[..HEADER_SIZE]);
        if raw.magic != MAGIC {
            return Err(Error::InvalidFileHeader);
        }
        if raw.version_major != VERSION_MAJOR || raw.version_minor != VERSION_MINOR {
            return Err(Error::InvalidFileVersion);
        }
        if Self::checksum_of(&raw) != raw.checksum {
            return Err(Error::InvalidFileHeader);
        }
        Ok(Self {
            serial: raw.serial,
            flags: raw.flags,
            page_size: raw.page_size,
            key_size: raw.key_size,
            root_page: raw.root_page,
        })
    }

    /// Extract just the page size from a bootstrap (512-byte) read, without
    /// validating the checksum or version (§4.2: "the very first I/O reads
    /// exactly 512 bytes ... and extracts the real P from the header
    /// preamble before issuing a full page read").
    pub fn bootstrap_page_size(buf: &[u8]) -> Result<u32> {
        if buf.len() < HEADER_SIZE || buf[0..4] != MAGIC {
            return Err(Error::InvalidFileHeader);
        }
        let raw: RawHeader = *bytemuck::from_bytes(&buf[..HEADER_SIZE]);
        Ok(raw.page_size)
    }
}

/// Validate a candidate page size against §3 ("multiple of 512") and §9's
/// 64 KiB cap. Does not check the "at least four index entries" clause;
/// that depends on the key size too and is checked separately.
pub(crate) fn validate_page_size(page_size: u64) -> Result<()> {
    if page_size < BOOTSTRAP_SIZE as u64
        || page_size % BOOTSTRAP_SIZE as u64 != 0
        || page_size > MAX_PAGE_SIZE
    {
        return Err(Error::InvalidPageSize(page_size as usize));
    }
    Ok(())
}

/// Sanity-check the configured page size against the host's native page
/// granularity (§4.1 implementation note). Neither size has to equal the
/// other for `memmap2` to work correctly, but a configured size that is not
/// an even multiple (in either direction) of the host granularity is almost
/// certainly a misconfiguration rather than an intentional choice.
pub(crate) fn check_host_page_alignment(page_size: u64) -> Result<()> {
    let host = page_size::get() as u64;
    if host != 0 && page_size % host != 0 && host % page_size != 0 {
        return Err(Error::InvalidPageSize(page_size as usize));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let hdr = Header::new(7, 0x2000, 4096, 32, 4096);
        let mut buf = vec![0u8; 4096];
        hdr.encode(&mut buf);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded.serial, 7);
        assert_eq!(decoded.flags, 0x2000);
        assert_eq!(decoded.page_size, 4096);
        assert_eq!(decoded.key_size, 32);
        assert_eq!(decoded.root_page, 4096);
    }

    #[test]
    fn bootstrap_extracts_page_size_without_full_validation() {
        let hdr = Header::new(1, 0, 8192, 16, 8192);
        let mut buf = vec![0u8; BOOTSTRAP_SIZE];
        hdr.encode(&mut buf);
        assert_eq!(Header::bootstrap_page_size(&buf).unwrap(), 8192);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; 4096];
        assert!(matches!(Header::decode(&buf), Err(Error::InvalidFileHeader)));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let hdr = Header::new(1, 0, 4096, 32, 4096);
        let mut buf = vec![0u8; 4096];
        hdr.encode(&mut buf);
        buf[HEADER_SIZE - 1] ^= 0xFF; // flip a byte inside the checksummed region
        assert!(matches!(Header::decode(&buf), Err(Error::InvalidFileHeader)));
    }

    #[test]
    fn page_size_bounds() {
        assert!(validate_page_size(511).is_err());
        assert!(validate_page_size(513).is_err());
        assert!(validate_page_size(512).is_ok());
        assert!(validate_page_size(1 << 17).is_err());
        assert!(validate_page_size(1 << 16).is_ok());
    }
}
