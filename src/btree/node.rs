//! On-page layout and in-memory representation of a single B-tree node
//! (§3 "Index node", §4.6).
//!
//! A node is decoded in full from its page buffer into a `Node` the first
//! time it is touched, mutated with ordinary `Vec` operations, and
//! re-encoded when the page is written back. This trades a zero-copy
//! slotted-page layout (workable for fixed-size `u64` keys) for a simpler,
//! still layout-faithful encoding that works for the variable-length
//! byte-string keys this engine needs.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Fixed-size node header: level(2) + count(2) + rightmost_child(8).
const NODE_HEADER_SIZE: usize = 12;
/// Per-entry fixed overhead: key_len(2) + flags(1) + rid(8).
pub(crate) const ENTRY_FIXED_SIZE: usize = 11;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub key: Vec<u8>,
    pub flags: u8,
    /// Record id (leaf) or child page address (internal).
    pub rid: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// 0 = leaf.
    pub level: u16,
    /// Only meaningful when `level > 0`: the child holding every key
    /// greater than `entries.last().key`.
    pub rightmost_child: u64,
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn new_leaf() -> Self {
        Self {
            level: 0,
            rightmost_child: 0,
            entries: Vec::new(),
        }
    }

    pub fn new_internal() -> Self {
        Self {
            level: 1,
            rightmost_child: 0,
            entries: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Given the configured page and key size, the maximum number of
    /// entries a node may logically hold (invariant (b), §4.6). This is a
    /// fixed bound derived from the *configured* key size, not the actual
    /// (possibly shorter) keys stored, so capacity does not vary with data.
    pub fn max_entries(page_size: u64, key_size: u16) -> usize {
        let per_entry = ENTRY_FIXED_SIZE + key_size as usize;
        ((page_size as usize) - NODE_HEADER_SIZE) / per_entry
    }

    pub fn min_entries(page_size: u64, key_size: u16) -> usize {
        Self::max_entries(page_size, key_size).div_ceil(2)
    }

    pub fn encoded_size(&self) -> usize {
        NODE_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|e| ENTRY_FIXED_SIZE + e.key.len())
                .sum::<usize>()
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        let needed = self.encoded_size();
        if needed > buf.len() {
            return Err(Error::InternalError("node too large to fit in one page"));
        }
        for b in buf.iter_mut() {
            *b = 0;
        }
        LittleEndian::write_u16(&mut buf[0..2], self.level);
        LittleEndian::write_u16(&mut buf[2..4], self.entries.len() as u16);
        LittleEndian::write_u64(&mut buf[4..12], self.rightmost_child);

        let mut off = NODE_HEADER_SIZE;
        for e in &self.entries {
            LittleEndian::write_u16(&mut buf[off..off + 2], e.key.len() as u16);
            buf[off + 2] = e.flags;
            LittleEndian::write_u64(&mut buf[off + 3..off + 11], e.rid);
            buf[off + 11..off + 11 + e.key.len()].copy_from_slice(&e.key);
            off += ENTRY_FIXED_SIZE + e.key.len();
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < NODE_HEADER_SIZE {
            return Err(Error::IntegrityViolated("page too small for a node header"));
        }
        let level = LittleEndian::read_u16(&buf[0..2]);
        let count = LittleEndian::read_u16(&buf[2..4]) as usize;
        let rightmost_child = LittleEndian::read_u64(&buf[4..12]);

        let mut entries = Vec::with_capacity(count);
        let mut off = NODE_HEADER_SIZE;
        for _ in 0..count {
            if off + ENTRY_FIXED_SIZE > buf.len() {
                return Err(Error::IntegrityViolated("truncated index entry"));
            }
            let key_len = LittleEndian::read_u16(&buf[off..off + 2]) as usize;
            let flags = buf[off + 2];
            let rid = LittleEndian::read_u64(&buf[off + 3..off + 11]);
            let key_start = off + ENTRY_FIXED_SIZE;
            let key_end = key_start + key_len;
            if key_end > buf.len() {
                return Err(Error::IntegrityViolated("index entry key overruns page"));
            }
            entries.push(Entry {
                key: buf[key_start..key_end].to_vec(),
                flags,
                rid,
            });
            off = key_end;
        }

        Ok(Self {
            level,
            rightmost_child,
            entries,
        })
    }

    /// Binary search for `key` using the supplied comparator. `Ok(i)` means
    /// an exact match at slot `i`; `Err(i)` is the insertion point that
    /// keeps the directory sorted.
    pub fn search(
        &self,
        key: &[u8],
        cmp: &dyn Fn(&[u8], &[u8]) -> std::cmp::Ordering,
    ) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|e| cmp(&e.key, key))
    }

    /// Child page address to descend into for `key`, given the slot
    /// `search` would land on (`Err(i)` -- `key` is not present at this
    /// level, which is the common case for internal nodes).
    pub fn child_for_slot(&self, slot: usize) -> u64 {
        if slot >= self.entries.len() {
            self.rightmost_child
        } else {
            self.entries[slot].rid
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_leaf() {
        let mut node = Node::new_leaf();
        node.entries.push(Entry {
            key: b"alpha".to_vec(),
            flags: 0,
            rid: 42,
        });
        node.entries.push(Entry {
            key: b"beta".to_vec(),
            flags: 1,
            rid: 99,
        });
        let mut buf = vec![0u8; 256];
        node.encode(&mut buf).unwrap();
        let decoded = Node::decode(&buf).unwrap();
        assert_eq!(decoded.level, 0);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].key, b"alpha");
        assert_eq!(decoded.entries[1].rid, 99);
    }

    #[test]
    fn encode_decode_round_trip_internal() {
        let mut node = Node::new_internal();
        node.rightmost_child = 4096;
        node.entries.push(Entry {
            key: b"m".to_vec(),
            flags: 0,
            rid: 1024,
        });
        let mut buf = vec![0u8; 256];
        node.encode(&mut buf).unwrap();
        let decoded = Node::decode(&buf).unwrap();
        assert_eq!(decoded.level, 1);
        assert_eq!(decoded.rightmost_child, 4096);
        assert_eq!(decoded.entries[0].rid, 1024);
    }

    #[test]
    fn search_finds_exact_and_insertion_point() {
        let mut node = Node::new_leaf();
        for (k, r) in [(b"b".to_vec(), 1u64), (b"d".to_vec(), 2), (b"f".to_vec(), 3)] {
            node.entries.push(Entry { key: k, flags: 0, rid: r });
        }
        let cmp = |a: &[u8], b: &[u8]| a.cmp(b);
        assert_eq!(node.search(b"d", &cmp), Ok(1));
        assert_eq!(node.search(b"c", &cmp), Err(1));
        assert_eq!(node.search(b"a", &cmp), Err(0));
        assert_eq!(node.search(b"z", &cmp), Err(3));
    }
}
