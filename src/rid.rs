//! The 8-byte record identifier and its inline-packing encoding (§4.5, §6).
//!
//! A `rid` either points at a blob's first page, or *is* the record itself
//! when the record is small enough to fit in 8 bytes. Four persisted flags
//! distinguish the cases; they live alongside the key inside an index
//! entry (§3, "Index entry").

/// Persisted per-entry flag bits. These are distinct from the public
/// `OpenFlags`/`InsertFlags` namespace (§6: "public flags start at 0x1000
/// so they do not collide with persisted key flags").
pub mod entry_flags {
    pub const EMPTY: u8 = 0x01;
    pub const TINY: u8 = 0x02;
    pub const SMALL: u8 = 0x04;
    pub const OVERFLOW: u8 = 0x08;
}

/// Where the record bytes actually live, decoded from an index entry's
/// persisted flags and its rid.
#[derive(Debug, Clone)]
pub enum RecordLocation {
    /// Zero-length record; no bytes stored anywhere.
    Empty,
    /// 1..=7 bytes, packed into the low 7 bytes of the rid.
    Tiny(Vec<u8>),
    /// Exactly 8 bytes; the rid *is* the record.
    Small([u8; 8]),
    /// Address of the blob's first page.
    Blob(u64),
}

/// Try to pack `data` inline. Returns `None` if `data` is too large (9+
/// bytes) and must go through the blob store instead.
pub fn try_pack_inline(data: &[u8]) -> Option<(u8, u64)> {
    match data.len() {
        0 => Some((entry_flags::EMPTY, 0)),
        1..=7 => {
            let mut rid_bytes = [0u8; 8];
            rid_bytes[..data.len()].copy_from_slice(data);
            // High byte holds the length, per §4.5.
            rid_bytes[7] = data.len() as u8;
            Some((entry_flags::TINY, u64::from_le_bytes(rid_bytes)))
        }
        8 => {
            let mut rid_bytes = [0u8; 8];
            rid_bytes.copy_from_slice(data);
            Some((entry_flags::SMALL, u64::from_le_bytes(rid_bytes)))
        }
        _ => None,
    }
}

/// Decode a persisted `(flags, rid)` pair into its record location. If none
/// of the inline flags are set, the rid is a blob page address.
pub fn decode(flags: u8, rid: u64) -> RecordLocation {
    if flags & entry_flags::EMPTY != 0 {
        RecordLocation::Empty
    } else if flags & entry_flags::TINY != 0 {
        let bytes = rid.to_le_bytes();
        let len = bytes[7] as usize;
        RecordLocation::Tiny(bytes[..len.min(7)].to_vec())
    } else if flags & entry_flags::SMALL != 0 {
        RecordLocation::Small(rid.to_le_bytes())
    } else {
        RecordLocation::Blob(rid)
    }
}
