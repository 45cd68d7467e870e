//! Minimal live-cursor bookkeeping (§4.9 design note: "the database tracks
//! outstanding cursors so a `close` can detect they were not released").
//!
//! This crate does not expose a public cursor type (§6's caller-facing
//! operations have no cursor API), but internal consumers of a
//! `Database` — notably `dump`'s in-order walk — register themselves here
//! so `check_integrity`/`close` can assert that nothing is mid-iteration.

use std::collections::HashSet;

#[derive(Default)]
pub(crate) struct CursorList {
    next_id: u64,
    live: HashSet<u64>,
}

impl CursorList {
    pub fn register(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id);
        id
    }

    pub fn unregister(&mut self, id: u64) {
        self.live.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }
}
