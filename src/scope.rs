//! Transaction scope bookkeeping (§4.7 "Scope").
//!
//! There is no undo log: a scope only tracks whether the caller's key and
//! record buffers are temporary (owned by the scope, handed back at
//! `commit`/`abort`) or the database's own process-wide scratch buffers
//! (taken out of `Database` for the duration of the scope and put back
//! afterward). Ownership transfer via [`std::mem::take`] at the call site
//! keeps this borrow-free: a `Scope` never borrows from `Database`, it just
//! temporarily owns what `Database` would otherwise own.

/// A single open scope. `Database` holds at most one of these at a time
/// (§4.7: "scopes do not nest").
pub(crate) struct Scope {
    temporary: bool,
    key_arena: Vec<u8>,
    record_arena: Vec<u8>,
}

impl Scope {
    /// A scope backed by the database's own default arenas.
    pub fn owned(key_arena: Vec<u8>, record_arena: Vec<u8>) -> Self {
        Self {
            temporary: false,
            key_arena,
            record_arena,
        }
    }

    /// A scope whose arenas should be discarded (cleared, not returned to
    /// the pool) at close, per flags::scope::TEMPORARY.
    pub fn temporary(key_arena: Vec<u8>, record_arena: Vec<u8>) -> Self {
        Self {
            temporary: true,
            key_arena,
            record_arena,
        }
    }

    pub fn key_arena_mut(&mut self) -> &mut Vec<u8> {
        &mut self.key_arena
    }

    pub fn record_arena_mut(&mut self) -> &mut Vec<u8> {
        &mut self.record_arena
    }

    /// Consume the scope, returning its arenas to the caller. A temporary
    /// scope's arenas come back cleared so they never leak scope-local data
    /// into the database's default arenas.
    pub fn into_arenas(mut self) -> (Vec<u8>, Vec<u8>) {
        if self.temporary {
            self.key_arena.clear();
            self.record_arena.clear();
        }
        (self.key_arena, self.record_arena)
    }
}
