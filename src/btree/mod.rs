//! Ordered map from keys to record identifiers, with splits and
//! borrow/merge on erase (§4.6).
//!
//! Every fetched page is decoded in full into an owned [`Node`] rather than
//! read through a borrow of the cache, so this implementation does not need
//! to pin pages against concurrent eviction mid-descent the way a zero-copy
//! slotted-page index would; [`Pager::pin`]/`unpin` are still exercised in
//! [`find`] to keep the pinning discipline in §5 ("every page fetched for a
//! path descent is pinned") observable, and the heavier insert/erase paths
//! rely on the same decode-then-store discipline instead.

mod node;

pub(crate) use node::{Entry, Node, ENTRY_FIXED_SIZE};

use crate::error::{Error, Result};
use crate::freelist::Freelist;
use crate::page::PageKind;
use crate::pager::Pager;

/// Sizing parameters shared by every node in one database.
#[derive(Clone, Copy)]
pub(crate) struct BTreeConfig {
    pub page_size: u64,
    pub key_size: u16,
}

type CmpFn<'a> = dyn Fn(&[u8], &[u8]) -> std::cmp::Ordering + 'a;

fn load_node(pager: &mut Pager, addr: u64) -> Result<Node> {
    let page = pager.fetch(addr, PageKind::Index)?;
    Node::decode(page.buf())
}

fn store_node(pager: &mut Pager, addr: u64, node: &Node) -> Result<()> {
    let page = pager.fetch_mut(addr, PageKind::Index)?;
    node.encode(page.buf_mut())
}

fn alloc_node_page(pager: &mut Pager, freelist: &mut Freelist) -> Result<u64> {
    let addr = pager.alloc_pages(freelist, 1)?;
    pager.new_page(addr, PageKind::Index)?;
    Ok(addr)
}

/// Create a brand-new, empty root leaf and return its page address.
pub(crate) fn create_root(pager: &mut Pager, freelist: &mut Freelist) -> Result<u64> {
    let addr = alloc_node_page(pager, freelist)?;
    store_node(pager, addr, &Node::new_leaf())?;
    Ok(addr)
}

/// Look up `key`, returning its persisted flags and rid.
pub(crate) fn find(pager: &mut Pager, root: u64, key: &[u8], cmp: &CmpFn) -> Result<(u8, u64)> {
    let mut addr = root;
    loop {
        // Fetch first so the page is resident, then pin: pinning a page that
        // isn't in the cache yet is a no-op.
        let page = pager.fetch(addr, PageKind::Index)?;
        let node = Node::decode(page.buf())?;
        pager.pin(addr);
        pager.unpin(addr);
        if node.is_leaf() {
            return match node.search(key, cmp) {
                Ok(idx) => Ok((node.entries[idx].flags, node.entries[idx].rid)),
                Err(_) => Err(Error::KeyNotFound),
            };
        }
        // Separators are the minimum key of the right half of whatever split
        // produced them, so an exact match belongs to the right child.
        addr = match node.search(key, cmp) {
            Ok(i) => node.child_for_slot(i + 1),
            Err(i) => node.child_for_slot(i),
        };
    }
}

enum InsertOutcome {
    Done(Option<(u8, u64)>),
    Split {
        new_right_addr: u64,
        separator_key: Vec<u8>,
    },
}

#[allow(clippy::too_many_arguments)]
fn insert_recursive(
    pager: &mut Pager,
    freelist: &mut Freelist,
    cfg: &BTreeConfig,
    addr: u64,
    key: &[u8],
    flags: u8,
    rid: u64,
    overwrite: bool,
    cmp: &CmpFn,
) -> Result<InsertOutcome> {
    let mut node = load_node(pager, addr)?;

    if node.is_leaf() {
        match node.search(key, cmp) {
            Ok(idx) => {
                if !overwrite {
                    return Err(Error::DuplicateKey);
                }
                let old = std::mem::replace(
                    &mut node.entries[idx],
                    Entry {
                        key: key.to_vec(),
                        flags,
                        rid,
                    },
                );
                store_node(pager, addr, &node)?;
                return Ok(InsertOutcome::Done(Some((old.flags, old.rid))));
            }
            Err(idx) => {
                node.entries.insert(
                    idx,
                    Entry {
                        key: key.to_vec(),
                        flags,
                        rid,
                    },
                );
                if node.entries.len() <= Node::max_entries(cfg.page_size, cfg.key_size) {
                    store_node(pager, addr, &node)?;
                    return Ok(InsertOutcome::Done(None));
                }
                let mid = node.entries.len() / 2;
                let mut right = Node::new_leaf();
                right.entries = node.entries.split_off(mid);
                let separator_key = right.entries[0].key.clone();
                let new_right_addr = alloc_node_page(pager, freelist)?;
                store_node(pager, new_right_addr, &right)?;
                store_node(pager, addr, &node)?;
                return Ok(InsertOutcome::Split {
                    new_right_addr,
                    separator_key,
                });
            }
        }
    }

    // An exact match routes to the right child: the separator at that slot
    // is the minimum key of the right half of whatever split produced it.
    let (idx, child_addr) = match node.search(key, cmp) {
        Ok(i) => (i + 1, node.child_for_slot(i + 1)),
        Err(i) => (i, node.child_for_slot(i)),
    };
    match insert_recursive(pager, freelist, cfg, child_addr, key, flags, rid, overwrite, cmp)? {
        InsertOutcome::Done(old) => Ok(InsertOutcome::Done(old)),
        InsertOutcome::Split {
            new_right_addr,
            separator_key,
        } => {
            if idx >= node.entries.len() {
                node.entries.push(Entry {
                    key: separator_key,
                    flags: 0,
                    rid: child_addr,
                });
                node.rightmost_child = new_right_addr;
            } else {
                // `child_addr` (now the smaller half) keeps its slot but is
                // rebounded by the new separator; the old, larger key that
                // used to bound it moves right along with the new sibling.
                let old_key = std::mem::replace(&mut node.entries[idx].key, separator_key);
                node.entries.insert(
                    idx + 1,
                    Entry {
                        key: old_key,
                        flags: 0,
                        rid: new_right_addr,
                    },
                );
            }

            if node.entries.len() <= Node::max_entries(cfg.page_size, cfg.key_size) {
                store_node(pager, addr, &node)?;
                return Ok(InsertOutcome::Done(None));
            }

            let mid = node.entries.len() / 2;
            let mut right = Node::new_internal();
            right.rightmost_child = node.rightmost_child;
            right.entries = node.entries.split_off(mid + 1);
            let sep_entry = node.entries.pop().expect("mid entry present");
            node.rightmost_child = sep_entry.rid;
            let new_internal_addr = alloc_node_page(pager, freelist)?;
            store_node(pager, new_internal_addr, &right)?;
            store_node(pager, addr, &node)?;
            Ok(InsertOutcome::Split {
                new_right_addr: new_internal_addr,
                separator_key: sep_entry.key,
            })
        }
    }
}

/// Insert `key -> (flags, rid)`. Returns the previous `(flags, rid)` if
/// `overwrite` replaced an existing entry, `None` for a fresh insert.
/// Fails with `DuplicateKey` if the key exists and `overwrite` is false.
#[allow(clippy::too_many_arguments)]
pub(crate) fn insert(
    pager: &mut Pager,
    freelist: &mut Freelist,
    cfg: &BTreeConfig,
    root: &mut u64,
    key: &[u8],
    flags: u8,
    rid: u64,
    overwrite: bool,
    cmp: &CmpFn,
) -> Result<Option<(u8, u64)>> {
    let old_root = *root;
    match insert_recursive(pager, freelist, cfg, old_root, key, flags, rid, overwrite, cmp)? {
        InsertOutcome::Done(old) => Ok(old),
        InsertOutcome::Split {
            new_right_addr,
            separator_key,
        } => {
            let mut new_root = Node::new_internal();
            new_root.entries.push(Entry {
                key: separator_key,
                flags: 0,
                rid: old_root,
            });
            new_root.rightmost_child = new_right_addr;
            let new_root_addr = alloc_node_page(pager, freelist)?;
            store_node(pager, new_root_addr, &new_root)?;
            *root = new_root_addr;
            Ok(None)
        }
    }
}

struct EraseResult {
    removed: (u8, u64),
    underflow: bool,
}

fn rebalance_child(
    pager: &mut Pager,
    freelist: &mut Freelist,
    cfg: &BTreeConfig,
    parent: &mut Node,
    deficient_slot: usize,
) -> Result<()> {
    let n = parent.entries.len();
    let (left_slot, deficient_is_left) = if deficient_slot < n {
        (deficient_slot, true)
    } else {
        (deficient_slot - 1, false)
    };
    let right_slot = left_slot + 1;
    let left_addr = parent.child_for_slot(left_slot);
    let right_addr = parent.child_for_slot(right_slot);
    let mut left = load_node(pager, left_addr)?;
    let mut right = load_node(pager, right_addr)?;
    let min = Node::min_entries(cfg.page_size, cfg.key_size);
    let is_leaf = left.is_leaf();

    let can_borrow = if deficient_is_left {
        right.entries.len() > min
    } else {
        left.entries.len() > min
    };

    if can_borrow {
        if deficient_is_left {
            if is_leaf {
                let moved = right.entries.remove(0);
                left.entries.push(moved);
                parent.entries[left_slot].key = right.entries[0].key.clone();
            } else {
                let moved = right.entries.remove(0);
                let sep_key = std::mem::replace(&mut parent.entries[left_slot].key, moved.key);
                left.entries.push(Entry {
                    key: sep_key,
                    flags: 0,
                    rid: left.rightmost_child,
                });
                left.rightmost_child = moved.rid;
            }
        } else if is_leaf {
            let moved = left.entries.pop().expect("donor has spare entries");
            parent.entries[left_slot].key = moved.key.clone();
            right.entries.insert(0, moved);
        } else {
            let moved = left.entries.pop().expect("donor has spare entries");
            let sep_key = std::mem::replace(&mut parent.entries[left_slot].key, moved.key);
            right.entries.insert(
                0,
                Entry {
                    key: sep_key,
                    flags: 0,
                    rid: left.rightmost_child,
                },
            );
            left.rightmost_child = moved.rid;
        }
        store_node(pager, left_addr, &left)?;
        store_node(pager, right_addr, &right)?;
        return Ok(());
    }

    // Merge right into left.
    if is_leaf {
        left.entries.append(&mut right.entries);
    } else {
        let sep_key = parent.entries[left_slot].key.clone();
        left.entries.push(Entry {
            key: sep_key,
            flags: 0,
            rid: left.rightmost_child,
        });
        left.entries.append(&mut right.entries);
        left.rightmost_child = right.rightmost_child;
    }
    store_node(pager, left_addr, &left)?;

    if right_slot < parent.entries.len() {
        parent.entries[right_slot].rid = left_addr;
        parent.entries.remove(left_slot);
    } else {
        parent.entries.remove(left_slot);
        parent.rightmost_child = left_addr;
    }
    pager.free_page(freelist, right_addr, 1);
    Ok(())
}

fn erase_recursive(
    pager: &mut Pager,
    freelist: &mut Freelist,
    cfg: &BTreeConfig,
    addr: u64,
    is_root: bool,
    key: &[u8],
    cmp: &CmpFn,
) -> Result<EraseResult> {
    let mut node = load_node(pager, addr)?;
    let min = Node::min_entries(cfg.page_size, cfg.key_size);

    if node.is_leaf() {
        let idx = node.search(key, cmp).map_err(|_| Error::KeyNotFound)?;
        let removed = node.entries.remove(idx);
        let underflow = !is_root && node.entries.len() < min;
        store_node(pager, addr, &node)?;
        return Ok(EraseResult {
            removed: (removed.flags, removed.rid),
            underflow,
        });
    }

    // Same right-biased routing as insertion and lookup: an exact match
    // belongs to the child past this separator, not the one before it.
    let (idx, child_addr) = match node.search(key, cmp) {
        Ok(i) => (i + 1, node.child_for_slot(i + 1)),
        Err(i) => (i, node.child_for_slot(i)),
    };
    let child_result = erase_recursive(pager, freelist, cfg, child_addr, false, key, cmp)?;

    if !child_result.underflow {
        return Ok(EraseResult {
            removed: child_result.removed,
            underflow: false,
        });
    }

    rebalance_child(pager, freelist, cfg, &mut node, idx)?;
    let underflow = !is_root && node.entries.len() < min;
    store_node(pager, addr, &node)?;
    Ok(EraseResult {
        removed: child_result.removed,
        underflow,
    })
}

/// Erase `key`, returning its persisted flags and rid (the caller is
/// responsible for freeing any blob it points at, per §4.6).
pub(crate) fn erase(
    pager: &mut Pager,
    freelist: &mut Freelist,
    cfg: &BTreeConfig,
    root: &mut u64,
    key: &[u8],
    cmp: &CmpFn,
) -> Result<(u8, u64)> {
    let outcome = erase_recursive(pager, freelist, cfg, *root, true, key, cmp)?;

    let root_node = load_node(pager, *root)?;
    if !root_node.is_leaf() && root_node.entries.is_empty() {
        let old_root = *root;
        *root = root_node.rightmost_child;
        pager.free_page(freelist, old_root, 1);
    }

    Ok(outcome.removed)
}

/// Walk the tree in key order, invoking `visit(key, flags, rid)` for every
/// entry (§4.9).
pub(crate) fn dump(
    pager: &mut Pager,
    root: u64,
    visit: &mut dyn FnMut(&[u8], u8, u64),
) -> Result<()> {
    fn walk(pager: &mut Pager, addr: u64, visit: &mut dyn FnMut(&[u8], u8, u64)) -> Result<()> {
        let node = load_node(pager, addr)?;
        if node.is_leaf() {
            for e in &node.entries {
                visit(&e.key, e.flags, e.rid);
            }
            return Ok(());
        }
        for e in &node.entries {
            walk(pager, e.rid, visit)?;
        }
        walk(pager, node.rightmost_child, visit)
    }
    walk(pager, root, visit)
}

/// Depth of the tree, in levels (a single leaf root has depth 1).
pub(crate) fn depth(pager: &mut Pager, root: u64) -> Result<usize> {
    let mut addr = root;
    let mut d = 1;
    loop {
        let node = load_node(pager, addr)?;
        if node.is_leaf() {
            return Ok(d);
        }
        addr = node.rightmost_child;
        d += 1;
    }
}

/// Verify every node's directory is sorted by `cmp`, with no duplicate
/// keys in any single node, and that internal fan-out stays within
/// `[min_entries, max_entries]` (the root excepted).
pub(crate) fn check_integrity(
    pager: &mut Pager,
    cfg: &BTreeConfig,
    root: u64,
    cmp: &CmpFn,
) -> Result<()> {
    fn walk(
        pager: &mut Pager,
        cfg: &BTreeConfig,
        addr: u64,
        is_root: bool,
        cmp: &CmpFn,
    ) -> Result<()> {
        let node = load_node(pager, addr)?;
        let max = Node::max_entries(cfg.page_size, cfg.key_size);
        let min = Node::min_entries(cfg.page_size, cfg.key_size);
        if node.entries.len() > max {
            return Err(Error::IntegrityViolated("node exceeds maximum fan-out"));
        }
        if !is_root && node.entries.len() < min {
            return Err(Error::IntegrityViolated("node below minimum fan-out"));
        }
        for w in node.entries.windows(2) {
            if cmp(&w[0].key, &w[1].key) != std::cmp::Ordering::Less {
                return Err(Error::IntegrityViolated("node directory is not sorted"));
            }
        }
        if !node.is_leaf() {
            for e in &node.entries {
                walk(pager, cfg, e.rid, false, cmp)?;
            }
            walk(pager, cfg, node.rightmost_child, false, cmp)?;
        }
        Ok(())
    }
    walk(pager, cfg, root, true, cmp)
}
