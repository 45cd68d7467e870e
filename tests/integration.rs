//! Black-box scenarios (§8: Testable Properties), run against the public
//! `Database`/`OpenOptions` surface only.

use hamcrab::{flags, Error, OpenOptions};
use rand::RngCore;

fn temp_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("hamcrab-it-{tag}-{}.db", std::process::id()))
}

#[test]
fn s1_empty_find() {
    let mut db = OpenOptions::new().create_in_memory().unwrap();
    assert!(matches!(db.find(b"missing"), Err(Error::KeyNotFound)));
}

#[test]
fn s2_insert_find() {
    let mut db = OpenOptions::new().create_in_memory().unwrap();
    db.insert(b"alpha", b"one", 0).unwrap();
    assert_eq!(db.find(b"alpha").unwrap(), b"one");
}

#[test]
fn s3_duplicate_then_overwrite() {
    let mut db = OpenOptions::new().create_in_memory().unwrap();
    db.insert(b"k", b"v1", 0).unwrap();
    assert!(matches!(db.insert(b"k", b"v2", 0), Err(Error::DuplicateKey)));
    db.insert(b"k", b"v2", flags::insert::OVERWRITE).unwrap();
    assert_eq!(db.find(b"k").unwrap(), b"v2");
}

#[test]
fn s4_persistence_across_reopen() {
    let path = temp_path("s4");
    let mut db = OpenOptions::new().create(&path, 0o600).unwrap();
    db.insert(b"k", b"v", 0).unwrap();
    db.close().unwrap();

    let mut reopened = OpenOptions::new().open(&path).unwrap();
    assert_eq!(reopened.find(b"k").unwrap(), b"v");
    reopened.close().unwrap();

    let _ = std::fs::remove_file(&path);
}

#[test]
fn s5_split_with_random_keys_stays_consistent() {
    let mut db = OpenOptions::new()
        .page_size(4096)
        .key_size(16)
        .cache_pages(64)
        .create_in_memory()
        .unwrap();

    let mut rng = rand::thread_rng();
    let mut keys: Vec<[u8; 16]> = Vec::with_capacity(2000);
    let mut seen = std::collections::HashSet::new();
    while keys.len() < 2000 {
        let mut key = [0u8; 16];
        rng.fill_bytes(&mut key);
        if seen.insert(key) {
            keys.push(key);
        }
    }

    for key in &keys {
        let mut record = [0u8; 16];
        rng.fill_bytes(&mut record);
        db.insert(key, &record, 0).unwrap();
    }

    for key in &keys {
        assert!(db.find(key).is_ok());
    }
    db.check_integrity().unwrap();
    assert!(db.depth().unwrap() >= 2);
}

#[test]
fn s6_inline_packing_allocates_no_blob_page() {
    let mut db = OpenOptions::new().create_in_memory().unwrap();
    let before = db.freelist_extent_count();

    db.insert(b"k", b"", 0).unwrap();
    assert_eq!(db.find(b"k").unwrap(), Vec::<u8>::new());

    db.insert(b"k2", b"1234567", 0).unwrap();
    assert_eq!(db.find(b"k2").unwrap(), b"1234567");

    assert_eq!(db.freelist_extent_count(), before);
}

#[test]
fn universal_invariant_erase_then_reinsert() {
    let mut db = OpenOptions::new().create_in_memory().unwrap();
    db.insert(b"k", b"v1", 0).unwrap();
    db.erase(b"k").unwrap();
    assert!(matches!(db.find(b"k"), Err(Error::KeyNotFound)));
    db.insert(b"k", b"v2", 0).unwrap();
    assert_eq!(db.find(b"k").unwrap(), b"v2");
}

#[test]
fn universal_invariant_comparator_determines_order() {
    let mut db = OpenOptions::new().create_in_memory().unwrap();
    db.set_compare_func(Box::new(|a: &[u8], b: &[u8]| b.cmp(a)));
    for k in [b"a".to_vec(), b"m".to_vec(), b"z".to_vec()] {
        db.insert(&k, b"v", 0).unwrap();
    }
    let mut order = Vec::new();
    db.dump(|k, _| order.push(k.to_vec())).unwrap();
    assert_eq!(order, vec![b"z".to_vec(), b"m".to_vec(), b"a".to_vec()]);
}

#[test]
fn read_only_reopen_rejects_mutation_but_allows_find() {
    let path = temp_path("ro");
    let mut db = OpenOptions::new().create(&path, 0o600).unwrap();
    db.insert(b"k", b"v", 0).unwrap();
    db.close().unwrap();

    let mut reopened = OpenOptions::new()
        .flags(flags::open::READ_ONLY)
        .open(&path)
        .unwrap();
    assert_eq!(reopened.find(b"k").unwrap(), b"v");
    assert!(matches!(reopened.insert(b"k2", b"v2", 0), Err(Error::DbReadOnly)));
    assert!(matches!(reopened.erase(b"k"), Err(Error::DbReadOnly)));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn key_longer_than_configured_size_is_rejected() {
    let mut db = OpenOptions::new().key_size(8).create_in_memory().unwrap();
    let long_key = vec![b'x'; 9];
    assert!(matches!(
        db.insert(&long_key, b"v", 0),
        Err(Error::InvalidKeySize(_))
    ));
}
