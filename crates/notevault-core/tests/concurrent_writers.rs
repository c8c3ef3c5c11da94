use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use notevault_core::keystore::MemoryKeystore;
use notevault_core::notes::{NewNote, NoteFilter, NotePatch};
use notevault_core::{Vault, VaultOptions};
use tempfile::tempdir;

const WRITERS: usize = 8;

#[test]
fn test_concurrent_updates_are_serialized() {
    let dir = tempdir().unwrap();
    let keystore = Arc::new(MemoryKeystore::new().unwrap());
    let vault = Vault::open(&dir.path().join("notes.vault"), keystore, VaultOptions::default())
        .expect("open should succeed");
    let id = vault.notes().create(NewNote::new("shared", "initial")).unwrap();

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let notes = vault.notes().clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                notes
                    .update(id, NotePatch::new().title(format!("title {n}")).body(format!("body {n}")))
                    .expect("update should succeed");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Title and body always come from the same patch.
    let note = vault.notes().get(id).unwrap().unwrap();
    let winner = note.title.strip_prefix("title ").unwrap();
    assert_eq!(note.body, format!("body {winner}"));
}

#[test]
fn test_concurrent_creates_get_unique_ids() {
    let dir = tempdir().unwrap();
    let keystore = Arc::new(MemoryKeystore::new().unwrap());
    let vault = Vault::open(&dir.path().join("notes.vault"), keystore, VaultOptions::default())
        .expect("open should succeed");

    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let notes = vault.notes().clone();
            thread::spawn(move || {
                (0..5)
                    .map(|i| notes.create(NewNote::new(format!("{n}-{i}"), "")).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "id {id} handed out twice");
        }
    }
    assert_eq!(ids.len(), WRITERS * 5);
    assert_eq!(vault.notes().count(&NoteFilter::new()).unwrap(), WRITERS * 5);
}

#[test]
fn test_readers_keep_their_snapshot() {
    let dir = tempdir().unwrap();
    let keystore = Arc::new(MemoryKeystore::new().unwrap());
    let vault = Vault::open(&dir.path().join("notes.vault"), keystore, VaultOptions::default())
        .unwrap();
    let id = vault.notes().create(NewNote::new("before", "")).unwrap();

    let reader = vault.coordinator().begin_read().unwrap();
    vault
        .notes()
        .update(id, NotePatch::new().title("after"))
        .unwrap();

    let seen = vault.notes().get_in(&reader, id).unwrap().unwrap();
    assert_eq!(seen.title, "before");
    assert_eq!(vault.notes().get(id).unwrap().unwrap().title, "after");
}
