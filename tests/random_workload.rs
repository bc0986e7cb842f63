//! Randomized bulk workloads: permuted inserts followed by permuted
//! deletes, with full structural validation at checkpoints.

use burrowdb::{Column, Datum, Error, FieldSchema, FieldType, Index, Key, KeySchema, KeyType};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

const N: i64 = 10_000;

fn row(v: i64) -> Column {
    Column::new(vec![Datum::Int(v)])
}

#[test]
fn random_insert_then_random_delete() {
    let dir = tempdir().unwrap();
    let mut index = Index::make_index(
        1,
        dir.path().join("random.db"),
        KeySchema::new("id", KeyType::Int),
        vec![FieldSchema::new("value", FieldType::Int)],
    )
    .unwrap();

    let mut keys: Vec<i64> = (0..N).collect();
    let mut rng = StdRng::seed_from_u64(0x5EED_0001);
    keys.shuffle(&mut rng);

    for (i, &key) in keys.iter().enumerate() {
        index.insert(Key::Int(key), row(key)).unwrap();
        if (i + 1) % 2500 == 0 {
            index.validate().unwrap();
        }
    }
    assert_eq!(index.number_of_records(), N as u64);
    index.validate().unwrap();

    // Every key is retrievable.
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert_eq!(index.search(&Key::Int(key)).unwrap(), row(key));
    }

    // Traversal yields the fully sorted sequence.
    let mut seen = Vec::with_capacity(N as usize);
    index
        .traverse(|key, value| {
            if let (Key::Int(k), Some(Datum::Int(v))) = (key, value.datums().first()) {
                assert_eq!(k, v);
                seen.push(*k);
            }
        })
        .unwrap();
    assert_eq!(seen, (0..N).collect::<Vec<_>>());

    // Delete everything in a different permutation.
    let mut deletion: Vec<i64> = (0..N).collect();
    let mut rng = StdRng::seed_from_u64(0x5EED_0002);
    deletion.shuffle(&mut rng);

    for (i, &key) in deletion.iter().enumerate() {
        index.remove(&Key::Int(key)).unwrap();
        assert!(matches!(
            index.search(&Key::Int(key)),
            Err(Error::KeyNotFound)
        ));
        if (i + 1) % 2500 == 0 {
            index.validate().unwrap();
        }
    }

    assert_eq!(index.number_of_records(), 0);
    assert_eq!(index.depth(), 1);
    let mut leftover = 0usize;
    index.traverse(|_, _| leftover += 1).unwrap();
    assert_eq!(leftover, 0);
    index.validate().unwrap();
}

#[test]
fn interleaved_insert_delete_churn() {
    let dir = tempdir().unwrap();
    let mut index = Index::make_index(
        1,
        dir.path().join("churn.db"),
        KeySchema::new("id", KeyType::Int),
        vec![FieldSchema::new("value", FieldType::Int)],
    )
    .unwrap();

    // Repeatedly fill a window and drain half of it, shifting upward.
    // This churns the same pages through insert, delete, split, borrow,
    // merge, and compaction.
    let mut live: Vec<i64> = Vec::new();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    for round in 0..40i64 {
        let base = round * 50;
        let mut fresh: Vec<i64> = (base..base + 100).collect();
        fresh.retain(|k| !live.contains(k));
        fresh.shuffle(&mut rng);
        for &key in &fresh {
            index.insert(Key::Int(key), row(key)).unwrap();
            live.push(key);
        }

        live.shuffle(&mut rng);
        for _ in 0..50 {
            if let Some(key) = live.pop() {
                index.remove(&Key::Int(key)).unwrap();
            }
        }
        index.validate().unwrap();
    }

    live.sort_unstable();
    let mut seen = Vec::new();
    index
        .traverse(|key, _| {
            if let Key::Int(k) = key {
                seen.push(*k);
            }
        })
        .unwrap();
    assert_eq!(seen, live);
    assert_eq!(index.number_of_records(), live.len() as u64);
}
