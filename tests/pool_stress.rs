//! Buffer-pool capacity stress: a three-frame pool forces LRU
//! victimization on every structural path, so every survivor of this
//! suite proves the write-back/reload cycle preserves page contents.

use burrowdb::{Column, Datum, FieldSchema, FieldType, Index, Key, KeySchema, KeyType};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

fn row(v: i64) -> Column {
    Column::new(vec![Datum::Int(v)])
}

fn tiny_pool_index(dir: &tempfile::TempDir, name: &str) -> Index {
    Index::make_index_sized(
        1,
        dir.path().join(name),
        KeySchema::new("id", KeyType::Int),
        vec![FieldSchema::new("value", FieldType::Int)],
        3,
    )
    .unwrap()
}

#[test]
fn every_search_survives_constant_eviction() {
    let dir = tempdir().unwrap();
    let mut index = tiny_pool_index(&dir, "tiny.db");

    // Enough keys to build a three-level tree through many splits, all
    // with only three frames of residency.
    let mut keys: Vec<i64> = (0..600).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(0x0131));
    for &key in &keys {
        index.insert(Key::Int(key), row(key)).unwrap();
    }
    assert!(index.depth() >= 3);

    for &key in &keys {
        assert_eq!(index.search(&Key::Int(key)).unwrap(), row(key));
    }
    index.validate().unwrap();
}

#[test]
fn deletes_rebalance_under_a_tiny_pool() {
    let dir = tempdir().unwrap();
    let mut index = tiny_pool_index(&dir, "tiny_delete.db");

    for key in 0..300i64 {
        index.insert(Key::Int(key), row(key)).unwrap();
    }
    let mut deletion: Vec<i64> = (0..300).collect();
    deletion.shuffle(&mut StdRng::seed_from_u64(0x0132));
    for &key in &deletion {
        index.remove(&Key::Int(key)).unwrap();
    }

    assert_eq!(index.number_of_records(), 0);
    assert_eq!(index.depth(), 1);
    index.validate().unwrap();
}

#[test]
fn traversal_reloads_evicted_leaves() {
    let dir = tempdir().unwrap();
    let mut index = tiny_pool_index(&dir, "tiny_traverse.db");

    for key in 0..400i64 {
        index.insert(Key::Int(key), row(key)).unwrap();
    }
    let mut seen = Vec::new();
    index
        .traverse(|key, _| {
            if let Key::Int(k) = key {
                seen.push(*k);
            }
        })
        .unwrap();
    assert_eq!(seen, (0..400).collect::<Vec<_>>());
}
