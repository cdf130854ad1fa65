//! Tier 2: Concurrency
//!
//! Searches share the index; mutations and syncs are exclusive. No reader
//! may observe a half-applied batch or a mirror that disagrees with the map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use crate::test_utils::*;

const THREADS: usize = 8;

#[test]
fn tier2_concurrent_searches_agree() {
    let (accel, _device) = emulated_accelerator();
    let index = shared_index(&accel, 16);
    for i in 0..300 {
        index.add(format!("v{}", i), &random_vector(16, i)).unwrap();
    }
    index.sync_to_gpu().unwrap();
    let query = random_vector(16, 1234);
    let expected = result_ids(&index.search(&query, 10).unwrap());

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            let query = query.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..50)
                    .map(|_| result_ids(&index.search(&query, 10).unwrap()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for ids in handle.join().unwrap() {
            assert_eq!(ids, expected);
        }
    }
    assert_eq!(index.stats().searches_gpu, 1 + (THREADS * 50) as u64);
}

#[test]
fn tier2_batches_are_atomic_to_readers() {
    let accel = cpu_accelerator();
    let index = shared_index(&accel, 4);
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let index = Arc::clone(&index);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for round in 0..200u64 {
                let ids: Vec<String> = (0..10).map(|i| format!("r{}-{}", round, i)).collect();
                let vectors: Vec<Vec<f32>> =
                    (0..10).map(|i| random_vector(4, round * 10 + i)).collect();
                index.add_batch(&ids, &vectors).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let count = index.count();
                    assert_eq!(count % 10, 0, "observed a partial batch: {}", count);
                    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
                    assert_ranked(&hits);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(index.count(), 2000);
}

#[test]
fn tier2_mutations_during_gpu_searches_stay_consistent() {
    let (accel, _device) = emulated_accelerator();
    let index = shared_index(&accel, 8);
    for i in 0..100 {
        index.add(format!("base{}", i), &random_vector(8, i)).unwrap();
    }
    index.sync_to_gpu().unwrap();

    let barrier = Arc::new(Barrier::new(3));
    let mutator = {
        let index = Arc::clone(&index);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..100u64 {
                index.add(format!("extra{}", i), &random_vector(8, 1000 + i)).unwrap();
                if i % 10 == 0 {
                    index.sync_to_gpu().unwrap();
                }
                if i % 7 == 0 {
                    index.remove(&format!("base{}", i));
                }
            }
        })
    };
    let searchers: Vec<_> = (0..2)
        .map(|t| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..200u64 {
                    let query = random_vector(8, t * 1000 + i);
                    let hits = index.search(&query, 3).unwrap();
                    assert_eq!(hits.len(), 3);
                    assert_ranked(&hits);
                    for hit in &hits {
                        assert!(hit.score <= 1.0 + 1e-4 && hit.score >= -1.0 - 1e-4);
                    }
                }
            })
        })
        .collect();

    mutator.join().unwrap();
    for s in searchers {
        s.join().unwrap();
    }

    // Final mirror reflects the final map.
    index.sync_to_gpu().unwrap();
    let gpu = index.search(&random_vector(8, 1099), 1).unwrap();
    assert_eq!(gpu[0].id, "extra99");
}

#[test]
fn tier2_index_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<strata_vector::EmbeddingIndex>();
    assert_send_sync::<strata_vector::Accelerator>();
}
