//! Tier 3: Properties
//!
//! Random operation sequences checked against a plain model: an ordered
//! list of (id, vector) plus a synced flag.

use proptest::prelude::*;

use crate::test_utils::*;

const DIMS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Add(u8, Vec<f32>),
    Batch(Vec<(u8, Vec<f32>)>),
    Remove(u8),
    Clear,
    Sync,
    Resync,
    Search(Vec<f32>, usize),
}

fn vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, DIMS)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..12, vector()).prop_map(|(id, v)| Op::Add(id, v)),
        2 => prop::collection::vec((0u8..12, vector()), 0..5).prop_map(Op::Batch),
        2 => (0u8..12).prop_map(Op::Remove),
        1 => Just(Op::Clear),
        2 => Just(Op::Sync),
        1 => Just(Op::Resync),
        3 => (vector(), 0usize..8).prop_map(|(q, k)| Op::Search(q, k)),
    ]
}

/// Reference model: insertion-ordered entries.
#[derive(Default)]
struct Model {
    entries: Vec<(String, Vec<f32>)>,
    synced: bool,
}

impl Model {
    fn put(&mut self, id: String, v: Vec<f32>) {
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some(entry) => entry.1 = v,
            None => self.entries.push((id, v)),
        }
    }

    fn ranking(&self, query: &[f32], k: usize) -> Vec<String> {
        // Default config normalizes, so score as dot(q/|q|, r/|r|).
        let unit_query = unit(query);
        let cosine = |row: &[f32]| {
            let dot: f32 = unit(row).iter().zip(&unit_query).map(|(a, b)| a * b).sum();
            // +0.0 so signed zeros tie
            dot + 0.0
        };
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, (_, v))| (i, cosine(v.as_slice())))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(k)
            .map(|(i, _)| self.entries[i].0.clone())
            .collect()
    }
}

fn unit(v: &[f32]) -> Vec<f32> {
    let len = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if len > 0.0 {
        v.iter().map(|x| x / len).collect()
    } else {
        v.to_vec()
    }
}

fn key(id: u8) -> String {
    format!("id{}", id)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tier3_index_matches_model(ops in prop::collection::vec(op(), 1..40)) {
        let accel = cpu_accelerator();
        let index = accel.new_embedding_index(DIMS).unwrap();
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Add(id, v) => {
                    index.add(key(id), &v).unwrap();
                    model.put(key(id), v);
                    model.synced = false;
                }
                Op::Batch(items) => {
                    let ids: Vec<String> = items.iter().map(|(id, _)| key(*id)).collect();
                    let vectors: Vec<Vec<f32>> = items.iter().map(|(_, v)| v.clone()).collect();
                    index.add_batch(&ids, &vectors).unwrap();
                    if !items.is_empty() {
                        model.synced = false;
                    }
                    for (id, v) in items {
                        model.put(key(id), v);
                    }
                }
                Op::Remove(id) => {
                    let present = model.entries.iter().any(|(k, _)| *k == key(id));
                    prop_assert_eq!(index.remove(&key(id)), present);
                    if present {
                        model.entries.retain(|(k, _)| *k != key(id));
                        model.synced = false;
                    }
                }
                Op::Clear => {
                    index.clear();
                    if !model.entries.is_empty() {
                        model.synced = false;
                    }
                    model.entries.clear();
                }
                Op::Sync | Op::Resync => {
                    // No device: always an error, never synced.
                    let result = if matches!(op, Op::Sync) {
                        index.sync_to_gpu()
                    } else {
                        index.resync_to_gpu()
                    };
                    prop_assert!(result.is_err());
                }
                Op::Search(q, k) => {
                    let hits = index.search(&q, k).unwrap();
                    prop_assert_eq!(result_ids(&hits), model.ranking(&q, k));
                }
            }

            prop_assert_eq!(index.count(), model.entries.len());
            prop_assert_eq!(index.is_gpu_synced(), model.synced);
            let model_ids: Vec<String> = model.entries.iter().map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(index.ids(), model_ids);
        }
    }

    #[test]
    fn tier3_sync_state_machine_with_device(ops in prop::collection::vec(op(), 1..40)) {
        let (accel, _device) = emulated_accelerator();
        let index = accel.new_embedding_index(DIMS).unwrap();
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Add(id, v) => {
                    index.add(key(id), &v).unwrap();
                    model.put(key(id), v);
                    model.synced = false;
                }
                Op::Batch(items) => {
                    let ids: Vec<String> = items.iter().map(|(id, _)| key(*id)).collect();
                    let vectors: Vec<Vec<f32>> = items.iter().map(|(_, v)| v.clone()).collect();
                    index.add_batch(&ids, &vectors).unwrap();
                    if !items.is_empty() {
                        model.synced = false;
                    }
                    for (id, v) in items {
                        model.put(key(id), v);
                    }
                }
                Op::Remove(id) => {
                    if index.remove(&key(id)) {
                        model.entries.retain(|(k, _)| *k != key(id));
                        model.synced = false;
                    }
                }
                Op::Clear => {
                    index.clear();
                    if !model.entries.is_empty() {
                        model.synced = false;
                    }
                    model.entries.clear();
                }
                Op::Sync => {
                    index.sync_to_gpu().unwrap();
                    model.synced = true;
                }
                Op::Resync => {
                    index.resync_to_gpu().unwrap();
                    model.synced = true;
                }
                Op::Search(q, k) => {
                    let hits = index.search(&q, k).unwrap();
                    prop_assert_eq!(hits.len(), k.min(model.entries.len()));
                    assert_ranked(&hits);
                }
            }
            prop_assert_eq!(index.is_gpu_synced(), model.synced);
            prop_assert_eq!(index.stats().gpu_synced, model.synced);
        }
    }
}
