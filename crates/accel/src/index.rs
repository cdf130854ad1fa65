//! Embedding index with an optional GPU mirror
//!
//! The CPU map is the only source of truth. A synced index additionally
//! holds a device buffer with every vector laid out in insertion order; any
//! mutation drops that mirror under the same write lock, so no reader can
//! see a mirror that disagrees with the map.
//!
//! ```text
//!            add / add_batch / remove / clear (when they change something)
//!   Synced ─────────────────────────────────────────────────────────────▶ Unsynced
//!          ◀─────────────────────────────────────────────────────────────
//!            sync_to_gpu / resync_to_gpu (success)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use strata_core::{AccelError, AccelResult, IndexStats, SearchResult};
use strata_gpu::{select_top_k, ComputeDevice, DeviceBuffer};

use crate::accelerator::SearchCounters;
use crate::distance::{cosine_with_norm, dot_with_unit_row, l2_norm, normalize};

/// A stored vector and the id it was added under.
#[derive(Debug, Clone)]
struct StoredEmbedding {
    id: String,
    vector: Vec<f32>,
}

/// Device copy of the map as of the last successful sync.
struct GpuMirror {
    buffer: DeviceBuffer,
    /// Slot → id, in insertion order.
    ids: Vec<String>,
    /// Rows were L2-normalized on upload.
    normalized: bool,
}

/// Everything guarded by the index lock.
#[derive(Default)]
struct IndexState {
    /// id → insertion sequence
    slots: HashMap<String, u64>,
    /// insertion sequence → entry; iteration order is insertion order
    entries: BTreeMap<u64, StoredEmbedding>,
    next_seq: u64,
    /// `Some` exactly when the index is synced.
    mirror: Option<GpuMirror>,
}

impl IndexState {
    fn insert(&mut self, id: &str, vector: Vec<f32>) {
        match self.slots.get(id) {
            Some(seq) => {
                if let Some(entry) = self.entries.get_mut(seq) {
                    entry.vector = vector;
                }
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.slots.insert(id.to_string(), seq);
                self.entries.insert(
                    seq,
                    StoredEmbedding {
                        id: id.to_string(),
                        vector,
                    },
                );
            }
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.slots.remove(id) {
            Some(seq) => {
                self.entries.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn invalidate(&mut self) {
        self.mirror = None;
    }
}

/// Fixed-dimension store of named embeddings, searchable by cosine
/// similarity.
///
/// Created by [`Accelerator::new_embedding_index`](crate::Accelerator::new_embedding_index).
/// Safe to share across threads: searches run concurrently under a read
/// lock, while mutations and syncs take the write lock.
pub struct EmbeddingIndex {
    dimensions: usize,
    normalize_on_sync: bool,
    device: Arc<dyn ComputeDevice>,
    state: RwLock<IndexState>,
    searches_gpu: AtomicU64,
    searches_cpu: AtomicU64,
    shared: Arc<SearchCounters>,
}

impl EmbeddingIndex {
    pub(crate) fn new(
        dimensions: usize,
        normalize_on_sync: bool,
        device: Arc<dyn ComputeDevice>,
        shared: Arc<SearchCounters>,
    ) -> Self {
        EmbeddingIndex {
            dimensions,
            normalize_on_sync,
            device,
            state: RwLock::new(IndexState::default()),
            searches_gpu: AtomicU64::new(0),
            searches_cpu: AtomicU64::new(0),
            shared,
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> AccelResult<()> {
        if vector.len() != self.dimensions {
            return Err(AccelError::InvalidDimensions {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or replace the vector stored under `id`.
    ///
    /// A replaced entry keeps its original insertion position.
    ///
    /// # Errors
    ///
    /// `InvalidDimensions` if `vector.len() != dimensions`; the index is
    /// left untouched.
    pub fn add(&self, id: impl Into<String>, vector: &[f32]) -> AccelResult<()> {
        self.check_dimensions(vector)?;
        let id = id.into();
        let mut state = self.state.write();
        state.invalidate();
        state.insert(&id, vector.to_vec());
        Ok(())
    }

    /// Insert or replace many entries at once.
    ///
    /// All-or-nothing: every vector is validated before any is written.
    /// When an id repeats within the batch, its last vector wins.
    ///
    /// # Errors
    ///
    /// - `BatchLengthMismatch` if `ids` and `vectors` differ in length
    /// - `InvalidDimensions` for the first vector of the wrong length
    pub fn add_batch<S, V>(&self, ids: &[S], vectors: &[V]) -> AccelResult<()>
    where
        S: AsRef<str>,
        V: AsRef<[f32]>,
    {
        if ids.len() != vectors.len() {
            return Err(AccelError::BatchLengthMismatch {
                ids: ids.len(),
                vectors: vectors.len(),
            });
        }
        for vector in vectors {
            self.check_dimensions(vector.as_ref())?;
        }
        if ids.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        state.invalidate();
        for (id, vector) in ids.iter().zip(vectors) {
            state.insert(id.as_ref(), vector.as_ref().to_vec());
        }
        Ok(())
    }

    /// Delete the entry for `id`. Returns `false` (and changes nothing) if
    /// there was none.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write();
        if !state.slots.contains_key(id) {
            return false;
        }
        state.invalidate();
        state.remove(id)
    }

    /// Delete every entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        if state.entries.is_empty() {
            return;
        }
        state.invalidate();
        state.slots.clear();
        state.entries.clear();
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Number of stored embeddings.
    pub fn count(&self) -> usize {
        self.state.read().entries.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Fixed dimensionality of every stored vector.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// True if `id` is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().slots.contains_key(id)
    }

    /// Copy of the vector stored under `id`.
    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        let state = self.state.read();
        let seq = state.slots.get(id)?;
        state.entries.get(seq).map(|e| e.vector.clone())
    }

    /// Stored ids in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.state
            .read()
            .entries
            .values()
            .map(|e| e.id.clone())
            .collect()
    }

    /// True if the GPU mirror matches the map.
    pub fn is_gpu_synced(&self) -> bool {
        self.state.read().mirror.is_some()
    }

    // ========================================================================
    // GPU mirror
    // ========================================================================

    /// Upload the whole map to the device.
    ///
    /// Does nothing if the index is already synced.
    ///
    /// # Errors
    ///
    /// `BackendNotAvailable` without a device, or the device error from
    /// upload or normalization. The index is then unsynced.
    pub fn sync_to_gpu(&self) -> AccelResult<()> {
        let mut state = self.state.write();
        if state.mirror.is_some() {
            return Ok(());
        }
        self.upload(&mut state)
    }

    /// Upload the whole map even if the index is already synced.
    pub fn resync_to_gpu(&self) -> AccelResult<()> {
        let mut state = self.state.write();
        state.invalidate();
        self.upload(&mut state)
    }

    fn upload(&self, state: &mut IndexState) -> AccelResult<()> {
        if !self.device.kind().is_hardware() {
            return Err(AccelError::not_available(
                self.device.kind().as_str(),
                "no GPU backend is attached to this index",
            ));
        }

        let n = state.entries.len();
        let mut flat = Vec::with_capacity(n * self.dimensions);
        let mut ids = Vec::with_capacity(n);
        for entry in state.entries.values() {
            flat.extend_from_slice(&entry.vector);
            ids.push(entry.id.clone());
        }

        let mirror = self.build_mirror(&flat, ids).map_err(|e| {
            tracing::warn!(target: "strata::accel", error = %e, count = n, "GPU sync failed");
            e
        })?;
        tracing::debug!(
            target: "strata::accel",
            count = n,
            dimensions = self.dimensions,
            normalized = mirror.normalized,
            "Synced embeddings to GPU"
        );
        state.mirror = Some(mirror);
        Ok(())
    }

    fn build_mirror(&self, flat: &[f32], ids: Vec<String>) -> AccelResult<GpuMirror> {
        let mut buffer = self.device.new_buffer(flat)?;
        let normalized = self.normalize_on_sync && !ids.is_empty();
        if normalized {
            self.device
                .normalize_vectors(&mut buffer, ids.len(), self.dimensions)?;
        }
        Ok(GpuMirror {
            buffer,
            ids,
            normalized,
        })
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// The `k` stored vectors most similar to `query`, best first.
    ///
    /// Served by the device when the index is synced, otherwise by the CPU
    /// scorer. A device failure falls back to the CPU for this query, so the
    /// only error is a dimension mismatch. Equal scores rank by insertion
    /// order.
    pub fn search(&self, query: &[f32], k: usize) -> AccelResult<Vec<SearchResult>> {
        self.check_dimensions(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        if let Some(mirror) = &state.mirror {
            match self.search_gpu(mirror, query, k) {
                Ok(results) => {
                    self.searches_gpu.fetch_add(1, Ordering::Relaxed);
                    self.shared.gpu.fetch_add(1, Ordering::Relaxed);
                    return Ok(results);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "strata::accel",
                        error = %e,
                        "GPU search failed, answering on CPU"
                    );
                }
            }
        }

        let results = self.search_cpu(&state, query, k);
        self.searches_cpu.fetch_add(1, Ordering::Relaxed);
        self.shared.cpu.fetch_add(1, Ordering::Relaxed);
        Ok(results)
    }

    fn search_gpu(&self, mirror: &GpuMirror, query: &[f32], k: usize) -> AccelResult<Vec<SearchResult>> {
        let n = mirror.ids.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let hits = self.device.search(
            &mirror.buffer,
            query,
            n,
            self.dimensions,
            k,
            mirror.normalized,
        )?;
        hits.into_iter()
            .map(|hit| {
                mirror
                    .ids
                    .get(hit.index)
                    .map(|id| SearchResult::new(id.clone(), hit.score))
                    .ok_or_else(|| {
                        AccelError::KernelExecution(format!(
                            "device returned slot {} for a mirror of {} rows",
                            hit.index, n
                        ))
                    })
            })
            .collect()
    }

    /// Scores with the same arithmetic as the mirror this index would build,
    /// so a sync never reorders results.
    fn search_cpu(&self, state: &IndexState, query: &[f32], k: usize) -> Vec<SearchResult> {
        let rows: Vec<&StoredEmbedding> = state.entries.values().collect();
        let scores: Vec<f32> = if self.normalize_on_sync {
            let mut unit_query = query.to_vec();
            normalize(&mut unit_query);
            rows.iter()
                .map(|e| dot_with_unit_row(&unit_query, &e.vector))
                .collect()
        } else {
            let query_norm = l2_norm(query);
            rows.iter()
                .map(|e| cosine_with_norm(query, query_norm, &e.vector))
                .collect()
        };

        let (indices, values) = select_top_k(&scores, k);
        indices
            .into_iter()
            .zip(values)
            .map(|(i, score)| SearchResult::new(rows[i].id.clone(), score))
            .collect()
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Snapshot of size, sync state and search counts.
    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        let count = state.entries.len();
        IndexStats {
            count,
            dimensions: self.dimensions,
            memory_mb: IndexStats::estimate_memory_mb(count, self.dimensions),
            gpu_synced: state.mirror.is_some(),
            searches_gpu: self.searches_gpu.load(Ordering::Relaxed),
            searches_cpu: self.searches_cpu.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("EmbeddingIndex")
            .field("dimensions", &self.dimensions)
            .field("count", &state.entries.len())
            .field("gpu_synced", &state.mirror.is_some())
            .field("backend", &self.device.kind())
            .finish()
    }
}
