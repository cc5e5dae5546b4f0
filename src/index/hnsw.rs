//! Hierarchical navigable small-world graph
//!
//! Approximate k-nearest-neighbor search over a dynamic set of
//! (id, vector) pairs. Structural mutations take the graph write lock;
//! searches run under the read lock against a consistent snapshot.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};
use crate::events::{EventBus, MemoryEvent};

use super::metric::Metric;
use super::quantizer::{Quantization, Quantizer, StoredVector};

/// Configuration for the vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswConfig {
    pub dimensions: usize,
    /// Max graph degree per layer
    #[serde(default = "default_m")]
    pub m: usize,
    /// Search breadth during insert
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Runtime search breadth
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub quantization: Quantization,
}

fn default_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    50
}

fn default_max_elements() -> usize {
    100_000
}

impl HnswConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            max_elements: default_max_elements(),
            metric: Metric::default(),
            quantization: Quantization::default(),
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub vector_count: usize,
    pub memory_usage: usize,
    /// Mean layer-0 search time in milliseconds
    pub avg_search_time: f64,
    pub compression_ratio: f32,
}

/// One search hit: (id, distance), ascending distance
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

struct GraphNode {
    id: String,
    vector: StoredVector,
    /// Adjacency per layer, index 0 = ground layer
    neighbors: Vec<Vec<u32>>,
    layer: usize,
    deleted: bool,
}

#[derive(Default)]
struct GraphState {
    nodes: Vec<GraphNode>,
    by_id: HashMap<String, u32>,
    entry_point: Option<u32>,
    top_layer: usize,
    live: usize,
}

/// Min-heap / max-heap element ordered by distance
#[derive(PartialEq)]
struct Candidate {
    distance: f32,
    idx: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory HNSW index keyed by entry id
pub struct HnswIndex {
    config: HnswConfig,
    quantizer: Quantizer,
    state: RwLock<GraphState>,
    bus: Option<EventBus>,
    search_count: AtomicU64,
    search_micros: AtomicU64,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        let quantizer = Quantizer::new(config.quantization, config.dimensions);
        Self {
            config,
            quantizer,
            state: RwLock::new(GraphState::default()),
            bus: None,
            search_count: AtomicU64::new(0),
            search_micros: AtomicU64::new(0),
        }
    }

    /// Attach an event bus; mutations publish `point_added` / `index_rebuilt`
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn len(&self) -> usize {
        self.state.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        let state = self.state.read();
        state
            .by_id
            .get(id)
            .map(|&idx| !state.nodes[idx as usize].deleted)
            .unwrap_or(false)
    }

    /// Insert a vector under `id`. An existing id is replaced.
    pub fn add_point(&self, id: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(MnemoError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: vector.len(),
            });
        }

        let mut state = self.state.write();
        if let Some(&existing) = state.by_id.get(id) {
            self.tombstone(&mut state, existing);
        }
        if state.live >= self.config.max_elements {
            return Err(MnemoError::IndexFull {
                capacity: self.config.max_elements,
            });
        }

        let layer = self.draw_layer();
        let idx = state.nodes.len() as u32;
        let stored = self.quantizer.encode(vector);
        state.nodes.push(GraphNode {
            id: id.to_string(),
            vector: stored,
            neighbors: vec![Vec::new(); layer + 1],
            layer,
            deleted: false,
        });
        state.by_id.insert(id.to_string(), idx);
        state.live += 1;

        match state.entry_point {
            None => {
                state.entry_point = Some(idx);
                state.top_layer = layer;
            }
            Some(entry) => {
                self.link_new_node(&mut state, idx, vector, entry, layer);
                if layer > state.top_layer {
                    state.top_layer = layer;
                    state.entry_point = Some(idx);
                }
            }
        }
        drop(state);

        if let Some(bus) = &self.bus {
            bus.publish(MemoryEvent::PointAdded { id: id.to_string() });
        }
        Ok(())
    }

    /// k-NN search; results ascend by distance, at most `min(k, size)` long
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<Neighbor>> {
        self.search_inner(query, k, ef, |_| true)
    }

    /// k-NN search with a post-filter over candidate ids.
    ///
    /// The predicate runs during result extraction, so fewer than `k`
    /// results may survive.
    pub fn search_with_filters<F>(&self, query: &[f32], k: usize, filter: F) -> Result<Vec<Neighbor>>
    where
        F: Fn(&str) -> bool,
    {
        self.search_inner(query, k, None, filter)
    }

    fn search_inner<F>(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        filter: F,
    ) -> Result<Vec<Neighbor>>
    where
        F: Fn(&str) -> bool,
    {
        if query.len() != self.config.dimensions {
            return Err(MnemoError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let state = self.state.read();
        let Some(entry) = state.entry_point else {
            return Ok(Vec::new());
        };

        // Greedy descent through the upper layers.
        let mut current = entry;
        let mut current_dist = self.node_distance(&state, query, current);
        for layer in (1..=state.top_layer).rev() {
            current = self.greedy_step(&state, query, current, &mut current_dist, layer);
        }

        let ef = ef.unwrap_or(self.config.ef_search).max(k);
        let found = self.search_layer(&state, query, &[current], ef, 0);

        let mut results: Vec<Neighbor> = found
            .into_iter()
            .filter(|c| {
                let node = &state.nodes[c.idx as usize];
                !node.deleted && filter(&node.id)
            })
            .map(|c| Neighbor {
                id: state.nodes[c.idx as usize].id.clone(),
                distance: c.distance,
            })
            .collect();
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        results.truncate(k);
        drop(state);

        self.search_count.fetch_add(1, Ordering::Relaxed);
        self.search_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        Ok(results)
    }

    /// Tombstone the node under `id`; returns whether a live node was removed
    pub fn remove_point(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let Some(&idx) = state.by_id.get(id) else {
            return false;
        };
        if state.nodes[idx as usize].deleted {
            return false;
        }
        self.tombstone(&mut state, idx);
        drop(state);

        if let Some(bus) = &self.bus {
            bus.publish(MemoryEvent::PointRemoved { id: id.to_string() });
        }
        true
    }

    /// Drop everything and re-insert the given pairs
    pub fn rebuild(&self, entries: &[(String, Vec<f32>)]) -> Result<usize> {
        let started = Instant::now();
        self.clear();
        let mut inserted = 0;
        for (id, vector) in entries {
            self.add_point(id, vector)?;
            inserted += 1;
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(bus) = &self.bus {
            bus.publish(MemoryEvent::IndexRebuilt {
                count: inserted,
                elapsed_ms,
            });
        }
        tracing::debug!(count = inserted, elapsed_ms, "index rebuilt");
        Ok(inserted)
    }

    /// Drop all state and reset statistics
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = GraphState::default();
        drop(state);
        self.quantizer.reset();
        self.search_count.store(0, Ordering::Relaxed);
        self.search_micros.store(0, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> IndexStats {
        let state = self.state.read();
        let mut memory = 0usize;
        for node in &state.nodes {
            memory += node.vector.stored_bytes();
            memory += node.id.len();
            memory += node.neighbors.iter().map(|n| n.len() * 4).sum::<usize>();
        }
        let searches = self.search_count.load(Ordering::Relaxed);
        let micros = self.search_micros.load(Ordering::Relaxed);
        IndexStats {
            vector_count: state.live,
            memory_usage: memory,
            avg_search_time: if searches == 0 {
                0.0
            } else {
                micros as f64 / searches as f64 / 1000.0
            },
            compression_ratio: self.quantizer.compression_ratio(),
        }
    }

    fn tombstone(&self, state: &mut GraphState, idx: u32) {
        let node = &mut state.nodes[idx as usize];
        if node.deleted {
            return;
        }
        node.deleted = true;
        state.live -= 1;

        if state.entry_point == Some(idx) {
            // Elect the highest-layer remaining live node.
            let mut best: Option<(u32, usize)> = None;
            for (i, node) in state.nodes.iter().enumerate() {
                if node.deleted {
                    continue;
                }
                if best.map(|(_, layer)| node.layer > layer).unwrap_or(true) {
                    best = Some((i as u32, node.layer));
                }
            }
            match best {
                Some((new_entry, layer)) => {
                    state.entry_point = Some(new_entry);
                    state.top_layer = layer;
                }
                None => {
                    state.entry_point = None;
                    state.top_layer = 0;
                }
            }
        }
    }

    /// Geometric layer draw with parameter 1/ln(M)
    fn draw_layer(&self) -> usize {
        let ml = 1.0 / (self.config.m.max(2) as f64).ln();
        let uniform: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
        ((-uniform.ln() * ml).floor() as usize).min(31)
    }

    fn node_distance(&self, state: &GraphState, query: &[f32], idx: u32) -> f32 {
        self.quantizer
            .distance(self.config.metric, query, &state.nodes[idx as usize].vector)
    }

    fn greedy_step(
        &self,
        state: &GraphState,
        query: &[f32],
        mut current: u32,
        current_dist: &mut f32,
        layer: usize,
    ) -> u32 {
        loop {
            let mut improved = false;
            let node = &state.nodes[current as usize];
            if let Some(neighbors) = node.neighbors.get(layer) {
                for &next in neighbors {
                    let d = self.node_distance(state, query, next);
                    if d < *current_dist {
                        *current_dist = d;
                        current = next;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// ef-bounded best-first search within one layer.
    ///
    /// Traverses through tombstoned nodes to preserve connectivity; the
    /// caller filters them from results.
    fn search_layer(
        &self,
        state: &GraphState,
        query: &[f32],
        entries: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entries {
            if visited.insert(entry) {
                let d = self.node_distance(state, query, entry);
                candidates.push(Reverse(Candidate {
                    distance: d,
                    idx: entry,
                }));
                results.push(Candidate {
                    distance: d,
                    idx: entry,
                });
            }
        }

        while let Some(Reverse(closest)) = candidates.pop() {
            let worst = results.peek().map(|c| c.distance).unwrap_or(f32::MAX);
            if closest.distance > worst && results.len() >= ef {
                break;
            }
            let node = &state.nodes[closest.idx as usize];
            if let Some(neighbors) = node.neighbors.get(layer) {
                for &next in neighbors {
                    if !visited.insert(next) {
                        continue;
                    }
                    let d = self.node_distance(state, query, next);
                    let worst = results.peek().map(|c| c.distance).unwrap_or(f32::MAX);
                    if results.len() < ef || d < worst {
                        candidates.push(Reverse(Candidate {
                            distance: d,
                            idx: next,
                        }));
                        results.push(Candidate {
                            distance: d,
                            idx: next,
                        });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    fn link_new_node(
        &self,
        state: &mut GraphState,
        idx: u32,
        vector: &[f32],
        entry: u32,
        layer: usize,
    ) {
        let mut current = entry;
        let mut current_dist = self.node_distance(state, vector, current);

        // Descend to just above the new node's top layer.
        for l in ((layer + 1)..=state.top_layer).rev() {
            current = self.greedy_step(state, vector, current, &mut current_dist, l);
        }

        let mut entry_points = vec![current];
        for l in (0..=layer.min(state.top_layer)).rev() {
            let found = self.search_layer(state, vector, &entry_points, self.config.ef_construction, l);
            let selected = self.select_neighbors(state, &found, self.config.m);

            entry_points = found.iter().map(|c| c.idx).collect();

            state.nodes[idx as usize].neighbors[l] = selected.clone();
            for &neighbor in &selected {
                let degree = {
                    let list = &mut state.nodes[neighbor as usize].neighbors[l];
                    list.push(idx);
                    list.len()
                };
                if degree > self.config.m {
                    self.prune_neighbors(state, neighbor, l);
                }
            }
        }
    }

    /// Diversity-aware neighbor selection: a candidate is kept only when
    /// it is closer to the query than to every already-selected neighbor.
    fn select_neighbors(&self, state: &GraphState, candidates: &[Candidate], m: usize) -> Vec<u32> {
        let mut selected: Vec<u32> = Vec::with_capacity(m);
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let candidate_vec = self
                .quantizer
                .decode(&state.nodes[candidate.idx as usize].vector);
            let diverse = selected.iter().all(|&s| {
                let d = self
                    .quantizer
                    .distance(self.config.metric, &candidate_vec, &state.nodes[s as usize].vector);
                candidate.distance < d
            });
            if diverse {
                selected.push(candidate.idx);
            }
        }
        // Pad with the nearest skipped candidates if diversity starved us.
        if selected.len() < m {
            for candidate in candidates {
                if selected.len() >= m {
                    break;
                }
                if !selected.contains(&candidate.idx) {
                    selected.push(candidate.idx);
                }
            }
        }
        selected
    }

    /// Re-run the selection heuristic over a node's own neighborhood when
    /// its degree budget is exceeded.
    fn prune_neighbors(&self, state: &mut GraphState, idx: u32, layer: usize) {
        let own_vec = self.quantizer.decode(&state.nodes[idx as usize].vector);
        let neighbor_ids = state.nodes[idx as usize].neighbors[layer].clone();
        let mut candidates: Vec<Candidate> = neighbor_ids
            .into_iter()
            .map(|n| Candidate {
                distance: self.node_distance(state, &own_vec, n),
                idx: n,
            })
            .collect();
        candidates.sort();
        let selected = self.select_neighbors(state, &candidates, self.config.m);
        state.nodes[idx as usize].neighbors[layer] = selected;
    }
}
