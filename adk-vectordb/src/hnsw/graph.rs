//! HNSW graph over raw `f32` vectors.
//!
//! Nodes are addressed by dense `u32` ids assigned in insertion order.
//! Deleted nodes are tombstoned: they keep their links and still serve as
//! navigation points, but never appear in search results.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{IndexBuildParams, MetricType};

/// Upper bound on the number of graph layers.
pub const MAX_LAYERS: usize = 16;

thread_local! {
    /// Visited marks reused by every insert and search on this thread.
    static VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Tuning parameters of an [`HnswGraph`].
#[derive(Debug, Clone, PartialEq)]
pub struct HnswParams {
    /// Links per node on layers above 0.
    pub m: usize,
    /// Links per node on layer 0.
    pub m_max0: usize,
    /// Candidate list breadth during insertion.
    pub ef_construction: usize,
    /// Seed for level assignment; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl HnswParams {
    /// Derive graph parameters from the configured index parameters.
    pub fn from_index(params: &IndexBuildParams) -> Self {
        Self {
            m: params.m,
            m_max0: params.m * 2,
            ef_construction: params.ef_construction,
            seed: None,
        }
    }

    /// Fix the level-assignment seed for reproducible graphs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A search hit: internal node id and backend-native score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Internal node id.
    pub id: u32,
    /// Score under the graph's metric (see [`MetricType::higher_is_better`]).
    pub score: f32,
}

/// Internal ordering key: lower distance is closer for every metric.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    distance: f32,
    id: u32,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Generation-stamped visited set; `clear` is O(1) amortized.
#[derive(Debug)]
struct VisitedSet {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    fn new(capacity: usize) -> Self {
        Self { marks: vec![0; capacity], generation: 1 }
    }

    /// Grow to hold ids below `capacity`; new slots read as unvisited.
    fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.marks.len() {
            self.marks.resize(capacity, 0);
        }
    }

    fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Returns `true` if `id` was not visited yet.
    fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.marks[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

/// Hierarchical Navigable Small World index.
#[derive(Debug)]
pub struct HnswGraph {
    params: HnswParams,
    metric: MetricType,
    dimension: usize,
    vectors: Vec<f32>,
    neighbors: Vec<Vec<Vec<u32>>>,
    deleted: Vec<bool>,
    live: usize,
    entry_point: Option<u32>,
    max_layer: usize,
    rng: StdRng,
}

impl HnswGraph {
    /// Create an empty graph for vectors of `dimension` components.
    pub fn new(dimension: usize, metric: MetricType, params: HnswParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            params,
            metric,
            dimension,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            deleted: Vec::new(),
            live: 0,
            entry_point: None,
            max_layer: 0,
            rng,
        }
    }

    /// Number of non-deleted nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no live node remains.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of nodes ever inserted, tombstones included.
    pub fn node_count(&self) -> usize {
        self.deleted.len()
    }

    /// Number of tombstoned nodes.
    pub fn tombstones(&self) -> usize {
        self.node_count() - self.live
    }

    /// The parameters this graph was built with.
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// The metric scores are reported in.
    pub fn metric(&self) -> MetricType {
        self.metric
    }

    fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn links(&self, id: u32, layer: usize) -> &[u32] {
        self.neighbors[id as usize].get(layer).map_or(&[], Vec::as_slice)
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 { self.params.m_max0 } else { self.params.m }
    }

    fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.params.m.max(2) as f64).ln();
        let r: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        ((-r.ln() * ml).floor() as usize).min(MAX_LAYERS - 1)
    }

    /// Internal distance: lower is closer.
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            MetricType::Ip => -dot(a, b),
            MetricType::Cosine => 1.0 - cosine(a, b),
            MetricType::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        }
    }

    /// Convert an internal distance into the metric's native score.
    fn score(&self, distance: f32) -> f32 {
        match self.metric {
            MetricType::Ip => -distance,
            MetricType::Cosine => 1.0 - distance,
            MetricType::L2 => distance,
        }
    }

    /// Insert a vector and return its node id.
    ///
    /// The caller guarantees `vector.len()` equals the graph dimension.
    pub fn insert(&mut self, vector: &[f32]) -> u32 {
        debug_assert_eq!(vector.len(), self.dimension);
        let id = self.deleted.len() as u32;
        let level = self.random_level();

        self.vectors.extend_from_slice(vector);
        self.neighbors.push(vec![Vec::new(); level + 1]);
        self.deleted.push(false);
        self.live += 1;

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_layer = level;
            return id;
        };

        VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.ensure_capacity(self.node_count());
            let everything = |_: u32| true;

            let mut current = entry_point;
            for layer in (level + 1..=self.max_layer).rev() {
                let nearest =
                    self.search_layer(vector, &[current], 1, layer, &mut visited, &everything);
                if let Some(best) = nearest.first() {
                    current = best.id;
                }
            }

            let mut entry_points = vec![current];
            for layer in (0..=level.min(self.max_layer)).rev() {
                let not_self = |candidate: u32| candidate != id;
                let candidates = self.search_layer(
                    vector,
                    &entry_points,
                    self.params.ef_construction,
                    layer,
                    &mut visited,
                    &not_self,
                );

                let selected = self.select_neighbors(&candidates, self.max_links(layer));
                self.neighbors[id as usize][layer] = selected.iter().map(|s| s.id).collect();
                for neighbor in &selected {
                    self.link(neighbor.id, id, layer);
                }

                entry_points = candidates.iter().map(|s| s.id).collect();
                if entry_points.is_empty() {
                    entry_points.push(entry_point);
                }
            }
        });

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
        id
    }

    /// Add `to` to the links of `from`, pruning if over capacity.
    fn link(&mut self, from: u32, to: u32, layer: usize) {
        let max_links = self.max_links(layer);
        let Some(links) = self.neighbors[from as usize].get_mut(layer) else {
            return;
        };
        links.push(to);
        if links.len() <= max_links {
            return;
        }

        let base = self.vector(from);
        let candidates: Vec<Scored> = self
            .links(from, layer)
            .iter()
            .map(|&id| Scored { distance: self.distance(base, self.vector(id)), id })
            .collect();
        let pruned = self.select_neighbors(&candidates, max_links);
        self.neighbors[from as usize][layer] = pruned.iter().map(|s| s.id).collect();
    }

    /// Diversity heuristic: keep a candidate only if it is closer to the base
    /// than to every neighbor already kept, then top up with the closest rest.
    fn select_neighbors(&self, candidates: &[Scored], m: usize) -> Vec<Scored> {
        let mut sorted = candidates.to_vec();
        sorted.sort_unstable();

        let mut selected: Vec<Scored> = Vec::with_capacity(m);
        for candidate in &sorted {
            if selected.len() >= m {
                break;
            }
            let vector = self.vector(candidate.id);
            let diverse = selected
                .iter()
                .all(|kept| candidate.distance <= self.distance(vector, self.vector(kept.id)));
            if diverse {
                selected.push(*candidate);
            }
        }

        if selected.len() < m {
            let kept: HashSet<u32> = selected.iter().map(|s| s.id).collect();
            for candidate in &sorted {
                if selected.len() >= m {
                    break;
                }
                if !kept.contains(&candidate.id) {
                    selected.push(*candidate);
                }
            }
        }
        selected
    }

    /// Beam search on one layer. Returns up to `ef` accepted nodes, closest first.
    ///
    /// Rejected nodes are still expanded, so a selective `accept` does not
    /// disconnect the traversal.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
        visited: &mut VisitedSet,
        accept: &dyn Fn(u32) -> bool,
    ) -> Vec<Scored> {
        visited.clear();
        let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();
        let mut results: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef + 1);

        for &ep in entry_points {
            if visited.insert(ep) {
                let scored = Scored { distance: self.distance(query, self.vector(ep)), id: ep };
                candidates.push(Reverse(scored));
                if accept(ep) {
                    results.push(scored);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            let worst = results.peek().map_or(f32::MAX, |r| r.distance);
            if results.len() >= ef && current.distance > worst {
                break;
            }

            for &neighbor in self.links(current.id, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let distance = self.distance(query, self.vector(neighbor));
                let worst = results.peek().map_or(f32::MAX, |r| r.distance);
                if results.len() < ef || distance < worst {
                    let scored = Scored { distance, id: neighbor };
                    candidates.push(Reverse(scored));
                    if accept(neighbor) {
                        results.push(scored);
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Return up to `k` live nodes accepted by `filter`, most relevant first.
    ///
    /// Graphs no larger than the beam are scanned exactly. Otherwise the layer-0
    /// beam starts at `max(ef, k)` and doubles while fewer than `k` accepted
    /// nodes are found.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        filter: &dyn Fn(u32) -> bool,
    ) -> Vec<Neighbor> {
        let Some(entry_point) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }

        let accept = |id: u32| !self.deleted[id as usize] && filter(id);
        let total = self.node_count();
        let mut beam = ef.max(k);

        let mut hits = if total <= beam {
            self.exact_scan(query, &accept)
        } else {
            VISITED.with(|cell| {
                let mut visited = cell.borrow_mut();
                visited.ensure_capacity(total);
                let everything = |_: u32| true;
                let mut current = entry_point;
                for layer in (1..=self.max_layer).rev() {
                    let nearest =
                        self.search_layer(query, &[current], 1, layer, &mut visited, &everything);
                    if let Some(best) = nearest.first() {
                        current = best.id;
                    }
                }

                loop {
                    let found =
                        self.search_layer(query, &[current], beam, 0, &mut visited, &accept);
                    if found.len() >= k || beam >= total {
                        break found;
                    }
                    beam = (beam * 2).min(total);
                }
            })
        };

        hits.truncate(k);
        hits.into_iter().map(|s| Neighbor { id: s.id, score: self.score(s.distance) }).collect()
    }

    fn exact_scan(&self, query: &[f32], accept: &dyn Fn(u32) -> bool) -> Vec<Scored> {
        let mut hits: Vec<Scored> = (0..self.node_count() as u32)
            .filter(|&id| accept(id))
            .map(|id| Scored { distance: self.distance(query, self.vector(id)), id })
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Tombstone a node. Returns `false` if it was unknown or already deleted.
    pub fn mark_deleted(&mut self, id: u32) -> bool {
        match self.deleted.get_mut(id as usize) {
            Some(deleted) if !*deleted => {
                *deleted = true;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if `id` was tombstoned.
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted.get(id as usize).copied().unwrap_or(true)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity; 0.0 if either vector has zero magnitude.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HnswParams {
        HnswParams { m: 8, m_max0: 16, ef_construction: 64, seed: Some(7) }
    }

    /// Deterministic pseudo-random unit vectors.
    fn unit_vectors(count: usize, dim: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(42);
        (0..count)
            .map(|_| {
                let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
                let norm = dot(&v, &v).sqrt().max(f32::EPSILON);
                v.into_iter().map(|x| x / norm).collect()
            })
            .collect()
    }

    fn brute_force(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<u32> {
        let mut scored: Vec<(f32, u32)> =
            vectors.iter().enumerate().map(|(i, v)| (dot(query, v), i as u32)).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(k).map(|(_, id)| id).collect()
    }

    #[test]
    fn visited_set_generations() {
        let mut visited = VisitedSet::new(4);
        assert!(visited.insert(1));
        assert!(!visited.insert(1));
        visited.clear();
        assert!(visited.insert(1));

        visited.ensure_capacity(8);
        assert!(visited.insert(7));
        assert!(!visited.insert(1));
    }

    #[test]
    fn searches_across_graphs_share_visited_marks() {
        let small = unit_vectors(200, 8);
        let large = unit_vectors(900, 8);
        let mut first = HnswGraph::new(8, MetricType::Ip, params());
        let mut second = HnswGraph::new(8, MetricType::Ip, params());
        for v in &small {
            first.insert(v);
        }
        for v in &large {
            second.insert(v);
        }

        for _ in 0..3 {
            let hits = first.search(&small[10], 1, 64, &|_| true);
            assert_eq!(hits[0].id, 10);
            let hits = second.search(&large[500], 1, 64, &|_| true);
            assert_eq!(hits[0].id, 500);
        }
        assert_eq!(first.tombstones(), 0);
    }

    #[test]
    fn inner_product_scores_and_exact_match() {
        let mut graph = HnswGraph::new(2, MetricType::Ip, params());
        let a = graph.insert(&[1.0, 0.0]);
        graph.insert(&[0.0, 1.0]);

        let hits = graph.search(&[1.0, 0.0], 2, 16, &|_| true);
        assert_eq!(hits[0].id, a);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[1].score.abs() < 1e-6);
    }

    #[test]
    fn l2_scores_are_squared_distances() {
        let mut graph = HnswGraph::new(2, MetricType::L2, params());
        graph.insert(&[0.0, 0.0]);
        let far = graph.insert(&[3.0, 4.0]);
        let hits = graph.search(&[3.0, 4.0], 2, 16, &|_| true);
        assert_eq!(hits[0].id, far);
        assert_eq!(hits[0].score, 0.0);
        assert!((hits[1].score - 25.0).abs() < 1e-4);
    }

    #[test]
    fn graph_search_recalls_true_neighbors() {
        let vectors = unit_vectors(600, 16);
        let mut graph = HnswGraph::new(16, MetricType::Ip, params());
        for v in &vectors {
            graph.insert(v);
        }

        let queries = unit_vectors(20, 16);
        let mut found = 0;
        for query in &queries {
            let truth = brute_force(&vectors, query, 10);
            let hits: Vec<u32> =
                graph.search(query, 10, 64, &|_| true).iter().map(|h| h.id).collect();
            found += truth.iter().filter(|id| hits.contains(id)).count();
        }
        assert!(found >= 170, "recall too low: {found}/200");
    }

    #[test]
    fn every_stored_vector_finds_itself() {
        let vectors = unit_vectors(300, 8);
        let mut graph = HnswGraph::new(8, MetricType::Ip, params());
        for v in &vectors {
            graph.insert(v);
        }
        for (i, v) in vectors.iter().enumerate() {
            let hits = graph.search(v, 1, 100, &|_| true);
            assert_eq!(hits[0].id, i as u32);
        }
    }

    #[test]
    fn deleted_and_filtered_nodes_are_never_returned() {
        let vectors = unit_vectors(400, 8);
        let mut graph = HnswGraph::new(8, MetricType::Ip, params());
        for v in &vectors {
            graph.insert(v);
        }
        for id in (0..400).step_by(2) {
            assert!(graph.mark_deleted(id));
        }
        assert!(!graph.mark_deleted(0));
        assert_eq!(graph.len(), 200);

        let only_multiples_of_three = |id: u32| id % 3 == 0;
        let hits = graph.search(&vectors[3], 20, 32, &only_multiples_of_three);
        assert_eq!(hits.len(), 20);
        for hit in &hits {
            assert!(hit.id % 2 == 1 && hit.id % 3 == 0, "unexpected hit {}", hit.id);
        }
        assert_eq!(hits[0].id, 3);
    }

    #[test]
    fn empty_graph_and_zero_k() {
        let mut graph = HnswGraph::new(2, MetricType::Ip, params());
        assert!(graph.search(&[1.0, 0.0], 5, 16, &|_| true).is_empty());
        graph.insert(&[1.0, 0.0]);
        assert!(graph.search(&[1.0, 0.0], 0, 16, &|_| true).is_empty());
    }
}
