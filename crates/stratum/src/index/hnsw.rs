//! Hierarchical Navigable Small World graph
//!
//! Nodes live in an arena (`Vec<Node>`) and refer to each other by slot
//! index, one adjacency list per level. Deletion is a tombstone flag:
//! tombstoned nodes still route searches but never occupy result slots, and
//! [`HnswIndex::compact`] later drops them and relinks their neighbors.
//!
//! Every live node stays reachable from the entry point. Pruning an edge
//! prefers targets that keep another inbound edge, and compaction reconnects
//! any node it strands.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Result, StratumError};
use crate::index::distance::DistanceMetric;

/// Hard ceiling on assigned levels, far above what any realistic corpus reaches
const MAX_LEVEL: usize = 16;

/// HNSW construction and search parameters
#[derive(Debug, Clone, Deserialize)]
pub struct HnswConfig {
    /// Neighbors kept per node on upper levels; level 0 keeps twice this
    #[serde(default = "default_m")]
    pub m: usize,
    /// Candidate list size while inserting
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Default candidate list size while searching
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    /// Fixed dimensionality; inferred from the first insert when unset
    #[serde(default)]
    pub dimension: Option<usize>,
    /// Seed for level assignment; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
    /// Tombstone share above which the engine compacts after a sweep
    #[serde(default = "default_compaction_ratio")]
    pub compaction_ratio: f32,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            metric: DistanceMetric::default(),
            dimension: None,
            seed: None,
            compaction_ratio: default_compaction_ratio(),
        }
    }
}

fn default_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    64
}

fn default_compaction_ratio() -> f32 {
    0.2
}

/// One nearest-neighbor result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub id: Uuid,
    pub distance: f32,
}

#[derive(Debug, Clone)]
struct Node {
    id: Uuid,
    vector: Vec<f32>,
    level: usize,
    /// `neighbors[l]` holds slot indices for level `l`, for every `l <= level`
    neighbors: Vec<Vec<usize>>,
    /// Edges pointing at this node, per level
    inbound: Vec<usize>,
    deleted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    slot: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Approximate nearest-neighbor index over fixed-length embeddings.
///
/// Not internally synchronized: callers serialize mutation, typically by
/// holding the index behind an `RwLock`.
#[derive(Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    dimension: Option<usize>,
    nodes: Vec<Node>,
    /// Live id -> slot. Tombstoned nodes are absent.
    slots: HashMap<Uuid, usize>,
    entry_point: Option<usize>,
    max_level: usize,
    level_mult: f64,
    tombstones: usize,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let level_mult = 1.0 / (config.m.max(2) as f64).ln();
        Self {
            dimension: config.dimension,
            config,
            nodes: Vec::new(),
            slots: HashMap::new(),
            entry_point: None,
            max_level: 0,
            level_mult,
            tombstones: 0,
            rng,
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Dimensionality of indexed vectors, once known
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of live (non-tombstoned) entries
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.slots.contains_key(id)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    /// Share of arena slots occupied by tombstones
    pub fn tombstone_ratio(&self) -> f32 {
        if self.nodes.is_empty() {
            0.0
        } else {
            self.tombstones as f32 / self.nodes.len() as f32
        }
    }

    /// Ids of every live entry, in insertion order
    pub fn live_ids(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| n.id)
            .collect()
    }

    /// Verify a vector can be inserted or queried without mutating anything
    pub fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(StratumError::IndexCorruption(
                "empty vectors cannot be indexed".to_string(),
            ));
        }
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(StratumError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(StratumError::IndexCorruption(
                "vector contains non-finite components".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert a vector. Re-inserting a live id tombstones the previous node.
    pub fn insert(&mut self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.check_vector(&vector)?;
        if self.dimension.is_none() {
            self.dimension = Some(vector.len());
        }
        if let Some(previous) = self.slots.remove(&id) {
            self.mark_deleted(previous);
        }

        let level = self.random_level();
        let slot = self.nodes.len();
        self.nodes.push(Node {
            id,
            vector,
            level,
            neighbors: vec![Vec::new(); level + 1],
            inbound: vec![0; level + 1],
            deleted: false,
        });
        self.slots.insert(id, slot);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(slot);
            self.max_level = level;
            return Ok(());
        };

        let query = self.nodes[slot].vector.clone();
        let top = self.max_level;
        let mut entry_points = vec![entry];

        for lc in (level + 1..=top).rev() {
            let closest = self.greedy_closest(&query, entry_points[0], lc);
            entry_points = vec![closest];
        }

        for lc in (0..=level.min(top)).rev() {
            let candidates =
                self.search_layer(&query, &entry_points, self.config.ef_construction, lc, false);
            let selected = self.select_neighbors(slot, &candidates);

            for &neighbor in &selected {
                self.link(neighbor, slot, lc, false)?;
                self.nodes[neighbor].inbound[lc] += 1;
            }
            self.nodes[slot].neighbors[lc] = selected;

            if !candidates.is_empty() {
                entry_points = candidates.iter().map(|c| c.slot).collect();
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(slot);
        }

        self.check_bounds(slot)
    }

    /// Return up to `k` live entries closest to `query`, nearest first.
    ///
    /// `ef` is raised to `k` when smaller. Equal distances are ordered by id.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<VectorHit>> {
        self.check_vector(query)?;
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut current = entry;
        for lc in (1..=self.max_level).rev() {
            current = self.greedy_closest(query, current, lc);
        }

        let found = self.search_layer(query, &[current], ef.max(k), 0, true);
        let mut hits: Vec<VectorHit> = found
            .into_iter()
            .map(|c| VectorHit {
                id: self.nodes[c.slot].id,
                distance: c.distance,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Tombstone an entry. Returns `false` if the id was not live.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        let Some(slot) = self.slots.remove(id) else {
            return false;
        };
        self.mark_deleted(slot);

        if self.slots.is_empty() {
            self.nodes.clear();
            self.entry_point = None;
            self.max_level = 0;
            self.tombstones = 0;
        }
        true
    }

    /// Physically drop tombstoned nodes, relinking live nodes that pointed at them.
    ///
    /// A live node that loses a neighbor picks replacements from its remaining
    /// neighbors plus the removed neighbor's live neighbors, keeping the closest
    /// up to the level bound. Returns how many nodes were dropped.
    pub fn compact(&mut self) -> usize {
        if self.tombstones == 0 {
            return 0;
        }

        let mut relinked: Vec<(usize, usize, Vec<usize>)> = Vec::new();
        for slot in 0..self.nodes.len() {
            let node = &self.nodes[slot];
            if node.deleted {
                continue;
            }
            for level in 0..=node.level {
                let list = &node.neighbors[level];
                if !list.iter().any(|&n| self.nodes[n].deleted) {
                    continue;
                }

                let mut seen: HashSet<usize> = HashSet::from([slot]);
                let mut pool: Vec<usize> = Vec::new();
                for &n in list {
                    if !self.nodes[n].deleted {
                        if seen.insert(n) {
                            pool.push(n);
                        }
                        continue;
                    }
                    let second_hop = self.nodes[n].neighbors.get(level).into_iter().flatten();
                    for &m in second_hop {
                        if !self.nodes[m].deleted && seen.insert(m) {
                            pool.push(m);
                        }
                    }
                }

                let base = &node.vector;
                let mut scored: Vec<Candidate> = pool
                    .into_iter()
                    .map(|n| Candidate {
                        distance: self.distance(base, &self.nodes[n].vector),
                        slot: n,
                    })
                    .collect();
                scored.sort();
                scored.truncate(self.bound(level));
                relinked.push((slot, level, scored.into_iter().map(|c| c.slot).collect()));
            }
        }

        for (slot, level, list) in relinked {
            self.nodes[slot].neighbors[level] = list;
        }

        let removed = self.tombstones;
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut kept: Vec<Node> = Vec::with_capacity(self.slots.len());
        for (old, node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
            if !node.deleted {
                remap[old] = kept.len();
                kept.push(node);
            }
        }
        for node in &mut kept {
            for list in &mut node.neighbors {
                *list = list
                    .iter()
                    .filter_map(|&n| (remap[n] != usize::MAX).then_some(remap[n]))
                    .collect();
            }
        }

        self.slots = kept.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        self.entry_point = kept
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.level.cmp(&b.level).then_with(|| ib.cmp(ia)))
            .map(|(i, _)| i);
        self.max_level = self
            .entry_point
            .map(|ep| kept[ep].level)
            .unwrap_or(0);
        self.nodes = kept;
        self.tombstones = 0;
        self.recount_inbound();
        let reconnected = self.reconnect_unreachable();

        tracing::debug!(removed, reconnected, live = self.nodes.len(), "Compacted vector index");
        removed
    }

    /// Check every structural invariant of the graph.
    ///
    /// Violations are reported as `IndexCorruption` and never repaired here.
    pub fn validate(&self) -> Result<()> {
        let live = self.nodes.iter().filter(|n| !n.deleted).count();
        if live != self.slots.len() || live + self.tombstones != self.nodes.len() {
            return Err(StratumError::IndexCorruption(format!(
                "live count mismatch: {} live nodes, {} slots, {} tombstones, {} total",
                live,
                self.slots.len(),
                self.tombstones,
                self.nodes.len()
            )));
        }

        for (id, &slot) in &self.slots {
            match self.nodes.get(slot) {
                Some(node) if node.id == *id && !node.deleted => {}
                _ => {
                    return Err(StratumError::IndexCorruption(format!(
                        "slot map entry for {id} points at the wrong node"
                    )));
                }
            }
        }

        for slot in 0..self.nodes.len() {
            let node = &self.nodes[slot];
            if Some(node.vector.len()) != self.dimension {
                return Err(StratumError::DimensionMismatch {
                    expected: self.dimension.unwrap_or(0),
                    actual: node.vector.len(),
                });
            }
            if node.neighbors.len() != node.level + 1 {
                return Err(StratumError::IndexCorruption(format!(
                    "node {} has {} adjacency levels for level {}",
                    node.id,
                    node.neighbors.len(),
                    node.level
                )));
            }
            self.check_bounds(slot)?;
            for (level, list) in node.neighbors.iter().enumerate() {
                for &n in list {
                    let valid = n != slot && self.nodes.get(n).is_some_and(|m| m.level >= level);
                    if !valid {
                        return Err(StratumError::IndexCorruption(format!(
                            "node {} links to invalid slot {} at level {}",
                            node.id, n, level
                        )));
                    }
                }
            }
        }

        match self.entry_point {
            None if !self.nodes.is_empty() => {
                return Err(StratumError::IndexCorruption(
                    "non-empty graph has no entry point".to_string(),
                ));
            }
            Some(ep) if self.nodes.get(ep).is_none_or(|n| n.level != self.max_level) => {
                return Err(StratumError::IndexCorruption(
                    "entry point is not on the top level".to_string(),
                ));
            }
            _ => {}
        }

        let reachable = self.reachable();
        let stranded = self
            .nodes
            .iter()
            .zip(&reachable)
            .find(|(node, reached)| !node.deleted && !**reached);
        if let Some((node, _)) = stranded {
            return Err(StratumError::IndexCorruption(format!(
                "live node {} is unreachable from the entry point",
                node.id
            )));
        }
        Ok(())
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.config.metric.distance(a, b)
    }

    fn bound(&self, level: usize) -> usize {
        if level == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    fn random_level(&mut self) -> usize {
        // 1 - [0, 1) keeps the argument of ln strictly positive
        let uniform: f64 = 1.0 - self.rng.r#gen::<f64>();
        let level = (-uniform.ln() * self.level_mult).floor() as usize;
        level.min(MAX_LEVEL)
    }

    fn mark_deleted(&mut self, slot: usize) {
        if let Some(node) = self.nodes.get_mut(slot) {
            if !node.deleted {
                node.deleted = true;
                self.tombstones += 1;
            }
        }
    }

    fn neighbors(&self, slot: usize, level: usize) -> &[usize] {
        self.nodes[slot]
            .neighbors
            .get(level)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Slots reachable from the entry point over edges of any level
    fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let Some(entry) = self.entry_point else {
            return seen;
        };
        seen[entry] = true;
        let mut stack = vec![entry];
        while let Some(slot) = stack.pop() {
            for list in &self.nodes[slot].neighbors {
                for &n in list {
                    if !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }
        seen
    }

    fn recount_inbound(&mut self) {
        let mut counts: Vec<Vec<usize>> = self.nodes.iter().map(|n| vec![0; n.level + 1]).collect();
        for node in &self.nodes {
            for (level, list) in node.neighbors.iter().enumerate() {
                for &n in list {
                    if let Some(count) = counts[n].get_mut(level) {
                        *count += 1;
                    }
                }
            }
        }
        for (node, inbound) in self.nodes.iter_mut().zip(counts) {
            node.inbound = inbound;
        }
    }

    /// Give every stranded live node a level-0 edge from its nearest
    /// reachable live node. Returns how many nodes were reconnected.
    fn reconnect_unreachable(&mut self) -> usize {
        let mut reconnected = 0;
        // One stranded node per pass, at most one pass per node
        for _ in 0..self.nodes.len() {
            let reachable = self.reachable();
            let Some(stranded) = (0..self.nodes.len()).find(|&s| !reachable[s] && !self.nodes[s].deleted)
            else {
                break;
            };

            let target = &self.nodes[stranded].vector;
            let anchor = (0..self.nodes.len())
                .filter(|&s| reachable[s] && !self.nodes[s].deleted)
                .map(|s| Candidate {
                    distance: self.distance(target, &self.nodes[s].vector),
                    slot: s,
                })
                .min();
            let Some(anchor) = anchor else {
                break;
            };
            if self.link(anchor.slot, stranded, 0, true).is_err() {
                break;
            }
            reconnected += 1;
        }
        reconnected
    }

    /// Walk toward `query` on one level until no neighbor is closer
    fn greedy_closest(&self, query: &[f32], start: usize, level: usize) -> usize {
        let mut current = start;
        let mut best = self.distance(query, &self.nodes[current].vector);
        loop {
            let mut improved = false;
            for &n in self.neighbors(current, level) {
                let d = self.distance(query, &self.nodes[n].vector);
                if d < best {
                    best = d;
                    current = n;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first search on one level, returning up to `ef` candidates nearest first.
    ///
    /// With `live_only`, tombstones are still expanded but never take a result
    /// slot, so the walk continues until `ef` live nodes are found or the
    /// reachable graph is exhausted.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[usize],
        ef: usize,
        level: usize,
        live_only: bool,
    ) -> Vec<Candidate> {
        let ef = ef.max(1);
        let admits = |slot: usize| !live_only || !self.nodes[slot].deleted;
        let mut visited: HashSet<usize> = HashSet::new();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let candidate = Candidate {
                    distance: self.distance(query, &self.nodes[ep].vector),
                    slot: ep,
                };
                frontier.push(Reverse(candidate));
                if admits(ep) {
                    results.push(candidate);
                }
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
            if current.distance > worst && results.len() >= ef {
                break;
            }

            for &n in self.neighbors(current.slot, level) {
                if !visited.insert(n) {
                    continue;
                }
                let distance = self.distance(query, &self.nodes[n].vector);
                let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
                if results.len() < ef || distance < worst {
                    let candidate = Candidate { distance, slot: n };
                    frontier.push(Reverse(candidate));
                    if admits(n) {
                        results.push(candidate);
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Pick the `m` nearest candidates, preferring live nodes
    fn select_neighbors(&self, slot: usize, candidates: &[Candidate]) -> Vec<usize> {
        let live: Vec<usize> = candidates
            .iter()
            .filter(|c| c.slot != slot && !self.nodes[c.slot].deleted)
            .take(self.config.m)
            .map(|c| c.slot)
            .collect();
        if !live.is_empty() {
            return live;
        }
        // Everything nearby is tombstoned; route through it until compaction.
        candidates
            .iter()
            .filter(|c| c.slot != slot)
            .take(self.config.m)
            .map(|c| c.slot)
            .collect()
    }

    /// Add an edge `from -> to`. Over the bound, drop `from`'s farthest edge
    /// whose target keeps another inbound edge, or the farthest outright.
    /// A `pinned` edge to `to` is never the one dropped.
    fn link(&mut self, from: usize, to: usize, level: usize, pinned: bool) -> Result<()> {
        if self.nodes[from].level < level {
            return Err(StratumError::IndexCorruption(format!(
                "attempted to link node {} above its level ({} > {})",
                self.nodes[from].id, level, self.nodes[from].level
            )));
        }

        let mut list = std::mem::take(&mut self.nodes[from].neighbors[level]);
        if !list.contains(&to) {
            list.push(to);
            self.nodes[to].inbound[level] += 1;
        }
        if list.len() > self.bound(level) {
            let base = &self.nodes[from].vector;
            let mut ranked: Vec<Candidate> = list
                .iter()
                .enumerate()
                .map(|(i, &n)| Candidate {
                    distance: self.distance(base, &self.nodes[n].vector),
                    slot: i,
                })
                .collect();
            ranked.sort();
            ranked.retain(|c| !(pinned && list[c.slot] == to));
            let victim = ranked
                .iter()
                .rev()
                .find(|c| self.nodes[list[c.slot]].inbound[level] > 1)
                .or(ranked.last())
                .map(|c| c.slot);
            if let Some(victim) = victim {
                let dropped = list.swap_remove(victim);
                let count = &mut self.nodes[dropped].inbound[level];
                *count = count.saturating_sub(1);
            }
        }
        self.nodes[from].neighbors[level] = list;
        Ok(())
    }

    fn check_bounds(&self, slot: usize) -> Result<()> {
        let node = &self.nodes[slot];
        for (level, list) in node.neighbors.iter().enumerate() {
            if list.len() > self.bound(level) {
                return Err(StratumError::IndexCorruption(format!(
                    "node {} has {} neighbors at level {} (bound {})",
                    node.id,
                    list.len(),
                    level,
                    self.bound(level)
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_config() -> HnswConfig {
        HnswConfig {
            seed: Some(7),
            ..Default::default()
        }
    }

    fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    mod insertion {
        use super::*;

        #[test]
        fn test_first_insert_fixes_dimension() {
            let mut index = HnswIndex::new(seeded_config());
            assert_eq!(index.dimension(), None);

            index.insert(Uuid::new_v4(), vec![1.0, 0.0, 0.0]).unwrap();
            assert_eq!(index.dimension(), Some(3));
            assert_eq!(index.len(), 1);
        }

        #[test]
        fn test_dimension_mismatch_is_rejected_without_mutation() {
            let mut index = HnswIndex::new(seeded_config());
            index.insert(Uuid::new_v4(), vec![1.0, 0.0]).unwrap();

            let err = index.insert(Uuid::new_v4(), vec![1.0, 0.0, 0.0]).unwrap_err();
            assert!(matches!(
                err,
                StratumError::DimensionMismatch {
                    expected: 2,
                    actual: 3
                }
            ));
            assert!(err.is_fatal());
            assert_eq!(index.len(), 1);
        }

        #[test]
        fn test_non_finite_vector_rejected() {
            let mut index = HnswIndex::new(seeded_config());
            let err = index.insert(Uuid::new_v4(), vec![f32::NAN, 1.0]).unwrap_err();
            assert!(matches!(err, StratumError::IndexCorruption(_)));
            assert!(index.is_empty());
        }

        #[test]
        fn test_reinsert_replaces_previous_vector() {
            let mut index = HnswIndex::new(seeded_config());
            let id = Uuid::new_v4();
            index.insert(id, vec![1.0, 0.0]).unwrap();
            index.insert(id, vec![0.0, 1.0]).unwrap();

            assert_eq!(index.len(), 1);
            assert_eq!(index.tombstone_count(), 1);

            let hits = index.search(&[0.0, 1.0], 1, 16).unwrap();
            assert_eq!(hits[0].id, id);
            assert!(hits[0].distance.abs() < 1e-6);
        }

        #[test]
        fn test_graph_stays_valid_under_load() {
            let mut index = HnswIndex::new(HnswConfig {
                m: 4,
                ef_construction: 32,
                seed: Some(11),
                ..Default::default()
            });
            for vector in random_vectors(400, 6, 3) {
                index.insert(Uuid::new_v4(), vector).unwrap();
            }
            index.validate().unwrap();
            assert_eq!(index.len(), 400);
        }

        #[test]
        fn test_levels_thin_out_geometrically() {
            let mut index = HnswIndex::new(seeded_config());
            let levels: Vec<usize> = (0..5000).map(|_| index.random_level()).collect();
            let ground = levels.iter().filter(|&&l| l == 0).count();
            let upper = levels.iter().filter(|&&l| l >= 1).count();
            // With M = 16, P(level >= 1) = 1/16
            assert!(ground > upper * 8, "ground={ground} upper={upper}");
            assert!(upper > 0);
        }
    }

    mod search {
        use super::*;

        #[test]
        fn test_empty_index_returns_nothing() {
            let index = HnswIndex::new(seeded_config());
            assert!(index.search(&[1.0, 0.0], 5, 10).unwrap().is_empty());
        }

        #[test]
        fn test_query_dimension_mismatch() {
            let mut index = HnswIndex::new(seeded_config());
            index.insert(Uuid::new_v4(), vec![1.0, 0.0]).unwrap();

            let err = index.search(&[1.0], 1, 10).unwrap_err();
            assert!(matches!(err, StratumError::DimensionMismatch { .. }));
        }

        #[test]
        fn test_finds_nearest_neighbor() {
            let mut index = HnswIndex::new(HnswConfig {
                metric: DistanceMetric::Euclidean,
                seed: Some(5),
                ..Default::default()
            });
            let target = Uuid::new_v4();
            index.insert(target, vec![10.0, 10.0]).unwrap();
            for vector in random_vectors(50, 2, 9) {
                index.insert(Uuid::new_v4(), vector).unwrap();
            }

            let hits = index.search(&[9.5, 9.5], 1, 32).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, target);
        }

        #[test]
        fn test_equal_distances_ordered_by_id() {
            let mut index = HnswIndex::new(seeded_config());
            let mut ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
            for id in &ids {
                index.insert(*id, vec![1.0, 0.0]).unwrap();
            }
            ids.sort();

            let hits = index.search(&[1.0, 0.0], 5, 16).unwrap();
            let found: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
            assert_eq!(found, ids);
        }

        #[test]
        fn test_results_sorted_nearest_first() {
            let mut index = HnswIndex::new(seeded_config());
            for vector in random_vectors(100, 4, 21) {
                index.insert(Uuid::new_v4(), vector).unwrap();
            }

            let hits = index.search(&[0.5, 0.5, 0.5, 0.5], 10, 64).unwrap();
            assert_eq!(hits.len(), 10);
            for pair in hits.windows(2) {
                assert!(pair[0].distance <= pair[1].distance);
            }
        }
    }

    mod deletion {
        use super::*;

        #[test]
        fn test_removed_entries_are_skipped() {
            let mut index = HnswIndex::new(seeded_config());
            let removed = Uuid::new_v4();
            let kept = Uuid::new_v4();
            index.insert(removed, vec![1.0, 0.0]).unwrap();
            index.insert(kept, vec![0.9, 0.1]).unwrap();

            assert!(index.remove(&removed));
            assert!(!index.remove(&removed));

            let hits = index.search(&[1.0, 0.0], 2, 16).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, kept);
            assert_eq!(index.tombstone_count(), 1);
            assert!(!index.live_ids().contains(&removed));
        }

        #[test]
        fn test_removing_last_entry_resets_graph() {
            let mut index = HnswIndex::new(seeded_config());
            let id = Uuid::new_v4();
            index.insert(id, vec![1.0, 0.0]).unwrap();
            index.remove(&id);

            assert!(index.is_empty());
            assert_eq!(index.tombstone_count(), 0);
            assert!(index.search(&[1.0, 0.0], 1, 8).unwrap().is_empty());
            index.validate().unwrap();
        }

        #[test]
        fn test_compaction_drops_tombstones_and_keeps_results() {
            let mut index = HnswIndex::new(HnswConfig {
                m: 6,
                seed: Some(13),
                ..Default::default()
            });
            let vectors = random_vectors(300, 5, 17);
            let ids: Vec<Uuid> = vectors
                .iter()
                .map(|v| {
                    let id = Uuid::new_v4();
                    index.insert(id, v.clone()).unwrap();
                    id
                })
                .collect();

            for id in ids.iter().step_by(3) {
                index.remove(id);
            }
            let query = vec![0.1, -0.2, 0.3, 0.0, 0.5];
            let before: Vec<Uuid> = index
                .search(&query, 5, 300)
                .unwrap()
                .iter()
                .map(|h| h.id)
                .collect();

            let removed = index.compact();
            assert_eq!(removed, 100);
            assert_eq!(index.tombstone_count(), 0);
            assert_eq!(index.len(), 200);
            index.validate().unwrap();

            let after: Vec<Uuid> = index
                .search(&query, 5, 300)
                .unwrap()
                .iter()
                .map(|h| h.id)
                .collect();
            assert_eq!(before[0], after[0]);
            let shared = after.iter().filter(|id| before.contains(id)).count();
            assert!(shared >= 4, "only {shared} of 5 results survived compaction");
        }

        #[test]
        fn test_compact_without_tombstones_is_noop() {
            let mut index = HnswIndex::new(seeded_config());
            index.insert(Uuid::new_v4(), vec![1.0, 2.0]).unwrap();
            assert_eq!(index.compact(), 0);
            assert_eq!(index.len(), 1);
        }

        #[test]
        fn test_search_walks_past_a_dense_patch_of_tombstones() {
            let mut index = HnswIndex::new(HnswConfig {
                metric: DistanceMetric::Euclidean,
                seed: Some(3),
                ..Default::default()
            });
            let mut rng = StdRng::seed_from_u64(5);
            let near: Vec<Uuid> = (0..100)
                .map(|_| {
                    let id = Uuid::new_v4();
                    let v = vec![rng.gen_range(-0.1..0.1), rng.gen_range(-0.1..0.1)];
                    index.insert(id, v).unwrap();
                    id
                })
                .collect();
            let far: HashSet<Uuid> = (0..900)
                .map(|_| {
                    let id = Uuid::new_v4();
                    let v = vec![rng.gen_range(50.0..60.0), rng.gen_range(50.0..60.0)];
                    index.insert(id, v).unwrap();
                    id
                })
                .collect();

            for id in &near {
                index.remove(id);
            }
            assert!(index.tombstone_ratio() < index.config().compaction_ratio);

            let hits = index.search(&[0.0, 0.0], 5, 64).unwrap();
            assert_eq!(hits.len(), 5);
            assert!(hits.iter().all(|hit| far.contains(&hit.id)));
            index.validate().unwrap();
        }

        #[test]
        fn test_heavy_deletion_then_compaction_keeps_graph_connected() {
            for seed in 0..20 {
                let mut index = HnswIndex::new(HnswConfig {
                    m: 4,
                    seed: Some(seed),
                    ..Default::default()
                });
                let ids: Vec<Uuid> = random_vectors(600, 8, seed + 100)
                    .into_iter()
                    .map(|v| {
                        let id = Uuid::new_v4();
                        index.insert(id, v).unwrap();
                        id
                    })
                    .collect();

                for (i, id) in ids.iter().enumerate() {
                    if i % 5 < 3 {
                        index.remove(id);
                    }
                }
                assert_eq!(index.compact(), 360);
                assert_eq!(index.len(), 240);
                if let Err(e) = index.validate() {
                    panic!("seed {seed}: {e}");
                }
            }
        }

        #[test]
        fn test_validate_reports_stranded_node() {
            let mut index = HnswIndex::new(seeded_config());
            for v in random_vectors(30, 4, 9) {
                index.insert(Uuid::new_v4(), v).unwrap();
            }
            index.validate().unwrap();

            let entry = index.entry_point.unwrap();
            let stranded = (0..index.nodes.len()).find(|&s| s != entry).unwrap();
            for node in &mut index.nodes {
                for list in &mut node.neighbors {
                    list.retain(|&n| n != stranded);
                }
            }

            let err = index.validate().unwrap_err();
            assert!(err.to_string().contains("unreachable"));
        }
    }
}
