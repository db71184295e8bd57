//! Weighted undirected graph of hospital locations, with Dijkstra shortest-path, a k=2
//! alternative-path search, and a nearest-of-set query. Grounded on `original_source/graph.py`.

use model::{Location, LocationId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown start location {0}")]
    UnknownStart(LocationId),
}

/// A min-heap entry for Dijkstra's algorithm. `Ord` is reversed relative to the natural
/// float order so that `BinaryHeap` (a max-heap) pops the smallest distance first.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    dist: f64,
    node: LocationId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.node == other.node
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Weighted graph representing the hospital floor plan. Edges carry travel-time/cost
/// weights used by Dijkstra; `euclidean_distance` is a separate straight-line metric used
/// only by the path planner's sampling heuristics (§3 of SPEC_FULL.md).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<LocationId, Location>,
    adjacency: HashMap<LocationId, Vec<(LocationId, f64)>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_location(&mut self, location: Location) {
        self.adjacency.entry(location.id).or_default();
        self.nodes.insert(location.id, location);
    }

    pub fn add_edge(&mut self, a: LocationId, b: LocationId, weight: f64, bidirectional: bool) {
        self.adjacency.entry(a).or_default().push((b, weight));
        if bidirectional {
            self.adjacency.entry(b).or_default().push((a, weight));
        }
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.nodes.get(&id)
    }

    /// All locations known to the graph, in unspecified order. Used by the path planner to
    /// map sampled points back onto graph nodes.
    pub fn locations(&self) -> impl Iterator<Item = &Location> + '_ {
        self.nodes.values()
    }

    /// Straight-line distance between two locations, penalized 10x when they sit on
    /// different floors. Not used by the graph-edge search itself.
    pub fn euclidean_distance(&self, a: &Location, b: &Location) -> f64 {
        let dx = a.x - b.x;
        let dy = a.y - b.y;
        let floor_penalty = if a.floor == b.floor { 1.0 } else { 10.0 };
        (dx * dx + dy * dy).sqrt() * floor_penalty
    }

    /// Dijkstra from `start`, optionally terminating early once `target` is popped.
    /// Unknown `start` is a hard error; an unknown `target` is simply never reached.
    fn weighted_dijkstra(
        &self,
        start: LocationId,
        target: Option<LocationId>,
    ) -> Result<(HashMap<LocationId, f64>, HashMap<LocationId, LocationId>), GraphError> {
        if !self.nodes.contains_key(&start) {
            return Err(GraphError::UnknownStart(start));
        }

        let mut distances: HashMap<LocationId, f64> =
            self.nodes.keys().map(|&id| (id, f64::INFINITY)).collect();
        distances.insert(start, 0.0);
        let mut previous: HashMap<LocationId, LocationId> = HashMap::new();
        let mut visited: std::collections::HashSet<LocationId> = std::collections::HashSet::new();

        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry { dist: 0.0, node: start });

        while let Some(HeapEntry { dist, node }) = heap.pop() {
            if visited.contains(&node) {
                continue;
            }
            visited.insert(node);

            if target == Some(node) {
                break;
            }

            if let Some(neighbors) = self.adjacency.get(&node) {
                for &(neighbor, weight) in neighbors {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    let candidate = dist + weight;
                    if candidate < *distances.get(&neighbor).unwrap_or(&f64::INFINITY) {
                        distances.insert(neighbor, candidate);
                        previous.insert(neighbor, node);
                        heap.push(HeapEntry { dist: candidate, node: neighbor });
                    }
                }
            }
        }

        Ok((distances, previous))
    }

    /// Classic lazy-deletion shortest path with early termination on target pop.
    /// Unknown start is `Err`; unknown target is `Ok(([], +inf))`.
    pub fn shortest_path(
        &self,
        start: LocationId,
        target: LocationId,
    ) -> Result<(Vec<LocationId>, f64), GraphError> {
        if !self.nodes.contains_key(&target) {
            if !self.nodes.contains_key(&start) {
                return Err(GraphError::UnknownStart(start));
            }
            return Ok((Vec::new(), f64::INFINITY));
        }

        let (distances, previous) = self.weighted_dijkstra(start, Some(target))?;
        let dist = *distances.get(&target).unwrap_or(&f64::INFINITY);
        if !dist.is_finite() {
            return Ok((Vec::new(), f64::INFINITY));
        }

        let mut path = vec![target];
        let mut current = target;
        while let Some(&prev) = previous.get(&current) {
            path.push(prev);
            current = prev;
        }
        path.reverse();
        Ok((path, dist))
    }

    /// Yen's-like second-shortest search: remove each edge of the shortest path in turn,
    /// rerun shortest-path, restore the edge, and keep the best strictly-different result.
    pub fn second_shortest_path(
        &self,
        start: LocationId,
        target: LocationId,
    ) -> Result<(Vec<LocationId>, f64), GraphError> {
        let (shortest, shortest_dist) = self.shortest_path(start, target)?;
        if shortest.is_empty() || !shortest_dist.is_finite() || shortest.len() < 3 {
            return Ok((Vec::new(), f64::INFINITY));
        }

        let mut best_path = Vec::new();
        let mut best_dist = f64::INFINITY;

        for window in shortest.windows(2) {
            let (from, to) = (window[0], window[1]);
            let mut pruned = self.clone();
            pruned.remove_edge(from, to);

            if let Ok((alt_path, alt_dist)) = pruned.shortest_path(start, target) {
                if !alt_path.is_empty() && alt_dist < best_dist && alt_path != shortest {
                    best_dist = alt_dist;
                    best_path = alt_path;
                }
            }
        }

        if best_path.is_empty() {
            Ok((Vec::new(), f64::INFINITY))
        } else {
            Ok((best_path, best_dist))
        }
    }

    fn remove_edge(&mut self, a: LocationId, b: LocationId) {
        if let Some(edges) = self.adjacency.get_mut(&a) {
            edges.retain(|&(n, _)| n != b);
        }
        if let Some(edges) = self.adjacency.get_mut(&b) {
            edges.retain(|&(n, _)| n != a);
        }
    }

    /// Single-source search returning the candidate with minimum distance from `from`.
    pub fn nearest_of_set(
        &self,
        from: LocationId,
        candidates: &[LocationId],
    ) -> Result<Option<LocationId>, GraphError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let (distances, _) = self.weighted_dijkstra(from, None)?;

        let mut best: Option<(LocationId, f64)> = None;
        for &candidate in candidates {
            if let Some(&dist) = distances.get(&candidate) {
                if dist.is_finite() && best.map_or(true, |(_, best_dist)| dist < best_dist) {
                    best = Some((candidate, dist));
                }
            }
        }
        Ok(best.map(|(id, _)| id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_graph() -> Graph {
        let mut g = Graph::new();
        g.add_location(Location::new(1, 0.0, 0.0, 0));
        g.add_location(Location::new(2, 1.0, 0.0, 0));
        g.add_location(Location::new(3, 2.0, 0.0, 0));
        g.add_edge(1, 2, 1.0, true);
        g.add_edge(2, 3, 1.0, true);
        g.add_edge(1, 3, 5.0, true);
        g
    }

    #[test]
    fn shortest_path_prefers_cheaper_route() {
        let g = triangle_graph();
        let (path, dist) = g.shortest_path(1, 3).unwrap();
        assert_eq!(path, vec![1, 2, 3]);
        assert_eq!(dist, 2.0);
    }

    #[test]
    fn unknown_start_is_hard_error() {
        let g = triangle_graph();
        assert!(matches!(g.shortest_path(99, 1), Err(GraphError::UnknownStart(99))));
    }

    #[test]
    fn unknown_target_yields_empty_path() {
        let g = triangle_graph();
        let (path, dist) = g.shortest_path(1, 99).unwrap();
        assert!(path.is_empty());
        assert!(dist.is_infinite());
    }

    #[test]
    fn second_shortest_path_avoids_the_direct_edge() {
        let g = triangle_graph();
        let (path, dist) = g.second_shortest_path(1, 3).unwrap();
        assert_eq!(path, vec![1, 3]);
        assert_eq!(dist, 5.0);
    }

    #[test]
    fn nearest_of_set_picks_minimum_distance_candidate() {
        let g = triangle_graph();
        let nearest = g.nearest_of_set(1, &[3, 2]).unwrap();
        assert_eq!(nearest, Some(2));
    }

    #[test]
    fn euclidean_distance_penalizes_floor_changes() {
        let g = Graph::new();
        let a = Location::new(1, 0.0, 0.0, 0);
        let b = Location::new(2, 3.0, 4.0, 0);
        let c = Location::new(3, 3.0, 4.0, 1);
        assert_eq!(g.euclidean_distance(&a, &b), 5.0);
        assert_eq!(g.euclidean_distance(&a, &c), 50.0);
    }
}
