//! Hexagram transformation graph
//!
//! Nodes are the 64 hexagrams (by King Wen number), edges connect
//! hexagrams that differ in exactly one line. The result is the 6-cube:
//! 6-regular, 192 undirected edges, bipartite, so BFS distance is the
//! Hamming distance between patterns.
//!
//! Fortune analyses take a map of per-hexagram lucky rates (0.0..=1.0)
//! and compare each node to its neighbours.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::hexagram::{self, KING_WEN, LINES};

/// Lucky rate per hexagram number
pub type Rates = HashMap<u8, f64>;

/// Rate thresholds used by the node classifications
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Own rate below this can make a trap
    pub trap_own: f64,
    /// Neighbour average below this can make a trap
    pub trap_neighbours: f64,
    /// Rate at or above this is a "good" node
    pub good: f64,
    /// Rate at or below this is a "bad" node
    pub bad: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            trap_own: 0.25,
            trap_neighbours: 0.35,
            good: 0.4,
            bad: 0.2,
        }
    }
}

/// Directed edge out of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub target: u8,
    /// 1 = bottom line
    pub changed_line: u8,
}

/// Own rate compared with neighbours
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeScore {
    pub hexagram: u8,
    pub name: String,
    pub own_rate: f64,
    pub neighbour_average: f64,
    /// own - neighbour average
    pub attraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Better than where it leads
    Attractor,
    /// Worse than where it leads
    Repeller,
    Balanced,
}

impl NodeScore {
    pub fn role(&self) -> NodeRole {
        if self.attraction > 0.0 {
            NodeRole::Attractor
        } else if self.attraction < 0.0 {
            NodeRole::Repeller
        } else {
            NodeRole::Balanced
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegreeStats {
    pub nodes: usize,
    pub directed_edges: usize,
    pub undirected_edges: usize,
    pub min_degree: usize,
    pub max_degree: usize,
    pub mean_degree: f64,
    pub mean_clustering: f64,
}

/// How connected the good and the bad hexagrams are among themselves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDensity {
    pub good_nodes: Vec<u8>,
    pub bad_nodes: Vec<u8>,
    /// Share of edges out of good nodes that land on good nodes
    pub good_density: f64,
    /// Share of edges out of bad nodes that land on bad nodes
    pub bad_density: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairRelation {
    /// Partner is the 180° rotation
    Inverse,
    /// Partner has every line flipped (used when rotation gives the same hexagram)
    Complement,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KingWenPair {
    pub pair: u8,
    pub first: u8,
    pub second: u8,
    pub relation: PairRelation,
}

/// Adjacency list keyed by King Wen number
#[derive(Debug, Clone)]
pub struct TransformationGraph {
    adjacency: BTreeMap<u8, Vec<Edge>>,
}

impl TransformationGraph {
    /// Flip each line of every hexagram
    pub fn build() -> Self {
        let mut adjacency = BTreeMap::new();
        for kw in KING_WEN.iter() {
            let p = kw.pattern();
            let edges = (0..LINES)
                .filter_map(|i| p.flip_line(i).ok().map(|to| (i, to)))
                .map(|(i, to)| Edge {
                    target: hexagram::number_of(to),
                    changed_line: i as u8 + 1,
                })
                .collect();
            adjacency.insert(kw.number, edges);
        }
        Self { adjacency }
    }

    pub fn nodes(&self) -> impl Iterator<Item = u8> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edges(&self, node: u8) -> &[Edge] {
        self.adjacency.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn neighbours(&self, node: u8) -> impl Iterator<Item = u8> + '_ {
        self.edges(node).iter().map(|e| e.target)
    }

    pub fn degree(&self, node: u8) -> usize {
        self.edges(node).len()
    }

    pub fn directed_edge_count(&self) -> usize {
        self.adjacency.values().map(|v| v.len()).sum()
    }

    /// Each undirected edge is stored once per direction
    pub fn undirected_edge_count(&self) -> usize {
        self.directed_edge_count() / 2
    }

    pub fn has_edge(&self, a: u8, b: u8) -> bool {
        self.neighbours(a).any(|n| n == b)
    }

    /// Shortest path from `from` to `to`, both ends included
    pub fn shortest_path(&self, from: u8, to: u8) -> Result<Vec<u8>> {
        hexagram::by_number(from)?;
        hexagram::by_number(to)?;
        let targets: HashSet<u8> = [to].into_iter().collect();
        Ok(self.bfs(from, &targets).unwrap_or_default())
    }

    /// Shortest path from `from` to the nearest member of `targets`
    pub fn path_to_any(&self, from: u8, targets: &HashSet<u8>) -> Result<Option<Vec<u8>>> {
        hexagram::by_number(from)?;
        Ok(self.bfs(from, targets))
    }

    fn bfs(&self, start: u8, targets: &HashSet<u8>) -> Option<Vec<u8>> {
        let mut visited: HashSet<u8> = [start].into_iter().collect();
        let mut parent: HashMap<u8, u8> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            if targets.contains(&node) {
                let mut path = vec![node];
                let mut cur = node;
                while let Some(&p) = parent.get(&cur) {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                return Some(path);
            }

            for next in self.neighbours(node) {
                if visited.insert(next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }

        None
    }

    /// Distance from `from` to every reachable node
    pub fn distances_from(&self, from: u8) -> Result<BTreeMap<u8, usize>> {
        hexagram::by_number(from)?;
        let mut dist = BTreeMap::from([(from, 0usize)]);
        let mut queue = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            let d = dist[&node];
            for next in self.neighbours(node) {
                if !dist.contains_key(&next) {
                    dist.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
        Ok(dist)
    }

    /// Number of nodes at each distance from `from`
    pub fn layer_sizes(&self, from: u8) -> Result<Vec<usize>> {
        let dist = self.distances_from(from)?;
        let max = dist.values().copied().max().unwrap_or(0);
        let mut layers = vec![0; max + 1];
        for d in dist.values() {
            layers[*d] += 1;
        }
        Ok(layers)
    }

    /// Fraction of a node's neighbour pairs that are themselves adjacent
    pub fn clustering_coefficient(&self, node: u8) -> f64 {
        let neighbours: Vec<u8> = self.neighbours(node).collect();
        let k = neighbours.len();
        if k < 2 {
            return 0.0;
        }
        let mut links = 0;
        for (i, a) in neighbours.iter().enumerate() {
            for b in &neighbours[i + 1..] {
                if self.has_edge(*a, *b) {
                    links += 1;
                }
            }
        }
        links as f64 / (k * (k - 1) / 2) as f64
    }

    pub fn degree_stats(&self) -> DegreeStats {
        let degrees: Vec<usize> = self.nodes().map(|n| self.degree(n)).collect();
        let nodes = degrees.len();
        let mean_clustering = if nodes == 0 {
            0.0
        } else {
            self.nodes().map(|n| self.clustering_coefficient(n)).sum::<f64>() / nodes as f64
        };

        DegreeStats {
            nodes,
            directed_edges: self.directed_edge_count(),
            undirected_edges: self.undirected_edge_count(),
            min_degree: degrees.iter().copied().min().unwrap_or(0),
            max_degree: degrees.iter().copied().max().unwrap_or(0),
            mean_degree: if nodes == 0 {
                0.0
            } else {
                degrees.iter().sum::<usize>() as f64 / nodes as f64
            },
            mean_clustering,
        }
    }

    /// Mean rate of a node's neighbours; `None` when no neighbour has a rate
    pub fn neighbour_average(&self, node: u8, rates: &Rates) -> Option<f64> {
        let known: Vec<f64> = self.neighbours(node).filter_map(|n| rates.get(&n).copied()).collect();
        if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<f64>() / known.len() as f64)
        }
    }

    /// Own rate against neighbour average for every node, most attractive first
    pub fn attraction(&self, rates: &Rates) -> Vec<NodeScore> {
        let mut scores: Vec<NodeScore> = self
            .nodes()
            .filter_map(|n| {
                let avg = self.neighbour_average(n, rates)?;
                let own = rates.get(&n).copied().unwrap_or(0.0);
                Some(NodeScore {
                    hexagram: n,
                    name: hexagram::name_of(n).to_string(),
                    own_rate: own,
                    neighbour_average: avg,
                    attraction: own - avg,
                })
            })
            .collect();

        scores.sort_by(|a, b| {
            b.attraction
                .partial_cmp(&a.attraction)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.hexagram.cmp(&b.hexagram))
        });
        scores
    }

    /// Poor nodes whose neighbours are poor too, worst first
    pub fn traps(&self, rates: &Rates, thresholds: &Thresholds) -> Vec<NodeScore> {
        let mut traps: Vec<NodeScore> = self
            .attraction(rates)
            .into_iter()
            .filter(|s| s.own_rate < thresholds.trap_own && s.neighbour_average < thresholds.trap_neighbours)
            .collect();
        traps.sort_by(|a, b| {
            a.own_rate
                .partial_cmp(&b.own_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.hexagram.cmp(&b.hexagram))
        });
        traps
    }

    pub fn cluster_density(&self, rates: &Rates, thresholds: &Thresholds) -> ClusterDensity {
        let mut good_nodes: Vec<u8> = rates
            .iter()
            .filter(|(_, r)| **r >= thresholds.good)
            .map(|(n, _)| *n)
            .collect();
        let mut bad_nodes: Vec<u8> = rates
            .iter()
            .filter(|(_, r)| **r <= thresholds.bad)
            .map(|(n, _)| *n)
            .collect();
        good_nodes.sort_unstable();
        bad_nodes.sort_unstable();

        ClusterDensity {
            good_density: self.internal_density(&good_nodes),
            bad_density: self.internal_density(&bad_nodes),
            good_nodes,
            bad_nodes,
        }
    }

    fn internal_density(&self, group: &[u8]) -> f64 {
        let members: HashSet<u8> = group.iter().copied().collect();
        let mut total = 0usize;
        let mut inside = 0usize;
        for n in group {
            for t in self.neighbours(*n) {
                total += 1;
                if members.contains(&t) {
                    inside += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            inside as f64 / total as f64
        }
    }
}

/// Relation between the two members of every King Wen pair
pub fn king_wen_pairs() -> Vec<KingWenPair> {
    KING_WEN
        .chunks(2)
        .filter_map(|pair| match pair {
            [a, b] => {
                let (pa, pb) = (a.pattern(), b.pattern());
                let relation = if pa.inverse() == pb {
                    PairRelation::Inverse
                } else if pa.complement() == pb {
                    PairRelation::Complement
                } else {
                    PairRelation::Other
                };
                Some(KingWenPair {
                    pair: a.pair(),
                    first: a.number,
                    second: b.number,
                    relation,
                })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates_from(f: impl Fn(u8) -> f64) -> Rates {
        (1..=64).map(|n| (n, f(n))).collect()
    }

    #[test]
    fn test_graph_is_six_regular() {
        let g = TransformationGraph::build();
        assert_eq!(g.node_count(), 64);
        for n in g.nodes() {
            assert_eq!(g.degree(n), 6);
            assert!(!g.has_edge(n, n));
        }
        assert_eq!(g.undirected_edge_count(), 192);
    }

    #[test]
    fn test_edges_are_symmetric() {
        let g = TransformationGraph::build();
        for n in g.nodes() {
            for e in g.edges(n) {
                let back = g.edges(e.target).iter().find(|b| b.target == n).unwrap();
                assert_eq!(back.changed_line, e.changed_line);
            }
        }
    }

    #[test]
    fn test_bfs_distance_is_hamming_distance() {
        let g = TransformationGraph::build();
        for a in [1u8, 3, 29, 63] {
            for b in 1..=64u8 {
                let path = g.shortest_path(a, b).unwrap();
                let pa = hexagram::by_number(a).unwrap().pattern();
                let pb = hexagram::by_number(b).unwrap().pattern();
                assert_eq!(path.len() - 1, pa.hamming(pb) as usize);
                assert_eq!(path.first(), Some(&a));
                assert_eq!(path.last(), Some(&b));
                for w in path.windows(2) {
                    assert!(g.has_edge(w[0], w[1]));
                }
            }
        }
    }

    #[test]
    fn test_path_to_self_and_bad_input() {
        let g = TransformationGraph::build();
        assert_eq!(g.shortest_path(5, 5).unwrap(), vec![5]);
        assert!(g.shortest_path(0, 5).is_err());
        assert!(g.shortest_path(5, 65).is_err());
    }

    #[test]
    fn test_qian_to_kun_takes_six_steps() {
        let g = TransformationGraph::build();
        assert_eq!(g.shortest_path(1, 2).unwrap().len(), 7);
    }

    #[test]
    fn test_path_to_any_stops_at_nearest() {
        let g = TransformationGraph::build();
        // 姤 (44) is one line away from 乾, 坤 is six away
        let targets: HashSet<u8> = [2, 44].into_iter().collect();
        let path = g.path_to_any(1, &targets).unwrap().unwrap();
        assert_eq!(path, vec![1, 44]);
    }

    #[test]
    fn test_layers_follow_binomial() {
        let g = TransformationGraph::build();
        assert_eq!(g.layer_sizes(1).unwrap(), vec![1, 6, 15, 20, 15, 6, 1]);
    }

    #[test]
    fn test_hypercube_has_no_triangles() {
        let g = TransformationGraph::build();
        let stats = g.degree_stats();
        assert_eq!(stats.min_degree, 6);
        assert_eq!(stats.max_degree, 6);
        assert_eq!(stats.mean_clustering, 0.0);
    }

    #[test]
    fn test_attraction_single_lucky_node() {
        let g = TransformationGraph::build();
        let rates = rates_from(|n| if n == 31 { 1.0 } else { 0.0 });
        let scores = g.attraction(&rates);
        assert_eq!(scores.len(), 64);
        assert_eq!(scores[0].hexagram, 31);
        assert_eq!(scores[0].role(), NodeRole::Attractor);
        assert!((scores[0].attraction - 1.0).abs() < 1e-9);

        // Neighbours of 咸 see one lucky neighbour in six
        let neighbour = g.neighbours(31).next().unwrap();
        let s = scores.iter().find(|s| s.hexagram == neighbour).unwrap();
        assert!((s.neighbour_average - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(s.role(), NodeRole::Repeller);
    }

    #[test]
    fn test_neighbour_average_skips_missing() {
        let g = TransformationGraph::build();
        let rates: Rates = [(44u8, 0.5)].into_iter().collect();
        assert_eq!(g.neighbour_average(1, &rates), Some(0.5));
        assert_eq!(g.neighbour_average(2, &rates), None);
    }

    #[test]
    fn test_traps_and_clusters() {
        let g = TransformationGraph::build();
        let rates = rates_from(|_| 0.1);
        let traps = g.traps(&rates, &Thresholds::default());
        assert_eq!(traps.len(), 64);

        let density = g.cluster_density(&rates, &Thresholds::default());
        assert!(density.good_nodes.is_empty());
        assert_eq!(density.bad_nodes.len(), 64);
        assert_eq!(density.good_density, 0.0);
        assert_eq!(density.bad_density, 1.0);
    }

    #[test]
    fn test_king_wen_pairs() {
        let pairs = king_wen_pairs();
        assert_eq!(pairs.len(), 32);
        assert_eq!(pairs[0].relation, PairRelation::Complement); // 乾 / 坤
        assert_eq!(pairs[1].relation, PairRelation::Inverse); // 屯 / 蒙
        assert!(pairs.iter().all(|p| p.relation != PairRelation::Other));
        let complements = pairs.iter().filter(|p| p.relation == PairRelation::Complement).count();
        assert_eq!(complements, 4);
    }
}
