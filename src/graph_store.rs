//! GraphStore (§4.6): a weighted undirected similarity graph between
//! document ids, rebuilt wholesale on every ingest and persisted as a single
//! bincode-encoded edge list via shadow-then-rename.

use petgraph::graph::{NodeIndex, UnGraph};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{Edge, ExpandedNode};

pub struct GraphStore {
    path: PathBuf,
    graph: UnGraph<String, f32>,
    node_index: HashMap<String, NodeIndex>,
}

impl GraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let edges = if path.exists() {
            let bytes = std::fs::read(path)?;
            let (edges, _): (Vec<Edge>, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| Error::Fatal(format!("graph store at {} is corrupt: {e}", path.display())))?;
            edges
        } else {
            Vec::new()
        };

        let mut store = Self { path: path.to_path_buf(), graph: UnGraph::new_undirected(), node_index: HashMap::new() };
        store.rebuild(edges);
        Ok(store)
    }

    fn rebuild(&mut self, edges: Vec<Edge>) {
        self.graph = UnGraph::new_undirected();
        self.node_index = HashMap::new();
        for edge in edges {
            let a = self.ensure_node(&edge.a);
            let b = self.ensure_node(&edge.b);
            self.graph.add_edge(a, b, edge.weight);
        }
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.node_index.insert(id.to_string(), idx);
        idx
    }

    /// Atomic bulk replace (I3): the graph on disk always matches the
    /// document vector set as of the ingest that produced `edges`.
    pub fn replace_all(&mut self, edges: Vec<Edge>) -> Result<()> {
        self.rebuild(edges.clone());
        let bytes = bincode::serde::encode_to_vec(&edges, bincode::config::standard())
            .map_err(|e| Error::Ingest(format!("failed to encode graph: {e}")))?;

        let file_name = self.path.file_name().and_then(|f| f.to_str()).unwrap_or("graph.bin");
        let shadow = self.path.with_file_name(format!("shadow.{file_name}"));
        {
            use std::io::Write;
            let mut f = std::fs::File::create(&shadow)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&shadow, &self.path)?;
        Ok(())
    }

    /// Induced subgraph edges (§4.9 step 5): every stored edge whose both
    /// endpoints are in `ids`, used to assemble the query response's graph
    /// payload over `direct ∪ related`.
    pub fn edges_among(&self, ids: &std::collections::HashSet<&str>) -> Vec<Edge> {
        use petgraph::visit::EdgeRef;
        let mut out = Vec::new();
        for edge_ref in self.graph.edge_references() {
            let a = &self.graph[edge_ref.source()];
            let b = &self.graph[edge_ref.target()];
            if ids.contains(a.as_str()) && ids.contains(b.as_str()) {
                out.push(Edge::new(a, b, *edge_ref.weight()));
            }
        }
        out.sort_by(|x, y| x.a.cmp(&y.a).then_with(|| x.b.cmp(&y.b)));
        out
    }

    /// Multi-source best-path-product search (§4.6). Seeds are excluded from
    /// the result. When a node is reachable by multiple paths, the path with
    /// the highest product of edge weights wins; ties break by shorter
    /// depth, then lexicographically smaller `via`. Edge weights are all
    /// `≤ 1`, so the running product never increases along a path — the
    /// first time a node is popped off the max-heap its best product is
    /// final, the same monotonicity Dijkstra relies on for non-negative
    /// additive weights.
    pub fn expand(&self, seed_ids: &[String], min_weight: f32, max_depth: u32) -> Vec<ExpandedNode> {
        let seeds: std::collections::HashSet<&str> = seed_ids.iter().map(|s| s.as_str()).collect();
        let mut heap: BinaryHeap<HeapItem> = BinaryHeap::new();

        for seed in seed_ids {
            let Some(&seed_idx) = self.node_index.get(seed) else { continue };
            for neighbor_idx in self.graph.neighbors(seed_idx) {
                let neighbor_id = &self.graph[neighbor_idx];
                if seeds.contains(neighbor_id.as_str()) {
                    continue;
                }
                let Some(edge_idx) = self.graph.find_edge(seed_idx, neighbor_idx) else { continue };
                let weight = self.graph[edge_idx];
                if weight < min_weight {
                    continue;
                }
                heap.push(HeapItem { product: weight, depth: 1, via: seed.clone(), node: neighbor_idx });
            }
        }

        let mut finalized: HashMap<NodeIndex, (f32, u32, String)> = HashMap::new();
        let mut order: Vec<NodeIndex> = Vec::new();

        while let Some(item) = heap.pop() {
            if finalized.contains_key(&item.node) {
                continue;
            }
            finalized.insert(item.node, (item.product, item.depth, item.via.clone()));
            order.push(item.node);

            if item.depth >= max_depth {
                continue;
            }
            let node_id = self.graph[item.node].clone();
            for neighbor_idx in self.graph.neighbors(item.node) {
                if finalized.contains_key(&neighbor_idx) {
                    continue;
                }
                let neighbor_id = &self.graph[neighbor_idx];
                if seeds.contains(neighbor_id.as_str()) {
                    continue;
                }
                let Some(edge_idx) = self.graph.find_edge(item.node, neighbor_idx) else { continue };
                let weight = self.graph[edge_idx];
                let product = item.product * weight;
                if product < min_weight {
                    continue;
                }
                heap.push(HeapItem { product, depth: item.depth + 1, via: node_id.clone(), node: neighbor_idx });
            }
        }

        order
            .into_iter()
            .map(|idx| {
                let (product, depth, via) = finalized.remove(&idx).expect("finalized entry present");
                ExpandedNode { id: self.graph[idx].clone(), via, weight: product, depth }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct HeapItem {
    product: f32,
    depth: u32,
    via: String,
    node: NodeIndex,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.product == other.product && self.depth == other.depth && self.via == other.via
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    /// Max-heap on product; ties favor shorter depth, then lexicographically
    /// smaller `via` (reversed here since `BinaryHeap` pops the greatest).
    fn cmp(&self, other: &Self) -> Ordering {
        self.product
            .partial_cmp(&other.product)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.via.cmp(&self.via))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn edges(pairs: &[(&str, &str, f32)]) -> Vec<Edge> {
        pairs.iter().map(|(a, b, w)| Edge::new(a, b, *w)).collect()
    }

    #[test]
    fn expand_excludes_seeds_and_low_weight_direct_edge() {
        let dir = tempdir().unwrap();
        let mut store = GraphStore::open(&dir.path().join("graph.bin")).unwrap();
        store
            .replace_all(edges(&[("a", "b", 0.9), ("b", "c", 0.8), ("a", "c", 0.4)]))
            .unwrap();

        let result = store.expand(&["a".to_string()], 0.5, 2);
        let by_id: HashMap<&str, &ExpandedNode> = result.iter().map(|n| (n.id.as_str(), n)).collect();

        assert!(!by_id.contains_key("a"));
        let b = by_id.get("b").unwrap();
        assert_eq!(b.via, "a");
        assert!((b.weight - 0.9).abs() < 1e-6);

        let c = by_id.get("c").unwrap();
        assert_eq!(c.via, "b");
        assert!((c.weight - 0.72).abs() < 1e-6);
    }

    #[test]
    fn expand_respects_max_depth() {
        let dir = tempdir().unwrap();
        let mut store = GraphStore::open(&dir.path().join("graph.bin")).unwrap();
        store.replace_all(edges(&[("a", "b", 0.9), ("b", "c", 0.9)])).unwrap();

        let result = store.expand(&["a".to_string()], 0.1, 1);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "b");
    }

    #[test]
    fn replace_all_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        {
            let mut store = GraphStore::open(&path).unwrap();
            store.replace_all(edges(&[("a", "b", 0.5)])).unwrap();
        }
        let store = GraphStore::open(&path).unwrap();
        let result = store.expand(&["a".to_string()], 0.1, 1);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "b");
    }

    #[test]
    fn edges_among_excludes_nodes_outside_the_set() {
        let dir = tempdir().unwrap();
        let mut store = GraphStore::open(&dir.path().join("graph.bin")).unwrap();
        store.replace_all(edges(&[("a", "b", 0.9), ("b", "c", 0.8), ("a", "c", 0.4)])).unwrap();

        let ids: std::collections::HashSet<&str> = ["a", "b"].into_iter().collect();
        let induced = store.edges_among(&ids);
        assert_eq!(induced.len(), 1);
        assert_eq!((induced[0].a.as_str(), induced[0].b.as_str()), ("a", "b"));
    }

    #[test]
    fn disconnected_seed_yields_empty_expansion() {
        let dir = tempdir().unwrap();
        let mut store = GraphStore::open(&dir.path().join("graph.bin")).unwrap();
        store.replace_all(edges(&[("a", "b", 0.9)])).unwrap();

        let result = store.expand(&["z".to_string()], 0.1, 2);
        assert!(result.is_empty());
    }
}
