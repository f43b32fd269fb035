//! Topology codec: Prüfer sequences and their categorical relaxation
//!
//! A labelled tree on `n` nodes corresponds to exactly one sequence of
//! `n - 2` labels drawn from `0..n`. Generators emit one softmax row per
//! sequence position, so a sample's topology tensor is `(n - 2) x n`.

use std::collections::{BTreeSet, VecDeque};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Serialize, Deserialize};

use super::Tree;
use crate::{CascadeGanError, Result};

/// Conversion between trees and fixed-length categorical codes
pub trait TopologyCodec {
    /// Number of code positions for a tree with `n_nodes` nodes
    fn code_length(&self, n_nodes: usize) -> usize;

    /// Number of categories per code position
    fn alphabet_size(&self, n_nodes: usize) -> usize;

    /// Encode a tree into its code
    fn encode(&self, tree: &Tree) -> Result<Vec<usize>>;

    /// Decode a code back into a tree rooted at node 0
    fn decode(&self, code: &[usize]) -> Result<Tree>;

    /// Relax a code into one-hot rows
    fn one_hot(&self, code: &[usize], n_nodes: usize) -> Result<Array2<f32>> {
        if code.len() != self.code_length(n_nodes) {
            return Err(CascadeGanError::InvalidTree(format!(
                "Code of length {} does not describe a tree with {} nodes",
                code.len(),
                n_nodes
            )));
        }
        let width = self.alphabet_size(n_nodes);
        let mut rows = Array2::zeros((code.len(), width));
        for (position, &label) in code.iter().enumerate() {
            if label >= width {
                return Err(CascadeGanError::InvalidTree(
                    format!(
                        "Label {} at position {} exceeds alphabet of {}",
                        label, position, width
                    )
                ));
            }
            rows[(position, label)] = 1.0;
        }
        Ok(rows)
    }

    /// Harden categorical rows back into a code (row-wise argmax)
    fn harden(&self, rows: ArrayView2<'_, f32>) -> Vec<usize> {
        rows.axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                        if v > best.1 { (i, v) } else { best }
                    })
                    .0
            })
            .collect()
    }
}

/// Prüfer sequence codec
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruferCodec;

impl TopologyCodec for PruferCodec {
    fn code_length(&self, n_nodes: usize) -> usize {
        n_nodes.saturating_sub(2)
    }

    fn alphabet_size(&self, n_nodes: usize) -> usize {
        n_nodes
    }

    fn encode(&self, tree: &Tree) -> Result<Vec<usize>> {
        let n = tree.size();
        if n < 2 {
            return Err(CascadeGanError::InvalidTree(
                "Prüfer codes need at least two nodes".to_string()
            ));
        }

        let neighbours = tree.neighbours();
        let mut degree: Vec<usize> = neighbours.iter().map(Vec::len).collect();
        let mut removed = vec![false; n];
        let mut leaves: BTreeSet<usize> = (0..n).filter(|&i| degree[i] == 1).collect();
        let mut code = Vec::with_capacity(n - 2);

        for _ in 0..n - 2 {
            let leaf = leaves.pop_first().ok_or_else(|| {
                CascadeGanError::InvalidTree("Ran out of leaves while encoding".to_string())
            })?;
            let next = neighbours[leaf]
                .iter()
                .copied()
                .find(|&v| !removed[v])
                .ok_or_else(|| {
                    CascadeGanError::InvalidTree(format!(
                        "Leaf {} has no remaining neighbour",
                        leaf
                    ))
                })?;

            code.push(next);
            removed[leaf] = true;
            degree[next] -= 1;
            if degree[next] == 1 {
                leaves.insert(next);
            }
        }

        Ok(code)
    }

    fn decode(&self, code: &[usize]) -> Result<Tree> {
        let n = code.len() + 2;
        if let Some(&bad) = code.iter().find(|&&label| label >= n) {
            return Err(CascadeGanError::InvalidTree(
                format!("Label {} out of range for {} nodes", bad, n)
            ));
        }

        let mut degree = vec![1usize; n];
        for &label in code {
            degree[label] += 1;
        }
        let mut leaves: BTreeSet<usize> = (0..n).filter(|&i| degree[i] == 1).collect();
        let mut adjacency = vec![Vec::new(); n];

        for &label in code {
            let leaf = leaves.pop_first().ok_or_else(|| {
                CascadeGanError::InvalidTree("Ran out of leaves while decoding".to_string())
            })?;
            adjacency[leaf].push(label);
            adjacency[label].push(leaf);
            degree[label] -= 1;
            if degree[label] == 1 {
                leaves.insert(label);
            }
        }

        match (leaves.pop_first(), leaves.pop_first()) {
            (Some(u), Some(v)) => {
                adjacency[u].push(v);
                adjacency[v].push(u);
            }
            _ => {
                return Err(CascadeGanError::InvalidTree(
                    "Decoding did not leave a final edge".to_string()
                ))
            }
        }

        root_at_zero(&adjacency)
    }
}

/// Orient an undirected tree away from node 0
fn root_at_zero(adjacency: &[Vec<usize>]) -> Result<Tree> {
    let mut parents = vec![None; adjacency.len()];
    let mut visited = vec![false; adjacency.len()];
    let mut queue = VecDeque::new();
    queue.push_back(0);
    visited[0] = true;

    while let Some(node) = queue.pop_front() {
        for &next in &adjacency[node] {
            if !visited[next] {
                visited[next] = true;
                parents[next] = Some(node);
                queue.push_back(next);
            }
        }
    }

    Tree::from_parents(&parents)
}

/// Relabel nodes breadth-first so every parent precedes its children
///
/// `locations` holds one row per non-root node (row `i - 1` for node `i`);
/// the rows are permuted alongside the labels.
pub fn reorder(tree: &Tree, locations: &Array2<f32>) -> Result<(Tree, Array2<f32>)> {
    let n = tree.size();
    if locations.nrows() + 1 != n {
        return Err(CascadeGanError::Configuration(format!(
            "{} location rows for a tree with {} nodes", locations.nrows(), n
        )));
    }

    let order = tree.breadth_first_order();
    let mut new_label = vec![0; n];
    for (position, &old) in order.iter().enumerate() {
        new_label[old] = position;
    }

    let old_parents = tree.parents();
    let mut parents = vec![None; n];
    let mut reordered = Array2::zeros(locations.raw_dim());
    for (position, &old) in order.iter().enumerate().skip(1) {
        parents[position] = old_parents[old].map(|p| new_label[p]);
        reordered.row_mut(position - 1).assign(&locations.row(old - 1));
    }

    Ok((Tree::from_parents(&parents)?, reordered))
}

/// One row of an SWC morphology file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwcRow {
    /// 1-based sample id
    pub id: usize,
    /// Structure type (1 = soma, 2 = neurite)
    pub kind: u8,
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
    /// Z coordinate
    pub z: f32,
    /// Radius
    pub radius: f32,
    /// 1-based parent id, -1 for the soma
    pub parent: i64,
}

/// Convert a tree with per-node locations into SWC rows, soma at the origin
pub fn to_swc(tree: &Tree, locations: &Array2<f32>) -> Result<Vec<SwcRow>> {
    if locations.nrows() + 1 != tree.size() || locations.ncols() != 3 {
        return Err(CascadeGanError::Configuration(format!(
            "Locations of shape {:?} do not fit a tree with {} nodes",
            locations.dim(), tree.size()
        )));
    }

    let parents = tree.parents();
    let mut rows = Vec::with_capacity(tree.size());
    rows.push(SwcRow { id: 1, kind: 1, x: 0.0, y: 0.0, z: 0.0, radius: 0.0, parent: -1 });

    for node in 1..tree.size() {
        let location = locations.row(node - 1);
        rows.push(SwcRow {
            id: node + 1,
            kind: 2,
            x: location[0],
            y: location[1],
            z: location[2],
            radius: 0.0,
            parent: parents[node].map(|p| p as i64 + 1).unwrap_or(-1),
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeBuilder;
    use crate::utils::random_tree;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_known_sequence() {
        // Star around node 0 plus a tail: 0-1, 0-2, 0-3, 3-4
        let mut builder = TreeBuilder::new();
        builder.add_child(0, 1)
            .add_child(0, 2)
            .add_child(0, 3)
            .add_child(3, 4);
        let tree = builder.build().unwrap();

        let code = PruferCodec.encode(&tree).unwrap();
        assert_eq!(code, vec![0, 0, 3]);
        assert_eq!(PruferCodec.decode(&code).unwrap(), tree);
    }

    #[test]
    fn test_round_trip_random_trees() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        for size in 2..=12 {
            let tree = random_tree(size, &mut rng).unwrap();
            let code = PruferCodec.encode(&tree).unwrap();
            assert_eq!(code.len(), size - 2);

            let decoded = PruferCodec.decode(&code).unwrap();
            assert_eq!(decoded.parents(), tree.parents());
        }
    }

    #[test]
    fn test_every_sequence_decodes() {
        let decoded = PruferCodec.decode(&[4, 4, 4]).unwrap();
        assert_eq!(decoded.size(), 5);
        assert!(PruferCodec.decode(&[5, 0, 0]).is_err());
    }

    #[test]
    fn test_one_hot_and_harden() {
        let rows = PruferCodec.one_hot(&[2, 0, 3], 5).unwrap();
        assert_eq!(rows.dim(), (3, 5));
        assert_eq!(rows.sum(), 3.0);
        assert_eq!(PruferCodec.harden(rows.view()), vec![2, 0, 3]);
        // Label outside the alphabet, then a code of the wrong length
        assert!(PruferCodec.one_hot(&[2, 7, 3], 5).is_err());
        assert!(PruferCodec.one_hot(&[2, 0], 5).is_err());
    }

    #[test]
    fn test_reorder_puts_parents_first() {
        let parents = vec![None, Some(3), Some(0), Some(0)];
        let tree = Tree::from_parents(&parents).unwrap();
        let locations = array![[1.0, 1.0, 1.0], [2.0, 2.0, 2.0], [3.0, 3.0, 3.0]];

        let (reordered, moved) = reorder(&tree, &locations).unwrap();
        let new_parents = reordered.parents();
        for (node, parent) in new_parents.iter().enumerate().skip(1) {
            assert!(parent.unwrap() < node);
        }
        // Old node 2 becomes node 1, old node 3 node 2, old node 1 node 3
        assert_eq!(moved.row(0), locations.row(1));
        assert_eq!(moved.row(1), locations.row(2));
        assert_eq!(moved.row(2), locations.row(0));
    }

    #[test]
    fn test_swc_rows() {
        let tree = Tree::from_parents(&[None, Some(0), Some(1)]).unwrap();
        let locations = array![[0.5, 0.0, 0.0], [1.0, 0.5, 0.0]];
        let rows = to_swc(&tree, &locations).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].parent, -1);
        assert_eq!(rows[0].kind, 1);
        assert_eq!(rows[2].parent, 2);
        assert_eq!(rows[2].x, 1.0);
    }
}
