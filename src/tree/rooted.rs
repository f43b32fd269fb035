//! Rooted tree data structure and operations

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

use crate::{CascadeGanError, Result};

/// A rooted tree represented as an adjacency list
///
/// - Node 0 is always the root (the soma of a neuron)
/// - Each node stores indices of its children
/// - Every other node has exactly one parent
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tree {
    /// Number of nodes in the tree
    n_nodes: usize,
    /// Adjacency list: children[i] contains indices of node i's children
    children: Vec<Vec<usize>>,
}

impl Tree {
    /// Create a tree with specified structure
    pub fn from_adjacency(children: Vec<Vec<usize>>) -> Result<Self> {
        let n_nodes = children.len();
        if n_nodes == 0 {
            return Err(CascadeGanError::InvalidTree("Tree must have a root".to_string()));
        }

        let mut has_parent = vec![false; n_nodes];
        for (parent, child_list) in children.iter().enumerate() {
            for &child in child_list {
                if child >= n_nodes {
                    return Err(CascadeGanError::InvalidTree(
                        format!("Child index {} out of bounds", child)
                    ));
                }
                if child == parent || child == 0 {
                    return Err(CascadeGanError::InvalidTree(
                        format!("Node {} cannot be a child of {}", child, parent)
                    ));
                }
                if has_parent[child] {
                    return Err(CascadeGanError::InvalidTree(
                        format!("Node {} has more than one parent", child)
                    ));
                }
                has_parent[child] = true;
            }
        }

        // Check connectivity (BFS from root)
        let mut visited = vec![false; n_nodes];
        let mut queue = VecDeque::new();
        queue.push_back(0);
        visited[0] = true;

        while let Some(node) = queue.pop_front() {
            for &child in &children[node] {
                if !visited[child] {
                    visited[child] = true;
                    queue.push_back(child);
                }
            }
        }

        if visited.iter().any(|&v| !v) {
            return Err(CascadeGanError::InvalidTree(
                "Tree is not connected".to_string()
            ));
        }

        Ok(Tree { n_nodes, children })
    }

    /// Create a tree from a parent array (`None` marks the root, which must be node 0)
    pub fn from_parents(parents: &[Option<usize>]) -> Result<Self> {
        if parents.first() != Some(&None) {
            return Err(CascadeGanError::InvalidTree(
                "Node 0 must be the root".to_string()
            ));
        }

        let mut children = vec![Vec::new(); parents.len()];
        for (node, parent) in parents.iter().enumerate().skip(1) {
            match parent {
                Some(p) if *p < parents.len() => children[*p].push(node),
                Some(p) => {
                    return Err(CascadeGanError::InvalidTree(
                        format!("Parent {} of node {} out of bounds", p, node)
                    ))
                }
                None => {
                    return Err(CascadeGanError::InvalidTree(
                        format!("Node {} has no parent", node)
                    ))
                }
            }
        }

        Self::from_adjacency(children)
    }

    /// Get the number of nodes
    pub fn size(&self) -> usize {
        self.n_nodes
    }

    /// Get children of a node
    pub fn children(&self, node: usize) -> &[usize] {
        &self.children[node]
    }

    /// Parent array, `None` for the root
    pub fn parents(&self) -> Vec<Option<usize>> {
        let mut parents = vec![None; self.n_nodes];
        for (parent, children) in self.children.iter().enumerate() {
            for &child in children {
                parents[child] = Some(parent);
            }
        }
        parents
    }

    /// Find parent of a node (None for root)
    pub fn parent(&self, node: usize) -> Option<usize> {
        if node == 0 {
            return None;
        }

        self.children
            .iter()
            .position(|children| children.contains(&node))
    }

    /// Undirected neighbours of every node
    pub fn neighbours(&self) -> Vec<Vec<usize>> {
        let mut neighbours = self.children.clone();
        for (parent, children) in self.children.iter().enumerate() {
            for &child in children {
                neighbours[child].push(parent);
            }
        }
        neighbours
    }

    /// Compute depth of each node
    pub fn depths(&self) -> Vec<usize> {
        let mut depths = vec![0; self.n_nodes];
        let mut queue = VecDeque::new();
        queue.push_back((0, 0));

        while let Some((node, depth)) = queue.pop_front() {
            depths[node] = depth;
            for &child in &self.children[node] {
                queue.push_back((child, depth + 1));
            }
        }

        depths
    }

    /// Nodes in breadth-first order from the root, children in ascending label order
    pub fn breadth_first_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.n_nodes);
        let mut queue = VecDeque::new();
        queue.push_back(0);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            let mut children = self.children[node].clone();
            children.sort_unstable();
            queue.extend(children);
        }

        order
    }

    /// Maximum depth of the tree
    pub fn max_depth(&self) -> usize {
        self.depths().into_iter().max().unwrap_or(0)
    }

    /// Count of leaf nodes
    pub fn leaf_count(&self) -> usize {
        (0..self.size())
            .filter(|&i| self.children(i).is_empty())
            .count()
    }

    /// Count of branch points (nodes with two or more children)
    pub fn branch_count(&self) -> usize {
        (0..self.size())
            .filter(|&i| self.children(i).len() >= 2)
            .count()
    }
}

/// Builder for constructing trees incrementally
pub struct TreeBuilder {
    children: Vec<Vec<usize>>,
}

impl TreeBuilder {
    /// Create a new builder starting with a root
    pub fn new() -> Self {
        TreeBuilder {
            children: vec![Vec::new()],
        }
    }

    /// Add a child to a parent node
    pub fn add_child(&mut self, parent: usize, child: usize) -> &mut Self {
        while self.children.len() <= child.max(parent) {
            self.children.push(Vec::new());
        }

        self.children[parent].push(child);
        self
    }

    /// Build the tree
    pub fn build(self) -> Result<Tree> {
        Tree::from_adjacency(self.children)
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node() {
        let tree = TreeBuilder::new().build().unwrap();
        assert_eq!(tree.size(), 1);
        let empty: &[usize] = &[];
        assert_eq!(tree.children(0), empty);
        assert_eq!(tree.parents(), vec![None]);
    }

    #[test]
    fn test_tree_builder() {
        let mut builder = TreeBuilder::new();
        builder.add_child(0, 1)
            .add_child(0, 2)
            .add_child(1, 3);
        let tree = builder.build().unwrap();

        assert_eq!(tree.size(), 4);
        assert_eq!(tree.children(0), &[1usize, 2]);
        assert_eq!(tree.children(1), &[3usize]);
        assert_eq!(tree.parent(3), Some(1));
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.branch_count(), 1);
        assert_eq!(tree.max_depth(), 2);
    }

    #[test]
    fn test_parents_round_trip() {
        let parents = vec![None, Some(0), Some(0), Some(2), Some(2)];
        let tree = Tree::from_parents(&parents).unwrap();
        assert_eq!(tree.parents(), parents);
        assert_eq!(tree.depths(), vec![0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_rejects_invalid_structures() {
        // Two parents for node 2
        assert!(Tree::from_adjacency(vec![vec![1, 2], vec![2], vec![]]).is_err());
        // Disconnected node
        assert!(Tree::from_adjacency(vec![vec![1], vec![], vec![]]).is_err());
        // Root must not have a parent
        assert!(Tree::from_parents(&[Some(1), None]).is_err());
    }

    #[test]
    fn test_breadth_first_order() {
        let mut builder = TreeBuilder::new();
        builder.add_child(0, 3)
            .add_child(3, 1)
            .add_child(0, 2);
        let tree = builder.build().unwrap();
        assert_eq!(tree.breadth_first_order(), vec![0, 2, 3, 1]);
    }
}
