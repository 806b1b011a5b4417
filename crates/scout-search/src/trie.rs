//! Arena-backed character trie

use serde::{Deserialize, Serialize};

/// Index of a node inside the trie arena
pub type NodeIdx = usize;

/// A single trie node
///
/// `ids` holds every datum id whose token passes through this node, so it may
/// contain the same id more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNode {
    pub ids: Vec<usize>,

    /// Children sorted by character
    pub children: Vec<(char, NodeIdx)>,
}

impl TrieNode {
    fn child(&self, ch: char) -> Option<NodeIdx> {
        self.children
            .binary_search_by_key(&ch, |&(c, _)| c)
            .ok()
            .map(|pos| self.children[pos].1)
    }
}

/// Character trie keyed by token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trie {
    nodes: Vec<TrieNode>,
}

impl Trie {
    /// The empty-prefix node
    pub const ROOT: NodeIdx = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }

    /// Record `id` on every node along `token`'s path, creating nodes as needed
    pub fn insert(&mut self, token: &str, id: usize) {
        let mut node = Self::ROOT;
        for ch in token.chars() {
            node = self.child_or_insert(node, ch);
            self.nodes[node].ids.push(id);
        }
    }

    /// Ids recorded at the node reached by consuming all of `prefix`
    ///
    /// Returns `None` when the path runs out before the prefix does.
    pub fn lookup(&self, prefix: &str) -> Option<&[usize]> {
        let mut node = self.nodes.get(Self::ROOT)?;
        for ch in prefix.chars() {
            node = self.nodes.get(node.child(ch)?)?;
        }
        Some(&node.ids)
    }

    /// Number of nodes, root included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[TrieNode] {
        &self.nodes
    }

    /// Check that every child pointer lands inside the arena and every id is below `datum_count`
    pub fn validate(&self, datum_count: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("trie has no root node".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let dangling = node.children.iter().find(|&&(_, child)| child >= self.nodes.len());
            if let Some(&(ch, child)) = dangling {
                return Err(format!("node {} points to missing child {} via {:?}", idx, child, ch));
            }
            if !node.children.windows(2).all(|pair| pair[0].0 < pair[1].0) {
                return Err(format!("node {} has unsorted children", idx));
            }
            if let Some(id) = node.ids.iter().find(|&&id| id >= datum_count) {
                return Err(format!("node {} references unknown datum {}", idx, id));
            }
        }
        Ok(())
    }

    fn child_or_insert(&mut self, node: NodeIdx, ch: char) -> NodeIdx {
        match self.nodes[node].children.binary_search_by_key(&ch, |&(c, _)| c) {
            Ok(pos) => self.nodes[node].children[pos].1,
            Err(pos) => {
                let child = self.nodes.len();
                self.nodes.push(TrieNode::default());
                self.nodes[node].children.insert(pos, (ch, child));
                child
            }
        }
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}
