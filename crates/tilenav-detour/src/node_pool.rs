//! Node pool and open list for polygon searches

use std::collections::HashMap;

use glam::Vec3;

use crate::PolyRef;

/// Node flags for search state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    pub const CLOSED: NodeFlags = NodeFlags(0x02);

    pub fn contains(&self, flag: NodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: NodeFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: NodeFlags) {
        self.0 &= !flag.0;
    }
}

/// Node index type
pub type NodeIndex = u16;

/// Null node index constant
pub const DT_NULL_IDX: NodeIndex = NodeIndex::MAX;

/// Search node, one per visited polygon
#[derive(Debug, Clone)]
pub struct Node {
    /// Point where the search enters the polygon
    pub pos: Vec3,
    /// Cost from the start to `pos`
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    /// Index of the parent node
    pub pidx: NodeIndex,
    pub flags: NodeFlags,
    pub id: PolyRef,
}

/// Bounded store of search nodes keyed by polygon
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
    lookup: HashMap<PolyRef, NodeIndex>,
    max_nodes: usize,
}

impl NodePool {
    /// Creates a pool holding at most `max_nodes` nodes
    pub fn new(max_nodes: usize) -> Self {
        let max_nodes = max_nodes.min(DT_NULL_IDX as usize);
        Self {
            nodes: Vec::with_capacity(max_nodes.min(1024)),
            lookup: HashMap::new(),
            max_nodes,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.clear();
    }

    /// Returns the node for `id`, allocating it when needed.
    ///
    /// `None` once the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef) -> Option<NodeIndex> {
        if let Some(&idx) = self.lookup.get(&id) {
            return Some(idx);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }
        let idx = self.nodes.len() as NodeIndex;
        self.nodes.push(Node {
            pos: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            pidx: DT_NULL_IDX,
            flags: NodeFlags::default(),
            id,
        });
        self.lookup.insert(id, idx);
        Some(idx)
    }

    pub fn find_node(&self, id: PolyRef) -> Option<NodeIndex> {
        self.lookup.get(&id).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx as usize]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Min-heap of node indices ordered by total cost
#[derive(Debug, Default)]
pub struct NodeQueue {
    heap: Vec<(f32, NodeIndex)>,
}

impl NodeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pops the node with the lowest total cost
    pub fn pop(&mut self) -> Option<NodeIndex> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.trickle_down(0);
        }
        Some(top.1)
    }

    pub fn push(&mut self, idx: NodeIndex, total: f32) {
        self.heap.push((total, idx));
        self.bubble_up(self.heap.len() - 1);
    }

    /// Moves an already queued node after its total decreased
    pub fn modify(&mut self, idx: NodeIndex, total: f32) {
        if let Some(i) = self.heap.iter().position(|&(_, n)| n == idx) {
            self.heap[i].0 = total;
            self.bubble_up(i);
        }
    }

    /// Ties are broken by node index so the search order is reproducible
    fn less(a: (f32, NodeIndex), b: (f32, NodeIndex)) -> bool {
        a.0 < b.0 || (a.0 == b.0 && a.1 < b.1)
    }

    fn bubble_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !Self::less(self.heap[i], self.heap[parent]) {
                break;
            }
            self.heap.swap(i, parent);
            i = parent;
        }
    }

    fn trickle_down(&mut self, mut i: usize) {
        let size = self.heap.len();
        loop {
            let child1 = 2 * i + 1;
            if child1 >= size {
                break;
            }
            let child2 = child1 + 1;
            let min_child = if child2 < size && Self::less(self.heap[child2], self.heap[child1]) {
                child2
            } else {
                child1
            };
            if !Self::less(self.heap[min_child], self.heap[i]) {
                break;
            }
            self.heap.swap(i, min_child);
            i = min_child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_pool() {
        let mut pool = NodePool::new(2);
        let a = pool.get_node(PolyRef::new(1)).unwrap();
        assert_eq!(pool.get_node(PolyRef::new(1)), Some(a));
        assert_eq!(pool.find_node(PolyRef::new(1)), Some(a));
        assert_eq!(pool.node(a).id, PolyRef::new(1));

        pool.get_node(PolyRef::new(2)).unwrap();
        assert_eq!(pool.get_node(PolyRef::new(3)), None);
        assert_eq!(pool.node_count(), 2);

        pool.clear();
        assert_eq!(pool.find_node(PolyRef::new(1)), None);
    }

    #[test]
    fn test_node_queue() {
        let mut queue = NodeQueue::new();
        queue.push(0, 5.0);
        queue.push(1, 3.0);
        queue.push(2, 7.0);
        queue.push(3, 3.0);
        queue.modify(2, 1.0);

        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(0));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flags() {
        let mut flags = NodeFlags::default();
        flags.insert(NodeFlags::OPEN);
        assert!(flags.contains(NodeFlags::OPEN));
        flags.remove(NodeFlags::OPEN);
        flags.insert(NodeFlags::CLOSED);
        assert!(!flags.contains(NodeFlags::OPEN));
        assert!(flags.contains(NodeFlags::CLOSED));
    }
}
