use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::alphabet::Alphabet;

pub type NodeId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Normal,
    Scripting,
    End,
    Error,
}

impl NodeType {
    pub fn is_match(&self) -> bool {
        matches!(self, NodeType::End)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node<T> {
    pub next: BTreeMap<T, Option<NodeId>>,
    pub node_type: NodeType,
}

impl<T: Alphabet> Node<T> {
    fn new() -> Self {
        Node {
            next: BTreeMap::new(),
            node_type: NodeType::Normal,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Graph<T> {
    nodes: Vec<Node<T>>,
}

impl<T: Alphabet> Graph<T> {
    pub fn new() -> Self {
        Graph { nodes: Vec::new() }
    }

    pub fn create_node(&mut self) -> NodeId {
        self.nodes.push(Node::new());
        self.nodes.len() - 1
    }

    pub fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn reachable_from(&self, entry: NodeId) -> Vec<NodeId> {
        let mut order = vec![entry];
        let mut seen = BTreeSet::from([entry]);
        let mut queue = VecDeque::from([entry]);
        while let Some(cur) = queue.pop_front() {
            for target in self.nodes[cur].next.values().copied().flatten() {
                if seen.insert(target) {
                    order.push(target);
                    queue.push_back(target);
                }
            }
        }
        order
    }

    pub fn has_epsilons(&self, entry: NodeId) -> bool {
        self.reachable_from(entry)
            .into_iter()
            .any(|id| self.nodes[id].next.keys().any(|k| k.is_epsilon()))
    }

    // Stops at a missing edge, a dangling edge, or a cycle.
    pub(crate) fn epsilon_chain_end(&self, start: NodeId) -> NodeId {
        let mut seen = BTreeSet::from([start]);
        let mut cur = start;
        while let Some(Some(next)) = self.nodes[cur].next.get(&T::epsilon()).copied() {
            if !seen.insert(next) {
                break;
            }
            cur = next;
        }
        cur
    }

    pub fn purge(&mut self, entry: NodeId) -> BTreeMap<NodeId, NodeId> {
        let keep = self.reachable_from(entry);
        let remap: BTreeMap<NodeId, NodeId> = keep
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new))
            .collect();
        let mut nodes = Vec::with_capacity(keep.len());
        for &old in &keep {
            let mut node = self.nodes[old].clone();
            for target in node.next.values_mut() {
                *target = target.map(|t| remap[&t]);
            }
            nodes.push(node);
        }
        self.nodes = nodes;
        remap
    }
}

impl<T: Alphabet> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}
