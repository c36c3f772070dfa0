use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::alphabet::Alphabet;
use crate::graph::{Graph, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub entry: NodeId,
}

impl Fragment {
    pub fn new(entry: NodeId) -> Self {
        Fragment { entry }
    }

    pub fn knit_onto_end<T: Alphabet>(&self, graph: &mut Graph<T>, other: &Fragment) {
        // Seeding the visited set with the other entry stops the walk at
        // the boundary; a self knit turns dangles into loops.
        let mut visited = BTreeSet::from([other.entry, self.entry]);
        let mut stack = vec![self.entry];
        while let Some(cur) = stack.pop() {
            let keys: Vec<T> = graph.node(cur).next.keys().cloned().collect();
            for k in keys {
                match graph.node(cur).next.get(&k).copied() {
                    Some(None) => {
                        graph.node_mut(cur).next.insert(k, Some(other.entry));
                    }
                    Some(Some(target)) => {
                        if visited.insert(target) {
                            stack.push(target);
                        }
                    }
                    None => {}
                }
            }
        }
    }

    pub fn add_as_alternative<T: Alphabet>(&self, graph: &mut Graph<T>, other: &Fragment) {
        let mut seen: BTreeSet<(NodeId, NodeId)> = BTreeSet::new();
        let mut work = vec![(self.entry, other.entry)];
        while let Some((m, o)) = work.pop() {
            if !seen.insert((m, o)) {
                continue;
            }
            let edges: Vec<(T, Option<NodeId>)> = graph
                .node(o)
                .next
                .iter()
                .map(|(k, t)| (k.clone(), *t))
                .collect();
            for (k, o_next) in edges {
                let m_next = match graph.node(m).next.get(&k).copied() {
                    None => {
                        graph.node_mut(m).next.insert(k, o_next);
                        continue;
                    }
                    Some(m_next) => m_next,
                };
                match (m_next, o_next) {
                    (None, None) => {}
                    (Some(mn), Some(on)) => {
                        if mn != on {
                            work.push((mn, on));
                        }
                    }
                    (Some(live), None) | (None, Some(live)) => {
                        // Keep the live successor; a dangling epsilon at its
                        // chain end lets the merged branch also finish here.
                        graph.node_mut(m).next.insert(k, Some(live));
                        let terminus = graph.epsilon_chain_end(live);
                        if !graph.node(terminus).next.contains_key(&T::epsilon()) {
                            graph.node_mut(terminus).next.insert(T::epsilon(), None);
                        }
                    }
                }
            }
        }
    }

    pub fn duplicate<T: Alphabet>(&self, graph: &mut Graph<T>) -> Fragment {
        let mut clones: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut queue = VecDeque::from([self.entry]);
        while let Some(cur) = queue.pop_front() {
            if clones.contains_key(&cur) {
                continue;
            }
            let node_type = graph.node(cur).node_type;
            let clone = graph.create_node();
            graph.node_mut(clone).node_type = node_type;
            clones.insert(cur, clone);
            let targets: Vec<NodeId> = graph.node(cur).next.values().copied().flatten().collect();
            queue.extend(targets);
        }
        for (&old, &new) in &clones {
            let edges: Vec<(T, Option<NodeId>)> = graph
                .node(old)
                .next
                .iter()
                .map(|(k, t)| (k.clone(), *t))
                .collect();
            for (k, target) in edges {
                let target = target.map(|t| clones[&t]);
                graph.node_mut(new).next.insert(k, target);
            }
        }
        Fragment::new(clones[&self.entry])
    }
}
