use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};

use thiserror::Error;

use crate::alphabet::Alphabet;
use crate::fragment::Fragment;
use crate::graph::{Graph, Node, NodeId, NodeType};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileError {
    #[error("unmatched subexpression open at token {0}")]
    UnmatchedOpen(usize),
    #[error("unmatched subexpression close at token {0}")]
    UnmatchedClose(usize),
    #[error("escape at end of pattern (token {0})")]
    TrailingEscape(usize),
    #[error("quantifier at token {0} has nothing to apply to")]
    StrayQuantifier(usize),
}

#[derive(Clone, Debug)]
pub struct Machine<T: Alphabet> {
    graph: Graph<T>,
    entry: Option<NodeId>,
    current: Option<NodeId>,
    memory: Vec<T>,
    variables: BTreeMap<T, Vec<T>>,
}

impl<T: Alphabet> Machine<T> {
    pub fn new() -> Self {
        Machine {
            graph: Graph::new(),
            entry: None,
            current: None,
            memory: Vec::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn compile(&mut self, pattern: &[T]) -> Result<(), CompileError> {
        self.entry = None;
        self.current = None;

        let mut graph = Graph::new();
        let compiled = compile_range(&mut graph, pattern, 0, pattern.len())?;

        let accept = graph.create_node();
        graph.node_mut(accept).node_type = NodeType::End;
        compiled.knit_onto_end(&mut graph, &Fragment::new(accept));

        remove_epsilons(&mut graph, compiled.entry);
        let remap = graph.purge(compiled.entry);

        self.graph = graph;
        self.entry = Some(remap[&compiled.entry]);
        self.current = self.entry;
        self.memory.clear();
        self.variables.clear();
        Ok(())
    }

    pub fn step(&mut self, input: &T, allow_epsilons: bool) {
        let Some(cur) = self.current else {
            return;
        };
        let node = self.graph.node(cur);
        if let Some(next) = node.next.get(input).copied() {
            self.current = next;
        } else if let Some(next) = node.next.get(&T::wildcard()).copied() {
            self.current = next;
        } else if allow_epsilons {
            match node.next.get(&T::epsilon()).copied() {
                Some(next) => self.current = next,
                None => self.current = None,
            }
        } else {
            self.current = None;
        }
    }

    pub fn run(&mut self, input: &[T], allow_epsilons: bool) -> NodeType {
        for token in input {
            self.step(token, allow_epsilons);
        }
        self.get_state()
    }

    pub fn is_match(&mut self, input: &[T]) -> bool {
        self.reset();
        self.run(input, false).is_match()
    }

    pub fn get_state(&self) -> NodeType {
        match self.current {
            Some(id) => self.graph.node(id).node_type,
            None => NodeType::Error,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.entry;
        self.memory.clear();
        self.variables.clear();
    }

    pub fn get_variable(&self, name: &T) -> &[T] {
        self.variables.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_memory(&self) -> &[T] {
        &self.memory
    }

    pub fn get_entry(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn get_node(&self, id: NodeId) -> &Node<T> {
        self.graph.node(id)
    }

    pub fn get_all_reachable_nodes(&self) -> Vec<NodeId> {
        match self.entry {
            Some(entry) => self.graph.reachable_from(entry),
            None => Vec::new(),
        }
    }

    pub fn has_epsilons(&self) -> bool {
        match self.entry {
            Some(entry) => self.graph.has_epsilons(entry),
            None => false,
        }
    }

    pub fn purge(&mut self) {
        if let Some(entry) = self.entry {
            let remap = self.graph.purge(entry);
            self.entry = Some(remap[&entry]);
            self.current = self.current.and_then(|c| remap.get(&c).copied());
        }
    }
}

impl<T: Alphabet> Default for Machine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine<char> {
    pub fn from_pattern(pattern: &str) -> Result<Self, CompileError> {
        let tokens: Vec<char> = pattern.chars().collect();
        let mut machine = Machine::new();
        machine.compile(&tokens)?;
        Ok(machine)
    }
}

impl<T: Alphabet + fmt::Display> Machine<T> {
    pub fn graphviz<W: Write>(&self, out: &mut W, title: &str) -> io::Result<()> {
        writeln!(out, "digraph machine {{")?;
        writeln!(out, "\tlabelloc=\"t\";")?;
        writeln!(out, "\tlabel=\"{}\";", title)?;
        writeln!(out, "\trankdir=LR;")?;
        writeln!(out, "\tnode [shape=circle];")?;

        let nodes = self.get_all_reachable_nodes();
        for (i, &id) in nodes.iter().enumerate() {
            let node = self.graph.node(id);
            let label = if Some(id) == self.entry {
                if node.node_type == NodeType::End {
                    "BegEnd"
                } else {
                    "Beg"
                }
            } else if node.node_type == NodeType::End {
                "End"
            } else {
                ""
            };
            writeln!(out, "\tq{} [label=\"{}\"];", i, label)?;
        }

        let index: BTreeMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        for &id in &nodes {
            for (token, target) in &self.graph.node(id).next {
                let Some(target) = target else {
                    continue;
                };
                if token.is_epsilon() {
                    writeln!(
                        out,
                        "\tq{} -> q{} [label=<&epsilon;>];",
                        index[&id], index[target]
                    )?;
                } else {
                    writeln!(
                        out,
                        "\tq{} -> q{} [label=\"{}\"];",
                        index[&id], index[target], token
                    )?;
                }
            }
        }
        writeln!(out, "}}")
    }
}

fn compile_range<T: Alphabet>(
    graph: &mut Graph<T>,
    pattern: &[T],
    begin: usize,
    end: usize,
) -> Result<Fragment, CompileError> {
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut i = begin;
    while i < end {
        let token = &pattern[i];
        if token.is_escape() {
            if i + 1 >= end {
                return Err(CompileError::TrailingEscape(i));
            }
            let node = graph.create_node();
            graph.node_mut(node).next.insert(pattern[i + 1].clone(), None);
            fragments.push(Fragment::new(node));
            i += 2;
        } else if token.is_subexpr_open() {
            // Scan for the matching close, splitting on depth-1 alternations.
            let open_at = i;
            let mut depth = 1usize;
            let mut bounds = vec![i];
            let mut j = i + 1;
            loop {
                if j >= end {
                    return Err(CompileError::UnmatchedOpen(open_at));
                }
                let t = &pattern[j];
                if t.is_subexpr_open() {
                    depth += 1;
                } else if t.is_alternation() {
                    if depth == 1 {
                        bounds.push(j);
                    }
                } else if t.is_subexpr_close() {
                    depth -= 1;
                    if depth == 0 {
                        bounds.push(j);
                        break;
                    }
                }
                j += 1;
            }

            let mut arms = Vec::new();
            for pair in bounds.windows(2) {
                arms.push(compile_range(graph, pattern, pair[0] + 1, pair[1])?);
            }
            let merged = arms[0];
            for arm in &arms[1..] {
                merged.add_as_alternative(graph, arm);
            }
            fragments.push(merged);
            i = j + 1;
        } else if token.is_subexpr_close() {
            return Err(CompileError::UnmatchedClose(i));
        } else if token.is_wildcard() {
            let node = graph.create_node();
            graph.node_mut(node).next.insert(T::wildcard(), None);
            fragments.push(Fragment::new(node));
            i += 1;
        } else if token.is_optional() {
            let last = fragments
                .last()
                .copied()
                .ok_or(CompileError::StrayQuantifier(i))?;
            graph.node_mut(last.entry).next.insert(T::epsilon(), None);
            i += 1;
        } else if token.is_star() {
            let last = fragments
                .last()
                .copied()
                .ok_or(CompileError::StrayQuantifier(i))?;
            last.knit_onto_end(graph, &last);
            graph.node_mut(last.entry).next.insert(T::epsilon(), None);
            i += 1;
        } else if token.is_plus() {
            // One occurrence, then a loop of the duplicate.
            let last = fragments
                .last()
                .copied()
                .ok_or(CompileError::StrayQuantifier(i))?;
            let dup = last.duplicate(graph);
            dup.knit_onto_end(graph, &dup);
            graph.node_mut(dup.entry).next.insert(T::epsilon(), None);
            fragments.push(dup);
            i += 1;
        } else {
            let node = graph.create_node();
            graph.node_mut(node).next.insert(token.clone(), None);
            fragments.push(Fragment::new(node));
            i += 1;
        }
    }

    if fragments.is_empty() {
        let node = graph.create_node();
        graph.node_mut(node).next.insert(T::epsilon(), None);
        return Ok(Fragment::new(node));
    }
    let first = fragments[0];
    for next in &fragments[1..] {
        first.knit_onto_end(graph, next);
    }
    Ok(first)
}

// Merges during a close can introduce fresh epsilon edges elsewhere, so
// the pass repeats until none remain.
fn remove_epsilons<T: Alphabet>(graph: &mut Graph<T>, entry: NodeId) {
    loop {
        for id in graph.reachable_from(entry) {
            close_node(graph, id);
        }
        if !graph.has_epsilons(entry) {
            return;
        }
    }
}

// Only the closed node's own epsilon edge is removed; other chain members
// keep theirs until closed in turn, so visiting order does not matter.
fn close_node<T: Alphabet>(graph: &mut Graph<T>, v: NodeId) {
    if !graph.node(v).next.contains_key(&T::epsilon()) {
        return;
    }

    let mut chain = Vec::new();
    let mut seen = BTreeSet::from([v]);
    let mut cur = v;
    while let Some(Some(next)) = graph.node(cur).next.get(&T::epsilon()).copied() {
        if !seen.insert(next) {
            break;
        }
        chain.push(next);
        cur = next;
    }

    if graph.node(v).node_type == NodeType::Normal {
        let mut promoted = NodeType::Normal;
        for &u in &chain {
            let node_type = graph.node(u).node_type;
            if node_type == NodeType::End {
                promoted = NodeType::End;
                break;
            }
            if node_type != NodeType::Normal && promoted == NodeType::Normal {
                promoted = node_type;
            }
        }
        graph.node_mut(v).node_type = promoted;
    }

    for &u in &chain {
        let edges: Vec<(T, NodeId)> = graph
            .node(u)
            .next
            .iter()
            .filter(|(k, _)| !k.is_epsilon())
            .filter_map(|(k, t)| t.map(|t| (k.clone(), t)))
            .collect();
        for (k, u_next) in edges {
            match graph.node(v).next.get(&k).copied() {
                None => {
                    graph.node_mut(v).next.insert(k, Some(u_next));
                }
                Some(Some(v_next)) => {
                    if v_next == u_next {
                        continue;
                    }
                    if v_next == v && u_next == u {
                        // Self loop; recursing here would never terminate.
                        continue;
                    }
                    // Chain the alternative behind the existing edge, then
                    // re-close it.
                    let terminus = graph.epsilon_chain_end(v_next);
                    if terminus != u_next
                        && !graph.node(terminus).next.contains_key(&T::epsilon())
                    {
                        graph
                            .node_mut(terminus)
                            .next
                            .insert(T::epsilon(), Some(u_next));
                        close_node(graph, v_next);
                    }
                }
                Some(None) => {}
            }
        }
    }

    graph.node_mut(v).next.remove(&T::epsilon());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(pattern: &str) -> Machine<char> {
        Machine::from_pattern(pattern).unwrap()
    }

    fn end_count(machine: &Machine<char>) -> usize {
        machine
            .get_all_reachable_nodes()
            .into_iter()
            .filter(|&id| machine.get_node(id).node_type == NodeType::End)
            .count()
    }

    #[test]
    fn single_literal_graph_shape() {
        let machine = compiled("x");
        let nodes = machine.get_all_reachable_nodes();
        assert_eq!(nodes, vec![0, 1]);
        assert_eq!(
            machine.get_node(0).next,
            BTreeMap::from([('x', Some(1))])
        );
        assert_eq!(machine.get_node(1).node_type, NodeType::End);
        assert!(machine.get_node(1).next.is_empty());
    }

    #[test]
    fn single_literal_language() {
        let mut machine = compiled("x");
        assert!(machine.is_match(&['x']));
        assert!(!machine.is_match(&[]));
        assert!(!machine.is_match(&['y']));
        assert!(!machine.is_match(&['x', 'x']));
    }

    #[test]
    fn empty_pattern_accepts_only_the_empty_sequence() {
        let mut machine = compiled("");
        assert!(machine.is_match(&[]));
        assert!(!machine.is_match(&['a']));
        assert_eq!(machine.get_state(), NodeType::End);
    }

    #[test]
    fn empty_star_accepts_only_the_empty_sequence() {
        let mut machine = compiled("()*");
        assert!(machine.is_match(&[]));
        assert!(!machine.is_match(&['a']));
    }

    #[test]
    fn empty_alternation_arm_is_a_bypass() {
        let mut machine = compiled("x(a||b)y");
        assert!(machine.is_match(&['x', 'a', 'y']));
        assert!(machine.is_match(&['x', 'b', 'y']));
        assert!(machine.is_match(&['x', 'y']));
        assert!(!machine.is_match(&['x', 'c', 'y']));
    }

    #[test]
    fn compile_rejects_malformed_patterns() {
        assert_eq!(
            Machine::from_pattern("(ab").unwrap_err(),
            CompileError::UnmatchedOpen(0)
        );
        assert_eq!(
            Machine::from_pattern("ab)").unwrap_err(),
            CompileError::UnmatchedClose(2)
        );
        assert_eq!(
            Machine::from_pattern("ab\\").unwrap_err(),
            CompileError::TrailingEscape(2)
        );
        assert_eq!(
            Machine::from_pattern("*a").unwrap_err(),
            CompileError::StrayQuantifier(0)
        );
        assert_eq!(
            Machine::from_pattern("+").unwrap_err(),
            CompileError::StrayQuantifier(0)
        );
        assert_eq!(
            Machine::from_pattern("?").unwrap_err(),
            CompileError::StrayQuantifier(0)
        );
    }

    #[test]
    fn failed_compile_leaves_machine_uncompiled() {
        let mut machine = compiled("ab");
        assert!(machine.compile(&['(' ]).is_err());
        assert_eq!(machine.get_entry(), None);
        assert_eq!(machine.get_state(), NodeType::Error);
        assert!(!machine.is_match(&['a', 'b']));
    }

    #[test]
    fn compiled_machines_are_epsilon_free() {
        for pattern in ["", "a", "a*b+c?d", "(a|b)*", "(a||b)+", "()*", "a(bc)+d?"] {
            let machine = compiled(pattern);
            assert!(!machine.has_epsilons(), "pattern {:?}", pattern);
        }
    }

    #[test]
    fn one_reachable_accept_state() {
        for pattern in ["", "a", "(ab|cd)", "(a|b)+c"] {
            let machine = compiled(pattern);
            assert_eq!(end_count(&machine), 1, "pattern {:?}", pattern);
        }
    }

    #[test]
    fn closure_promotes_states_that_reach_the_accept() {
        let machine = compiled("a?b?");
        assert_eq!(end_count(&machine), 3);
    }

    #[test]
    fn run_and_match_agree() {
        let mut machine = compiled("a*b");
        for input in [&[][..], &['b'][..], &['a', 'b'][..], &['a', 'a'][..]] {
            machine.reset();
            let by_run = machine.run(input, false).is_match();
            assert_eq!(machine.is_match(input), by_run);
        }
    }

    #[test]
    fn sink_state_is_absorbing() {
        let mut machine = compiled("ab");
        machine.reset();
        machine.step(&'z', false);
        assert_eq!(machine.get_state(), NodeType::Error);
        machine.step(&'a', false);
        assert_eq!(machine.get_state(), NodeType::Error);
    }

    #[test]
    fn partial_input_reads_as_normal() {
        let mut machine = compiled("ab");
        machine.reset();
        assert_eq!(machine.run(&['a'], false), NodeType::Normal);
    }

    #[test]
    fn chained_optionals_accept_every_subsequence() {
        let mut machine = compiled("ab?c?d");
        assert!(machine.is_match(&['a', 'b', 'c', 'd']));
        assert!(machine.is_match(&['a', 'b', 'd']));
        assert!(machine.is_match(&['a', 'c', 'd']));
        assert!(machine.is_match(&['a', 'd']));
        assert!(!machine.is_match(&['a', 'c', 'b', 'd']));
    }

    #[test]
    fn literal_edge_shadows_wildcard() {
        let mut machine = compiled("(a|.)b");
        assert!(machine.is_match(&['a', 'b']));
        assert!(machine.is_match(&['z', 'b']));
        assert!(!machine.is_match(&['b']));
    }

    #[test]
    fn alternation_is_commutative_at_the_language_level() {
        let mut ab = compiled("(ab|a)z");
        let mut ba = compiled("(a|ab)z");
        for input in [
            &['a', 'z'][..],
            &['a', 'b', 'z'][..],
            &['z'][..],
            &['b', 'z'][..],
            &['a', 'b'][..],
        ] {
            assert_eq!(ab.is_match(input), ba.is_match(input), "{:?}", input);
        }
        assert!(ab.is_match(&['a', 'z']));
        assert!(ab.is_match(&['a', 'b', 'z']));
        assert!(!ab.is_match(&['z']));
    }

    #[test]
    fn purge_preserves_the_language() {
        let mut machine = compiled("(a|b)+c?");
        let inputs: Vec<Vec<char>> = vec![
            vec![],
            vec!['a'],
            vec!['b', 'c'],
            vec!['a', 'b', 'a'],
            vec!['c'],
            vec!['a', 'c', 'c'],
        ];
        let before: Vec<bool> = inputs.iter().map(|i| machine.is_match(i)).collect();
        machine.purge();
        let after: Vec<bool> = inputs.iter().map(|i| machine.is_match(i)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn recompile_replaces_the_automaton() {
        let mut machine = compiled("a");
        machine.compile(&['b']).unwrap();
        assert!(machine.is_match(&['b']));
        assert!(!machine.is_match(&['a']));
    }

    #[test]
    fn epsilon_steps_only_when_allowed() {
        let mut graph: Graph<char> = Graph::new();
        let entry = graph.create_node();
        let accept = graph.create_node();
        graph.node_mut(entry).next.insert('\0', Some(accept));
        graph.node_mut(accept).node_type = NodeType::End;
        let mut machine = Machine {
            graph,
            entry: Some(entry),
            current: Some(entry),
            memory: Vec::new(),
            variables: BTreeMap::new(),
        };

        machine.step(&'x', false);
        assert_eq!(machine.get_state(), NodeType::Error);

        machine.reset();
        machine.step(&'x', true);
        assert_eq!(machine.get_state(), NodeType::End);
    }

    #[test]
    fn reserved_stores_read_as_empty() {
        let mut machine = compiled("a");
        assert_eq!(machine.get_variable(&'v'), &[] as &[char]);
        assert_eq!(machine.get_memory(), &[] as &[char]);
        machine.is_match(&['a']);
        machine.reset();
        assert_eq!(machine.get_memory(), &[] as &[char]);
    }

    #[test]
    fn graphviz_writes_a_digraph() {
        let machine = compiled("ab");
        let mut out = Vec::new();
        machine.graphviz(&mut out, "ab").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("digraph machine {"));
        assert!(text.contains("rankdir=LR"));
        assert!(text.contains("label=\"ab\""));
        assert!(text.contains("[label=\"Beg\"]"));
        assert!(text.contains("[label=\"End\"]"));
        assert!(text.trim_end().ends_with('}'));
    }
}
