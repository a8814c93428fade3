//! Wait-for graph over agent ids.

use std::collections::{BTreeSet, HashSet};

use agent_runtime_core::types::WaitForEdge;

/// Directed graph where `a -> b` means `a` waits on a resource held by `b`.
///
/// An edge exists only while the matching acquire call is pending, keyed by
/// the waiting agent and the resource it asked for.
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    edges: Vec<WaitForEdge>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the edge for `(edge.waiting, edge.resource)`.
    pub fn add_edge(&mut self, edge: WaitForEdge) {
        self.remove_edge(&edge.waiting, &edge.resource);
        self.edges.push(edge);
    }

    pub fn remove_edge(&mut self, waiting: &str, resource: &str) -> bool {
        let before = self.edges.len();
        self.edges
            .retain(|e| !(e.waiting == waiting && e.resource == resource));
        self.edges.len() != before
    }

    pub fn has_edge(&self, waiting: &str, resource: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.waiting == waiting && e.resource == resource)
    }

    /// Drop every edge into or out of `agent`. Returns how many went.
    pub fn remove_agent(&mut self, agent: &str) -> usize {
        let before = self.edges.len();
        self.edges
            .retain(|e| e.waiting != agent && e.waiting_for != agent);
        before - self.edges.len()
    }

    pub fn edges(&self) -> &[WaitForEdge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn successors<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.waiting == node)
            .map(|e| e.waiting_for.as_str())
    }

    /// Depth-first search from `node`, with `extra` as one tentative edge.
    /// Returns the index in `path` where a cycle closes.
    fn dfs<'a>(
        &'a self,
        node: &'a str,
        extra: Option<(&'a str, &'a str)>,
        path: &mut Vec<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> Option<usize> {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            return Some(pos);
        }
        if !visited.insert(node) {
            return None;
        }
        path.push(node);
        let tentative = extra.filter(|(from, _)| *from == node).map(|(_, to)| to);
        for next in self.successors(node).chain(tentative) {
            if let Some(pos) = self.dfs(next, extra, path, visited) {
                return Some(pos);
            }
        }
        path.pop();
        None
    }

    /// Whether adding `waiting -> holder` would close a cycle. The graph is
    /// left untouched.
    pub fn would_deadlock(&self, waiting: &str, holder: &str) -> bool {
        if waiting == holder {
            return false;
        }
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        self.dfs(waiting, Some((waiting, holder)), &mut path, &mut visited)
            .is_some()
    }

    /// Members of a cycle reachable from `start`, in wait order.
    pub fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let pos = self.dfs(start, None, &mut path, &mut visited)?;
        Some(path[pos..].iter().map(|s| s.to_string()).collect())
    }

    /// Every distinct cycle, each reported once.
    pub fn find_all_cycles(&self) -> Vec<Vec<String>> {
        let starts: BTreeSet<&str> = self.edges.iter().map(|e| e.waiting.as_str()).collect();
        let mut seen: HashSet<BTreeSet<String>> = HashSet::new();
        let mut cycles = Vec::new();
        for start in starts {
            if let Some(cycle) = self.find_cycle(start) {
                let members: BTreeSet<String> = cycle.iter().cloned().collect();
                if seen.insert(members) {
                    cycles.push(cycle);
                }
            }
        }
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn edge(waiting: &str, waiting_for: &str, resource: &str) -> WaitForEdge {
        WaitForEdge {
            waiting: waiting.into(),
            waiting_for: waiting_for.into(),
            resource: resource.into(),
            since: Utc::now(),
        }
    }

    #[test]
    fn test_tentative_edge_detects_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge("a", "b", "r2"));
        graph.add_edge(edge("b", "c", "r3"));

        assert!(graph.would_deadlock("c", "a"));
        assert!(!graph.would_deadlock("c", "d"));
        assert!(!graph.would_deadlock("a", "a"));
        // the check never mutates
        assert_eq!(graph.edges().len(), 2);
        assert!(graph.find_cycle("a").is_none());
    }

    #[test]
    fn test_find_cycle_members() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge("x", "a", "r0"));
        graph.add_edge(edge("a", "b", "r1"));
        graph.add_edge(edge("b", "c", "r2"));
        graph.add_edge(edge("c", "a", "r3"));

        let cycle = graph.find_cycle("x").unwrap();
        assert_eq!(cycle, vec!["a", "b", "c"]);
        assert_eq!(graph.find_all_cycles().len(), 1);
    }

    #[test]
    fn test_remove_agent_drops_both_directions() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge("a", "b", "r1"));
        graph.add_edge(edge("b", "c", "r2"));
        graph.add_edge(edge("d", "e", "r3"));
        assert_eq!(graph.remove_agent("b"), 2);
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_edge_replaced_per_pending_call() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(edge("a", "b", "r1"));
        graph.add_edge(edge("a", "c", "r1"));
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].waiting_for, "c");
        assert!(graph.remove_edge("a", "r1"));
        assert!(!graph.has_edge("a", "r1"));
    }
}
