use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use parking_lot::Mutex;

use crate::common::TransactionID;

/// Directed graph of lock waits. An edge `a -> b` means `a` is blocked on a
/// lock that `b` holds or has requested ahead of `a`. Ordered maps keep cycle
/// detection deterministic for a given edge set.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: Mutex<BTreeMap<TransactionID, BTreeSet<TransactionID>>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&self, waiter: TransactionID, holder: TransactionID) {
        if waiter == holder {
            return;
        }
        self.edges.lock().entry(waiter).or_default().insert(holder);
    }

    pub fn remove_edge(&self, waiter: TransactionID, holder: TransactionID) {
        let mut edges = self.edges.lock();
        if let Some(targets) = edges.get_mut(&waiter) {
            targets.remove(&holder);
            if targets.is_empty() {
                edges.remove(&waiter);
            }
        }
    }

    /// Replaces every outgoing edge of `waiter`.
    pub fn set_waits_for(&self, waiter: TransactionID, holders: impl IntoIterator<Item = TransactionID>) {
        let targets: BTreeSet<_> = holders.into_iter().filter(|&h| h != waiter).collect();
        let mut edges = self.edges.lock();
        if targets.is_empty() {
            edges.remove(&waiter);
        } else {
            edges.insert(waiter, targets);
        }
    }

    pub fn remove_waiter(&self, waiter: TransactionID) {
        self.edges.lock().remove(&waiter);
    }

    /// Drops every edge from or to `tx`.
    pub fn remove_transaction(&self, tx: TransactionID) {
        let mut edges = self.edges.lock();
        edges.remove(&tx);
        edges.retain(|_, targets| {
            targets.remove(&tx);
            !targets.is_empty()
        });
    }

    pub fn waiting_for(&self, waiter: TransactionID) -> BTreeSet<TransactionID> {
        self.edges.lock().get(&waiter).cloned().unwrap_or_default()
    }

    /// Number of transactions with at least one outgoing edge.
    pub fn len(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().values().map(BTreeSet::len).sum()
    }

    /// Returns the transactions of some cycle, in edge order, or None if the
    /// graph is acyclic. The first transaction is not repeated at the end.
    pub fn detect_cycle(&self) -> Option<Vec<TransactionID>> {
        // Search a snapshot so waiters are not held up by the traversal
        let edges = self.edges.lock().clone();

        let mut visited = BTreeSet::new();
        for &start in edges.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = BTreeSet::new();
            if let Some(cycle) = dfs(&edges, start, &mut visited, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
        None
    }
}

fn dfs(
    edges: &BTreeMap<TransactionID, BTreeSet<TransactionID>>,
    node: TransactionID,
    visited: &mut BTreeSet<TransactionID>,
    path: &mut Vec<TransactionID>,
    on_path: &mut BTreeSet<TransactionID>,
) -> Option<Vec<TransactionID>> {
    visited.insert(node);
    path.push(node);
    on_path.insert(node);

    if let Some(targets) = edges.get(&node) {
        for &next in targets {
            if on_path.contains(&next) {
                let start = path.iter().position(|&tx| tx == next).unwrap_or(0);
                return Some(path[start..].to_vec());
            }
            if !visited.contains(&next) {
                if let Some(cycle) = dfs(edges, next, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    None
}

impl fmt::Display for WaitForGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges = self.edges.lock();
        write!(f, "WaitForGraph{{")?;
        for (i, (waiter, targets)) in edges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let ids: Vec<u32> = targets.iter().map(|tx| tx.0).collect();
            write!(f, "{} -> {:?}", waiter, ids)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: u32) -> TransactionID {
        TransactionID(id)
    }

    #[test]
    fn two_party_cycle() {
        let graph = WaitForGraph::new();
        graph.add_edge(tx(1), tx(2));
        graph.add_edge(tx(2), tx(1));
        assert_eq!(graph.detect_cycle(), Some(vec![tx(1), tx(2)]));
    }

    #[test]
    fn chain_is_not_a_cycle() {
        let graph = WaitForGraph::new();
        graph.add_edge(tx(1), tx(2));
        graph.add_edge(tx(2), tx(3));
        graph.add_edge(tx(4), tx(3));
        assert_eq!(graph.detect_cycle(), None);
    }

    #[test]
    fn three_party_cycle_behind_a_tail() {
        let graph = WaitForGraph::new();
        graph.add_edge(tx(1), tx(2));
        graph.add_edge(tx(2), tx(3));
        graph.add_edge(tx(3), tx(4));
        graph.add_edge(tx(4), tx(2));
        assert_eq!(graph.detect_cycle(), Some(vec![tx(2), tx(3), tx(4)]));
    }

    #[test]
    fn removing_a_transaction_breaks_the_cycle() {
        let graph = WaitForGraph::new();
        graph.add_edge(tx(1), tx(2));
        graph.add_edge(tx(2), tx(1));
        graph.remove_transaction(tx(2));
        assert!(graph.is_empty());
        assert_eq!(graph.detect_cycle(), None);
    }

    #[test]
    fn set_waits_for_replaces_edges() {
        let graph = WaitForGraph::new();
        graph.set_waits_for(tx(1), [tx(2), tx(3)]);
        assert_eq!(graph.edge_count(), 2);
        graph.set_waits_for(tx(1), [tx(3)]);
        assert_eq!(graph.waiting_for(tx(1)), [tx(3)].into_iter().collect::<BTreeSet<_>>());
        graph.set_waits_for(tx(1), []);
        assert!(graph.is_empty());
    }

    #[test]
    fn self_edges_are_ignored() {
        let graph = WaitForGraph::new();
        graph.add_edge(tx(1), tx(1));
        assert!(graph.is_empty());
        assert_eq!(format!("{}", graph), "WaitForGraph{}");
    }
}
