//! Lock Order Graph for detecting lock ordering violations
//!
//! This module implements a lock order graph that tracks the order in which locks
//! are acquired across all threads. It detects potential deadlocks by identifying
//! lock ordering violations, even when threads don't actually block.
//!
//! # How it works
//!
//! When a thread holds lock A and then acquires lock B, we record the edge A -> B.
//! Before an edge A -> B is added we search for an existing path B -> ... -> A.
//! If one exists the new edge closes a cycle, which is a lock-order inversion.
//!
//! Unlike a wait-for graph, a cycle is not a reason to refuse the edge: the
//! ordering was really observed, so it is recorded either way. The graph only
//! shrinks when a mutex is destroyed.

use crate::core::registry::{EdgeWitness, MutexRegistry, RegistryError};
use crate::core::types::{Generation, MutexId};
use fxhash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// What happened to an edge handed to [`LockOrderGraph::add_edge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// The ordered pair was already recorded; its first witness is kept
    Exists,
    /// New edge, no cycle (or the cycle check was not requested)
    Added,
    /// New edge that closes a cycle
    ///
    /// Holds the pre-existing path `after -> ... -> before`.
    Cycle(Vec<MutexId>),
    /// One of the endpoints is not a live node
    Missing,
}

/// Directed graph over live mutexes
///
/// Nodes and their outgoing edges live in the [`MutexRegistry`]; this type adds
/// the traversal on top of it.
#[derive(Debug)]
pub struct LockOrderGraph {
    registry: MutexRegistry,

    // Cached buffers for BFS to avoid repeated allocations
    bfs_queue: VecDeque<MutexId>,
    bfs_visited: FxHashSet<MutexId>,
    bfs_parent: FxHashMap<MutexId, MutexId>,
}

impl Default for LockOrderGraph {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LockOrderGraph {
    /// Create an empty graph, optionally bounded to `capacity` mutexes
    pub fn new(capacity: Option<usize>) -> Self {
        LockOrderGraph {
            registry: MutexRegistry::new(capacity),
            bfs_queue: VecDeque::with_capacity(64),
            bfs_visited: FxHashSet::default(),
            bfs_parent: FxHashMap::default(),
        }
    }

    pub fn registry(&self) -> &MutexRegistry {
        &self.registry
    }

    /// Resolve a mutex, creating its node on first touch
    ///
    /// # Returns
    /// The node's creation marker and whether it was just created
    pub fn get_or_create(&mut self, id: MutexId) -> Result<(Generation, bool), RegistryError> {
        self.registry
            .get_or_create(id)
            .map(|(node, created)| (node.generation(), created))
    }

    /// Whether a direct edge `before -> after` is recorded
    pub fn has_edge(&self, before: MutexId, after: MutexId) -> bool {
        self.registry
            .lookup(before)
            .is_some_and(|node| node.has_edge_to(after))
    }

    /// Check whether adding `before -> after` would close a cycle
    ///
    /// Existing edges and self-edges are never reported.
    ///
    /// # Returns
    /// The existing path `after -> ... -> before` if there is one
    pub fn check_edge(&mut self, before: MutexId, after: MutexId) -> Option<Vec<MutexId>> {
        if before == after || self.has_edge(before, after) {
            return None;
        }
        self.find_path(after, before)
    }

    /// Record `before -> after`, optionally checking for a cycle first
    ///
    /// The edge is committed even if it closes a cycle.
    pub fn add_edge(
        &mut self,
        before: MutexId,
        after: MutexId,
        witness: EdgeWitness,
        check_cycle: bool,
    ) -> EdgeOutcome {
        if before == after {
            return EdgeOutcome::Exists;
        }
        if self.registry.lookup(before).is_none() || self.registry.lookup(after).is_none() {
            return EdgeOutcome::Missing;
        }
        if self.has_edge(before, after) {
            return EdgeOutcome::Exists;
        }

        let cycle = if check_cycle {
            self.find_path(after, before)
        } else {
            None
        };

        self.registry.insert_edge(before, after, witness);

        match cycle {
            Some(path) => EdgeOutcome::Cycle(path),
            None => EdgeOutcome::Added,
        }
    }

    /// Witness of every edge along `path`, in path order
    ///
    /// # Returns
    /// `None` if any consecutive pair is not an edge
    pub fn path_witnesses(&self, path: &[MutexId]) -> Option<Vec<(MutexId, MutexId, EdgeWitness)>> {
        path.windows(2)
            .map(|pair| {
                let witness = self.registry.lookup(pair[0])?.witness_to(pair[1])?;
                Some((pair[0], pair[1], *witness))
            })
            .collect()
    }

    /// Remove a mutex and every edge touching it
    ///
    /// # Returns
    /// `false` if the mutex was not live
    pub fn remove_lock(&mut self, id: MutexId) -> bool {
        self.registry.destroy(id)
    }

    /// Find a path from `start` to `target` using BFS
    ///
    /// # Returns
    /// The node sequence `start, ..., target`
    fn find_path(&mut self, start: MutexId, target: MutexId) -> Option<Vec<MutexId>> {
        if start == target {
            return Some(vec![start]);
        }

        // Early termination - nothing leaves start
        if self
            .registry
            .lookup(start)
            .is_none_or(|node| node.edges().is_empty())
        {
            return None;
        }

        // Reuse cached buffers
        self.bfs_queue.clear();
        self.bfs_visited.clear();
        self.bfs_parent.clear();

        self.bfs_queue.push_back(start);
        self.bfs_visited.insert(start);

        while let Some(current) = self.bfs_queue.pop_front() {
            let Some(node) = self.registry.lookup(current) else {
                continue;
            };
            for &neighbor in node.edges().keys() {
                if !self.bfs_visited.insert(neighbor) {
                    continue;
                }
                self.bfs_parent.insert(neighbor, current);

                if neighbor == target {
                    let mut path = vec![target];
                    let mut curr = target;
                    while let Some(&prev) = self.bfs_parent.get(&curr) {
                        path.push(prev);
                        curr = prev;
                    }
                    path.reverse();
                    return Some(path);
                }

                self.bfs_queue.push_back(neighbor);
            }
        }

        None
    }
}
