//! Mutex registry
//!
//! Maps a mutex identity to its node in the lock-order graph. A node lives from
//! the first get-or-create until an explicit destroy, which also drops every
//! edge touching it. Each node carries its outgoing edges together with the
//! witness that justifies them, plus the set of predecessors so destroy does
//! not have to scan the whole registry.

use crate::core::types::{Generation, MutexId, StackId, ThreadId};
use fxhash::{FxHashMap, FxHashSet};
use std::collections::hash_map::Entry;
use std::fmt;

/// Evidence for a lock-order edge `before -> after`
///
/// Only the first witness observed for an ordered pair is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeWitness {
    /// Thread that acquired `after` while holding `before`
    pub thread_id: ThreadId,
    /// Where `before` was acquired
    pub stack_before: Option<StackId>,
    /// Where `after` was acquired
    pub stack_after: Option<StackId>,
}

/// Registry entry for one live mutex
#[derive(Debug)]
pub struct MutexNode {
    id: MutexId,
    generation: Generation,
    /// Locks that were acquired while this one was held
    edges: FxHashMap<MutexId, EdgeWitness>,
    /// Locks that were held while this one was acquired
    preds: FxHashSet<MutexId>,
}

impl MutexNode {
    fn new(id: MutexId, generation: Generation) -> Self {
        MutexNode {
            id,
            generation,
            edges: FxHashMap::default(),
            preds: FxHashSet::default(),
        }
    }

    pub fn id(&self) -> MutexId {
        self.id
    }

    /// Creation marker, unique across every node the registry ever created
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn edges(&self) -> &FxHashMap<MutexId, EdgeWitness> {
        &self.edges
    }

    pub fn has_edge_to(&self, after: MutexId) -> bool {
        self.edges.contains_key(&after)
    }

    pub fn witness_to(&self, after: MutexId) -> Option<&EdgeWitness> {
        self.edges.get(&after)
    }
}

/// Reasons the registry refuses a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The configured node capacity is exhausted
    CapacityExceeded { capacity: usize },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::CapacityExceeded { capacity } => {
                write!(f, "mutex registry is full ({capacity} nodes)")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Identity-keyed store of all live mutex nodes
#[derive(Debug)]
pub struct MutexRegistry {
    nodes: FxHashMap<MutexId, MutexNode>,
    /// Next creation marker to hand out
    next_generation: Generation,
    capacity: Option<usize>,
}

impl Default for MutexRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MutexRegistry {
    /// Create an empty registry, optionally bounded to `capacity` live nodes
    pub fn new(capacity: Option<usize>) -> Self {
        MutexRegistry {
            nodes: FxHashMap::default(),
            next_generation: 1,
            capacity,
        }
    }

    /// Resolve `id`, creating its node on first touch
    ///
    /// # Returns
    /// The node and whether this call created it. An existing node is returned
    /// untouched, its edge set included.
    ///
    /// # Errors
    /// [`RegistryError::CapacityExceeded`] when the node would have to be
    /// created but the registry is full.
    pub fn get_or_create(
        &mut self,
        id: MutexId,
    ) -> Result<(&mut MutexNode, bool), RegistryError> {
        let live = self.nodes.len();
        match self.nodes.entry(id) {
            Entry::Occupied(slot) => Ok((slot.into_mut(), false)),
            Entry::Vacant(slot) => {
                if let Some(capacity) = self.capacity
                    && live >= capacity
                {
                    return Err(RegistryError::CapacityExceeded { capacity });
                }
                let generation = self.next_generation;
                self.next_generation += 1;
                Ok((slot.insert(MutexNode::new(id, generation)), true))
            }
        }
    }

    pub fn lookup(&self, id: MutexId) -> Option<&MutexNode> {
        self.nodes.get(&id)
    }

    /// Whether `id` is live and still the node created at `generation`
    pub fn is_current(&self, id: MutexId, generation: Generation) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|node| node.generation == generation)
    }

    /// Record `before -> after` with `witness`
    ///
    /// Both nodes must be live. An already present edge keeps its first
    /// witness.
    ///
    /// # Returns
    /// `true` if the edge was new
    pub fn insert_edge(&mut self, before: MutexId, after: MutexId, witness: EdgeWitness) -> bool {
        if before == after || !self.nodes.contains_key(&after) {
            return false;
        }
        let inserted = match self.nodes.get_mut(&before) {
            Some(node) => match node.edges.entry(after) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(witness);
                    true
                }
            },
            None => false,
        };
        if inserted && let Some(node) = self.nodes.get_mut(&after) {
            node.preds.insert(before);
        }
        inserted
    }

    /// Remove the node for `id` and every edge touching it
    ///
    /// # Returns
    /// `false` if there was no such node
    pub fn destroy(&mut self, id: MutexId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };

        for succ in node.edges.keys() {
            if let Some(succ_node) = self.nodes.get_mut(succ) {
                succ_node.preds.remove(&id);
            }
        }
        for pred in &node.preds {
            if let Some(pred_node) = self.nodes.get_mut(pred) {
                pred_node.edges.remove(&id);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of edges across all nodes
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|node| node.edges.len()).sum()
    }
}
