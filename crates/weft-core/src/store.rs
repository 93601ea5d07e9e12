//! Arena storage for the committed node tree.
//!
//! Node records are kept behind `Arc` and treated as immutable once
//! installed: a commit swaps record pointers rather than mutating them, so a
//! reader holding record clones always sees a consistent subtree. Handles
//! are generational, so an id is never observed pointing at a slot that was
//! freed and reused.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::element::{Element, Props};
use crate::error::StoreError;
use crate::state::InstanceId;

/// Stable handle to one position in the committed tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Packs the handle into a single scalar for wire encoding.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}v{}", self.index, self.generation)
    }
}

/// Persistent record for one position in the committed tree.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub tag: Arc<str>,
    pub key: Option<Arc<str>>,
    /// Committed prop snapshot; the baseline for the next diff.
    pub props: Props,
    pub children: SmallVec<[NodeId; 8]>,
    /// Set when this node wraps a component instance rather than a primitive.
    pub instance: Option<InstanceId>,
    /// Children elements passed by the parent, retained for component nodes
    /// so a dirty instance can re-render without involving its parent.
    pub input_children: Vec<Element>,
}

/// Owned immutable snapshot of a committed subtree.
///
/// Views are extracted on the owner context and moved to diff workers by
/// message, so workers never touch the store.
#[derive(Clone, Debug)]
pub struct NodeView {
    pub id: NodeId,
    pub tag: Arc<str>,
    pub key: Option<Arc<str>>,
    pub props: Props,
    pub instance: Option<InstanceId>,
    pub children: Vec<NodeView>,
}

impl NodeView {
    /// Total node count of the snapshot, counting this node.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(NodeView::size).sum::<usize>()
    }

    /// Depth-first id collection, parent before children.
    pub(crate) fn collect_ids(&self, out: &mut Vec<NodeId>) {
        out.push(self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

/// Arena holding every committed node record.
#[derive(Default)]
pub struct NodeStore {
    slots: Vec<Option<Arc<NodeRecord>>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    root: Option<NodeId>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    pub fn contains(&self, id: NodeId) -> bool {
        let index = id.index as usize;
        self.generations.get(index) == Some(&id.generation)
            && self.slots.get(index).is_some_and(|slot| slot.is_some())
    }

    pub fn get(&self, id: NodeId) -> Result<&Arc<NodeRecord>, StoreError> {
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return Err(StoreError::MissingNode(id));
        }
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(StoreError::MissingNode(id))
    }

    /// Reserves a slot and returns its handle. The slot stays empty until
    /// [`NodeStore::install`] fills it.
    pub(crate) fn allocate(&mut self) -> NodeId {
        if let Some(index) = self.free.pop() {
            NodeId::new(index, self.generations[index as usize])
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            self.generations.push(0);
            NodeId::new(index, 0)
        }
    }

    /// Installs or replaces the record for an allocated handle. Replacing is
    /// how commit swaps a subtree: same id, new record pointer.
    pub(crate) fn install(&mut self, record: NodeRecord) -> Result<(), StoreError> {
        let id = record.id;
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return Err(StoreError::MissingNode(id));
        }
        self.slots[index] = Some(Arc::new(record));
        Ok(())
    }

    /// Frees a slot and bumps its generation so the handle can never
    /// resolve again.
    pub(crate) fn remove(&mut self, id: NodeId) -> Result<Arc<NodeRecord>, StoreError> {
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return Err(StoreError::MissingNode(id));
        }
        let record = self.slots[index].take().ok_or(StoreError::MissingNode(id))?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free.push(id.index);
        Ok(record)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extracts an owned snapshot of the subtree rooted at `id`.
    pub fn view(&self, id: NodeId) -> Result<NodeView, StoreError> {
        let record = self.get(id)?;
        let mut children = Vec::with_capacity(record.children.len());
        for child in &record.children {
            children.push(self.view(*child)?);
        }
        Ok(NodeView {
            id: record.id,
            tag: Arc::clone(&record.tag),
            key: record.key.clone(),
            props: record.props.clone(),
            instance: record.instance,
            children,
        })
    }

    /// Depth-first ids of the subtree rooted at `id`, parent before children.
    pub fn collect_subtree(&self, id: NodeId) -> Result<Vec<NodeId>, StoreError> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let record = self.get(current)?;
            out.push(current);
            for child in record.children.iter().rev() {
                stack.push(*child);
            }
        }
        Ok(out)
    }

    /// Renders the committed tree as an indented listing, for debugging.
    pub fn dump_tree(&self) -> String {
        let mut output = String::new();
        match self.root {
            Some(root) => self.dump_node(&mut output, root, 0),
            None => output.push_str("(no root)\n"),
        }
        output
    }

    fn dump_node(&self, output: &mut String, id: NodeId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.get(id) {
            Ok(record) => {
                let key = record
                    .key
                    .as_deref()
                    .map(|k| format!(" key={k}"))
                    .unwrap_or_default();
                output.push_str(&format!("{indent}[{id:?}] {}{key}\n", record.tag));
                for child in record.children.clone() {
                    self.dump_node(output, child, depth + 1);
                }
            }
            Err(_) => output.push_str(&format!("{indent}[{id:?}] (missing)\n")),
        }
    }
}

/// Snapshot of the whole committed tree published at each commit.
#[derive(Clone, Debug)]
pub struct CommittedTree {
    /// Monotonic commit revision.
    pub revision: u64,
    pub root: Option<NodeView>,
}
