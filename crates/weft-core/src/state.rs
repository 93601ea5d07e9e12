//! Per-instance state cells.
//!
//! A component instance owns an ordered list of type-erased state cells,
//! addressed by hook index. Instances persist across re-renders of the same
//! logical component and are destroyed only when their node is removed.
//! Reconciliation never touches cell contents; they change only through
//! explicit state updates.

use std::any::Any;
use std::marker::PhantomData;

use crate::error::StoreError;
use crate::store::NodeId;

/// Stable handle to a component instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

impl InstanceId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl std::fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}v{}", self.index, self.generation)
    }
}

/// Typed reference to one state cell, stable across renders.
///
/// Handles are plain indices, so they stay valid for the lifetime of the
/// owning instance and can be captured by host callbacks without aliasing
/// the store.
pub struct StateHandle<T> {
    instance: InstanceId,
    cell: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateHandle<T> {
    pub(crate) fn new(instance: InstanceId, cell: usize) -> Self {
        Self {
            instance,
            cell,
            _marker: PhantomData,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub(crate) fn cell(&self) -> usize {
        self.cell
    }
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateHandle<T> {}

impl<T> std::fmt::Debug for StateHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateHandle({:?}#{})", self.instance, self.cell)
    }
}

#[derive(Debug)]
pub(crate) enum CellError {
    Missing,
    TypeMismatch,
}

/// Persistent state holder for one logical component position.
pub struct InstanceRecord {
    id: InstanceId,
    node: Option<NodeId>,
    cells: Vec<Box<dyn Any + Send>>,
    dirty: bool,
}

impl InstanceRecord {
    /// Node currently wrapping this instance. `None` between creation and
    /// the first commit.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

/// Arena holding every component instance.
#[derive(Default)]
pub struct StateStore {
    slots: Vec<Option<InstanceRecord>>,
    generations: Vec<u32>,
    free: Vec<u32>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(&mut self) -> InstanceId {
        let id = if let Some(index) = self.free.pop() {
            InstanceId::new(index, self.generations[index as usize])
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            self.generations.push(0);
            InstanceId::new(index, 0)
        };
        self.slots[id.index as usize] = Some(InstanceRecord {
            id,
            node: None,
            cells: Vec::new(),
            dirty: false,
        });
        id
    }

    pub fn get(&self, id: InstanceId) -> Result<&InstanceRecord, StoreError> {
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return Err(StoreError::MissingInstance(id));
        }
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(StoreError::MissingInstance(id))
    }

    fn get_mut(&mut self, id: InstanceId) -> Result<&mut InstanceRecord, StoreError> {
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return Err(StoreError::MissingInstance(id));
        }
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(StoreError::MissingInstance(id))
    }

    pub(crate) fn destroy(&mut self, id: InstanceId) -> Result<(), StoreError> {
        let index = id.index as usize;
        if self.generations.get(index) != Some(&id.generation) {
            return Err(StoreError::MissingInstance(id));
        }
        if self.slots[index].take().is_none() {
            return Err(StoreError::MissingInstance(id));
        }
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free.push(id.index);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn bind_node(&mut self, id: InstanceId, node: NodeId) -> Result<(), StoreError> {
        self.get_mut(id)?.node = Some(node);
        Ok(())
    }

    pub(crate) fn set_dirty(&mut self, id: InstanceId, dirty: bool) -> Result<(), StoreError> {
        self.get_mut(id)?.dirty = dirty;
        Ok(())
    }

    /// Reads cell `index` of `id`, creating it with `init` when the hook
    /// runs for the first time.
    pub(crate) fn cell_read_or_init<T: Clone + Send + 'static>(
        &mut self,
        id: InstanceId,
        index: usize,
        init: impl FnOnce() -> T,
    ) -> Result<T, CellError> {
        let record = self.get_mut(id).map_err(|_| CellError::Missing)?;
        if index == record.cells.len() {
            let value = init();
            record.cells.push(Box::new(value.clone()));
            return Ok(value);
        }
        record
            .cells
            .get(index)
            .ok_or(CellError::Missing)?
            .downcast_ref::<T>()
            .cloned()
            .ok_or(CellError::TypeMismatch)
    }

    /// Writes a new value into an existing cell.
    pub(crate) fn cell_set<T: Send + 'static>(
        &mut self,
        id: InstanceId,
        index: usize,
        value: T,
    ) -> Result<(), CellError> {
        let record = self.get_mut(id).map_err(|_| CellError::Missing)?;
        let cell = record.cells.get_mut(index).ok_or(CellError::Missing)?;
        if !cell.is::<T>() {
            return Err(CellError::TypeMismatch);
        }
        *cell = Box::new(value);
        record.dirty = true;
        Ok(())
    }

    pub(crate) fn cell_get<T: Clone + Send + 'static>(
        &self,
        id: InstanceId,
        index: usize,
    ) -> Result<T, CellError> {
        let record = self.get(id).map_err(|_| CellError::Missing)?;
        record
            .cells
            .get(index)
            .ok_or(CellError::Missing)?
            .downcast_ref::<T>()
            .cloned()
            .ok_or(CellError::TypeMismatch)
    }
}
