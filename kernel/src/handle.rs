//! Capability & handle system
//!
//! # Purpose
//! Each task reaches kernel objects only through its own handle table. A
//! table slot pairs an object with the capability mask the handle carries;
//! every operation checks the mask before touching the object and fails
//! closed when a bit is missing.
//!
//! # Integration Points
//! - Tables live inside task objects (see [`crate::object::Task`])
//! - Each occupied slot holds one reference on its object
//! - Handles moved through channels travel as [`HandleEntry`] values
//!
//! # Architecture
//! - Arena of `Option<HandleEntry>` indexed by `Handle`
//! - Slot 0 is never issued, so `Handle::ZERO` can mean "none"
//! - The lowest free slot is reused first
//! - Bounded by `KernelConfig::max_handles_per_task`

use crate::error::{KernelError, Result};
use crate::object::KernelObjectId;
use crate::Kernel;
use alloc::vec;
use alloc::vec::Vec;
use libpebble::{Capability, Handle};
use log::trace;

/// What a handle slot refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleEntry {
    pub object: KernelObjectId,
    pub rights: Capability,
}

/// A task's handle table
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Option<HandleEntry>>,
    capacity: usize,
}

impl HandleTable {
    /// Create a table with room for `capacity` slots, slot 0 included
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![None], capacity }
    }

    /// Number of handles that can still be inserted
    pub fn free_slots(&self) -> usize {
        let holes = self.slots.iter().skip(1).filter(|slot| slot.is_none()).count();
        holes + self.capacity.saturating_sub(self.slots.len())
    }

    /// Fail with `HandleTableFull` unless `count` more handles fit
    pub fn reserve(&self, count: usize) -> Result<()> {
        if self.free_slots() >= count {
            Ok(())
        } else {
            Err(KernelError::HandleTableFull)
        }
    }

    /// Store `entry` in the lowest free slot
    ///
    /// The entry's reference moves into the table.
    ///
    /// # Errors
    /// `HandleTableFull` if every slot is taken
    pub fn insert(&mut self, entry: HandleEntry) -> Result<Handle> {
        let index = match self.slots.iter().skip(1).position(|slot| slot.is_none()) {
            Some(position) => position + 1,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(KernelError::HandleTableFull),
        };

        self.slots[index] = Some(entry);
        Ok(Handle(index as u32))
    }

    /// Look up `handle`, checking it carries every bit of `required`
    ///
    /// # Errors
    /// - `InvalidHandle` if the slot is empty or out of range
    /// - `AccessDenied` if the mask lacks a required bit
    pub fn resolve(&self, handle: Handle, required: Capability) -> Result<HandleEntry> {
        let entry = self.get(handle).ok_or(KernelError::InvalidHandle)?;
        if !entry.rights.contains(required) {
            return Err(KernelError::AccessDenied);
        }
        Ok(entry)
    }

    pub fn get(&self, handle: Handle) -> Option<HandleEntry> {
        if handle == Handle::ZERO {
            return None;
        }
        self.slots.get(handle.index()).copied().flatten()
    }

    /// Empty a slot, handing its reference back to the caller
    pub fn remove(&mut self, handle: Handle) -> Result<HandleEntry> {
        if handle == Handle::ZERO {
            return Err(KernelError::InvalidHandle);
        }
        self.slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(KernelError::InvalidHandle)
    }

    /// Occupied slots in handle order
    pub fn entries(&self) -> impl Iterator<Item = (Handle, HandleEntry)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|entry| (Handle(index as u32), entry)))
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the table, handing every reference back to the caller
    pub fn take_all(&mut self) -> Vec<HandleEntry> {
        let entries = self.slots.drain(..).flatten().collect();
        self.slots.push(None);
        entries
    }
}

impl Kernel {
    /// Give `task` a new handle to `object` carrying `rights`
    ///
    /// Takes a new reference on `object`.
    pub fn create_handle(&self, task: KernelObjectId, object: KernelObjectId, rights: Capability) -> Result<Handle> {
        let mut objects = self.objects.lock();
        if !objects.contains(object) {
            return Err(KernelError::NotFound);
        }

        let handle = objects.task_mut(task)?.handles.insert(HandleEntry { object, rights })?;
        objects.retain(object);
        trace!("{}: new handle {:?} -> {} ({:?})", task, handle, object, rights);
        Ok(handle)
    }

    /// Look up a handle in `task`'s table, checking `required` rights
    pub fn resolve(&self, task: KernelObjectId, handle: Handle, required: Capability) -> Result<HandleEntry> {
        self.objects.lock().task(task)?.handles.resolve(handle, required)
    }

    /// Create a second handle in `task` to the same object, with `rights`
    ///
    /// # Errors
    /// - `AccessDenied` if the source handle lacks `DUPLICATE`
    /// - `CapabilityEscalation` if `rights` is not a subset of the source
    ///   handle's rights; nothing is created
    /// - `HandleTableFull`
    pub fn duplicate(&self, task: KernelObjectId, handle: Handle, rights: Capability) -> Result<Handle> {
        self.duplicate_into(task, handle, task, rights)
    }

    /// Create a handle in `destination` to the object `handle` names in `source`
    ///
    /// Same checks as [`Kernel::duplicate`].
    pub fn duplicate_into(
        &self,
        source: KernelObjectId,
        handle: Handle,
        destination: KernelObjectId,
        rights: Capability,
    ) -> Result<Handle> {
        let mut objects = self.objects.lock();

        let entry = objects.task(source)?.handles.resolve(handle, Capability::DUPLICATE)?;
        if !entry.rights.can_narrow_to(rights) {
            return Err(KernelError::CapabilityEscalation);
        }

        let new_handle = objects.task_mut(destination)?.handles.insert(HandleEntry { object: entry.object, rights })?;
        objects.retain(entry.object);
        trace!("{}: duplicated {:?} into {} as {:?} ({:?})", source, handle, destination, new_handle, rights);
        Ok(new_handle)
    }

    /// Remove a handle from `task`'s table and drop its reference
    pub fn close_handle(&self, task: KernelObjectId, handle: Handle) -> Result<()> {
        let reclaim = {
            let mut objects = self.objects.lock();
            let entry = objects.task_mut(task)?.handles.remove(handle)?;
            trace!("{}: closed {:?} -> {}", task, handle, entry.object);
            objects.release(entry.object)
        };

        self.finish(reclaim);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, rights: Capability) -> HandleEntry {
        HandleEntry { object: KernelObjectId(id), rights }
    }

    #[test]
    fn test_zero_is_never_issued() {
        let mut table = HandleTable::new(4);
        let first = table.insert(entry(1, Capability::SEND)).unwrap();
        assert_eq!(first, Handle(1));
        assert_eq!(table.resolve(Handle::ZERO, Capability::empty()), Err(KernelError::InvalidHandle));
        assert_eq!(table.remove(Handle::ZERO), Err(KernelError::InvalidHandle));
    }

    #[test]
    fn test_lowest_free_slot_reused() {
        let mut table = HandleTable::new(8);
        let a = table.insert(entry(1, Capability::SEND)).unwrap();
        let b = table.insert(entry(2, Capability::SEND)).unwrap();
        let c = table.insert(entry(3, Capability::SEND)).unwrap();
        table.remove(a).unwrap();
        table.remove(b).unwrap();
        assert_eq!(table.insert(entry(4, Capability::SEND)).unwrap(), a);
        assert_eq!(table.insert(entry(5, Capability::SEND)).unwrap(), b);
        assert_eq!(table.get(c), Some(entry(3, Capability::SEND)));
    }

    #[test]
    fn test_capacity_includes_reserved_slot() {
        let mut table = HandleTable::new(3);
        assert_eq!(table.free_slots(), 2);
        table.insert(entry(1, Capability::READ)).unwrap();
        table.insert(entry(2, Capability::READ)).unwrap();
        assert_eq!(table.free_slots(), 0);
        assert_eq!(table.insert(entry(3, Capability::READ)), Err(KernelError::HandleTableFull));
        assert_eq!(table.reserve(1), Err(KernelError::HandleTableFull));
        assert_eq!(table.reserve(0), Ok(()));
    }

    #[test]
    fn test_resolve_checks_rights() {
        let mut table = HandleTable::new(4);
        let handle = table.insert(entry(1, Capability::SEND | Capability::TRANSFER)).unwrap();
        assert!(table.resolve(handle, Capability::SEND).is_ok());
        assert_eq!(table.resolve(handle, Capability::RECEIVE), Err(KernelError::AccessDenied));
        assert_eq!(table.resolve(Handle(3), Capability::SEND), Err(KernelError::InvalidHandle));
    }

    #[test]
    fn test_take_all_leaves_empty_table() {
        let mut table = HandleTable::new(4);
        table.insert(entry(1, Capability::READ)).unwrap();
        table.insert(entry(2, Capability::READ)).unwrap();
        assert_eq!(table.take_all().len(), 2);
        assert!(table.is_empty());
        assert_eq!(table.insert(entry(3, Capability::READ)).unwrap(), Handle(1));
    }
}
