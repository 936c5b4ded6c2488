//! Kernel Object Model
//!
//! Every kernel resource is an object in one table, named by a
//! [`KernelObjectId`] and reached by tasks only through handles.
//!
//! ## Object Types
//!
//! - **MemoryObject**: physically contiguous memory a task can map
//! - **Channel**: bounded message queue with a wait list
//! - **Task**: a schedulable unit owning a handle table and address space
//! - **Service**: a named channel in the service registry
//!
//! ## Reference Counting
//!
//! References are held by handles, mappings, handles travelling in queued
//! messages, services (on their channel), the registry (on each service) and
//! the kernel (on each live task). An object is destroyed in the `release`
//! that drops its count to zero, exactly once, and its id is never handed
//! out again. Destroying an object releases whatever it referenced; frames
//! and tasks to wake come back in a [`Reclaim`] for the caller to act on
//! once the table lock is dropped.

pub mod channel;
pub mod memory_object;
pub mod service;
pub mod task;

pub use channel::{Channel, Message};
pub use memory_object::MemoryObject;
pub use service::Service;
pub use task::{Task, TaskBlock, TaskState};

use crate::error::{KernelError, Result};
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use hal::memory::{Frame, Size4KiB};
use log::debug;

/// Process-wide unique object name
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelObjectId(pub u64);

impl fmt::Debug for KernelObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelObjectId({})", self.0)
    }
}

impl fmt::Display for KernelObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub enum KernelObject {
    MemoryObject(MemoryObject),
    Channel(Channel),
    Task(Task),
    Service(Service),
}

impl KernelObject {
    pub fn kind(&self) -> &'static str {
        match self {
            KernelObject::MemoryObject(_) => "memory object",
            KernelObject::Channel(_) => "channel",
            KernelObject::Task(_) => "task",
            KernelObject::Service(_) => "service",
        }
    }
}

/// Work left over from destroying objects
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reclaim {
    /// Frame runs to give back to the allocator, as `(first, count)`
    pub frames: Vec<(Frame<Size4KiB>, u64)>,
    /// Tasks that were waiting on a destroyed channel
    pub wake: Vec<KernelObjectId>,
    /// Every object destroyed, in destruction order
    pub destroyed: Vec<KernelObjectId>,
}

impl Reclaim {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.wake.is_empty() && self.destroyed.is_empty()
    }
}

struct Entry {
    object: KernelObject,
    ref_count: usize,
}

/// The kernel object table
pub struct ObjectTable {
    objects: BTreeMap<KernelObjectId, Entry>,
    next_id: u64,
}

macro_rules! typed_accessors {
    ($(($get:ident, $get_mut:ident, $variant:ident, $ty:ty)),+ $(,)?) => {
        $(
            #[doc = concat!("Look up a ", stringify!($variant), ", failing with `WrongObjectType` for anything else")]
            pub fn $get(&self, id: KernelObjectId) -> Result<&$ty> {
                match self.get(id)? {
                    KernelObject::$variant(object) => Ok(object),
                    _ => Err(KernelError::WrongObjectType),
                }
            }

            pub fn $get_mut(&mut self, id: KernelObjectId) -> Result<&mut $ty> {
                match self.get_mut(id)? {
                    KernelObject::$variant(object) => Ok(object),
                    _ => Err(KernelError::WrongObjectType),
                }
            }
        )+
    };
}

impl ObjectTable {
    pub const fn new() -> Self {
        Self { objects: BTreeMap::new(), next_id: 1 }
    }

    /// Add an object with a reference count of one
    ///
    /// That reference belongs to the caller, who must hand it to a handle,
    /// mapping or other holder, or `release` it.
    pub fn create(&mut self, object: KernelObject) -> KernelObjectId {
        let id = KernelObjectId(self.next_id);
        self.next_id += 1;
        debug!("Created {} {}", object.kind(), id);
        self.objects.insert(id, Entry { object, ref_count: 1 });
        id
    }

    pub fn get(&self, id: KernelObjectId) -> Result<&KernelObject> {
        self.objects.get(&id).map(|entry| &entry.object).ok_or(KernelError::NotFound)
    }

    pub fn get_mut(&mut self, id: KernelObjectId) -> Result<&mut KernelObject> {
        self.objects.get_mut(&id).map(|entry| &mut entry.object).ok_or(KernelError::NotFound)
    }

    typed_accessors! {
        (task, task_mut, Task, Task),
        (channel, channel_mut, Channel, Channel),
        (memory_object, memory_object_mut, MemoryObject, MemoryObject),
        (service, service_mut, Service, Service),
    }

    /// Take another reference
    ///
    /// # Panics
    /// If `id` is not a live object
    pub fn retain(&mut self, id: KernelObjectId) {
        match self.objects.get_mut(&id) {
            Some(entry) => entry.ref_count += 1,
            None => panic!("retain of dead or unknown kernel object {:?}", id),
        }
    }

    /// Drop a reference, destroying the object if it was the last
    ///
    /// # Panics
    /// If `id`, or anything a destroyed object referenced, is not a live
    /// object
    pub fn release(&mut self, id: KernelObjectId) -> Reclaim {
        let mut reclaim = Reclaim::default();
        self.release_into(id, &mut reclaim);
        reclaim
    }

    /// `release`, accumulating into an existing `Reclaim`
    pub fn release_into(&mut self, id: KernelObjectId, reclaim: &mut Reclaim) {
        // Worklist rather than recursion: messages can nest handles to
        // channels holding further messages
        let mut pending = vec![id];

        while let Some(id) = pending.pop() {
            let Some(entry) = self.objects.get_mut(&id) else {
                panic!("release of dead or unknown kernel object {:?}", id);
            };

            entry.ref_count -= 1;
            if entry.ref_count > 0 {
                continue;
            }

            let Some(Entry { object, .. }) = self.objects.remove(&id) else {
                continue;
            };
            debug!("Destroying {} {}", object.kind(), id);
            reclaim.destroyed.push(id);

            match object {
                KernelObject::MemoryObject(memory_object) => {
                    if let Some(frames) = memory_object.owned_frames() {
                        reclaim.frames.push(frames);
                    }
                }
                KernelObject::Channel(mut channel) => {
                    let (messages, waiters) = channel.take_contents();
                    for message in messages {
                        pending.extend(message.handles.iter().map(|entry| entry.object));
                    }
                    reclaim.wake.extend(waiters);
                }
                KernelObject::Task(mut task) => {
                    pending.extend(task.handles.take_all().into_iter().map(|entry| entry.object));
                    pending.extend(task.address_space.take_mappings().into_iter().map(|mapping| mapping.object));
                }
                KernelObject::Service(service) => pending.push(service.channel()),
            }
        }
    }

    /// Current reference count, `None` for ids that are not live
    pub fn ref_count(&self, id: KernelObjectId) -> Option<usize> {
        self.objects.get(&id).map(|entry| entry.ref_count)
    }

    #[inline]
    pub fn contains(&self, id: KernelObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Number of live objects
    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The id the next `create` will return
    #[inline]
    pub fn next_id(&self) -> KernelObjectId {
        KernelObjectId(self.next_id)
    }

    /// Live objects in id order, with their reference counts
    pub fn iter(&self) -> impl Iterator<Item = (KernelObjectId, &KernelObject, usize)> {
        self.objects.iter().map(|(&id, entry)| (id, &entry.object, entry.ref_count))
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleEntry;
    use hal::memory::{Flags, PhysicalAddress};
    use libpebble::{Capability, TaskPrivileges};

    fn frame(address: u64) -> Frame<Size4KiB> {
        Frame::containing(PhysicalAddress::new(address).unwrap())
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut table = ObjectTable::new();
        let a = table.create(KernelObject::Channel(Channel::new(1)));
        table.release(a);
        let b = table.create(KernelObject::Channel(Channel::new(1)));
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(table.get(a).map(|_| ()), Err(KernelError::NotFound));
    }

    #[test]
    fn test_destroyed_exactly_when_count_reaches_zero() {
        let mut table = ObjectTable::new();
        let id = table.create(KernelObject::MemoryObject(MemoryObject::owned(frame(0x10_0000), 2, Flags::empty())));
        table.retain(id);
        assert_eq!(table.ref_count(id), Some(2));

        assert!(table.release(id).is_empty());
        assert_eq!(table.ref_count(id), Some(1));

        let reclaim = table.release(id);
        assert_eq!(reclaim.frames, vec![(frame(0x10_0000), 2)]);
        assert_eq!(reclaim.destroyed, vec![id]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_typed_accessors() {
        let mut table = ObjectTable::new();
        let id = table.create(KernelObject::Channel(Channel::new(4)));
        assert!(table.channel(id).is_ok());
        assert_eq!(table.task(id).map(|_| ()), Err(KernelError::WrongObjectType));
        assert_eq!(table.memory_object(KernelObjectId(99)).map(|_| ()), Err(KernelError::NotFound));
    }

    #[test]
    fn test_channel_destruction_releases_queued_handles() {
        let mut table = ObjectTable::new();
        let memory = table.create(KernelObject::MemoryObject(MemoryObject::owned(frame(0x20_0000), 1, Flags::empty())));
        let channel = table.create(KernelObject::Channel(Channel::new(4)));

        let message = Message {
            bytes: vec![1, 2, 3],
            handles: vec![HandleEntry { object: memory, rights: Capability::MAP }],
        };
        table.channel_mut(channel).unwrap().push(message).unwrap();

        let reclaim = table.release(channel);
        assert_eq!(reclaim.destroyed, vec![channel, memory]);
        assert_eq!(reclaim.frames, vec![(frame(0x20_0000), 1)]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_task_destruction_releases_handles_and_mappings() {
        let mut table = ObjectTable::new();
        let memory = table.create(KernelObject::MemoryObject(MemoryObject::owned(frame(0x30_0000), 1, Flags::empty())));
        let mut task = Task::new("t", TaskPrivileges::empty(), 8);
        task.handles.insert(HandleEntry { object: memory, rights: Capability::MAP }).unwrap();
        task.address_space
            .map(hal::memory::VirtualAddress::new(0x40_0000).unwrap(), 0x1000, memory, Flags::empty())
            .unwrap();
        table.retain(memory);
        let task = table.create(KernelObject::Task(task));

        let reclaim = table.release(task);
        assert_eq!(reclaim.destroyed, vec![task, memory]);
        assert!(table.is_empty());
    }

    #[test]
    #[should_panic(expected = "unknown kernel object")]
    fn test_release_of_unknown_id_panics() {
        let mut table = ObjectTable::new();
        table.release(KernelObjectId(42));
    }

    #[test]
    #[should_panic(expected = "unknown kernel object")]
    fn test_retain_of_destroyed_id_panics() {
        let mut table = ObjectTable::new();
        let id = table.create(KernelObject::Channel(Channel::new(1)));
        table.release(id);
        table.retain(id);
    }
}
