//! Memory management
//!
//! - [`pmm`]: the physical hole allocator, one per kernel
//! - [`vmm`]: per-task address space bookkeeping

pub mod pmm;
pub mod vmm;

pub use pmm::{AllocationError, HoleInfo, PhysicalMemoryManager};
pub use vmm::{AddressSpace, Mapping};

use crate::error::{KernelError, Result};
use crate::handle::HandleEntry;
use crate::object::{KernelObject, KernelObjectId, MemoryObject};
use crate::Kernel;
use hal::memory::{Flags, FrameSize, PhysicalAddress, Size4KiB, VirtualAddress};
use libpebble::{Capability, Handle, TaskPrivileges};
use log::{debug, trace};

/// Rights on the handle returned by `create_memory_object`
pub const MEMORY_OBJECT_CREATOR_RIGHTS: Capability = Capability::READ
    .union(Capability::WRITE)
    .union(Capability::MAP)
    .union(Capability::DUPLICATE)
    .union(Capability::TRANSFER);

impl Kernel {
    /// Allocate `size` bytes of contiguous physical memory as a memory object
    ///
    /// # Errors
    /// - `InvalidSize` unless `size` is a non-zero multiple of 4KiB
    /// - `HandleTableFull` (checked before allocating)
    /// - `OutOfMemory`
    pub fn create_memory_object(&self, task: KernelObjectId, size: u64, flags: Flags) -> Result<Handle> {
        if size == 0 || size % Size4KiB::SIZE != 0 {
            return Err(KernelError::InvalidSize);
        }
        let mut objects = self.objects.lock();
        objects.task(task)?.handles.reserve(1)?;

        let start = self.pmm.lock().allocate_n::<Size4KiB>(size / Size4KiB::SIZE)?;
        let object = objects.create(KernelObject::MemoryObject(MemoryObject::owned(start, size / Size4KiB::SIZE, flags)));
        let handle = objects
            .task_mut(task)?
            .handles
            .insert(HandleEntry { object, rights: MEMORY_OBJECT_CREATOR_RIGHTS })?;

        debug!("{}: memory object {} ({:#x} bytes at {:#x}) as {:?}", task, object, size, start.start(), handle);
        Ok(handle)
    }

    /// Map the memory object behind `handle` into `task` at `address`
    ///
    /// The mapping is writable only if the object is and the handle carries
    /// `WRITE`; it takes its own reference on the object.
    ///
    /// # Errors
    /// - `InvalidHandle` / `AccessDenied` (needs `MAP`) / `WrongObjectType`
    /// - `InvalidAddress` / `AddressInUse`
    pub fn map_memory_object(&self, task: KernelObjectId, handle: Handle, address: VirtualAddress) -> Result<()> {
        let mut objects = self.objects.lock();

        let entry = objects.task(task)?.handles.resolve(handle, Capability::MAP)?;
        let memory_object = objects.memory_object(entry.object)?;
        let size = memory_object.size();
        let mut flags = memory_object.flags() | Flags::USER_ACCESSIBLE;
        if !entry.rights.contains(Capability::WRITE) {
            flags.remove(Flags::WRITABLE);
        }

        objects.task_mut(task)?.address_space.map(address, size, entry.object, flags)?;
        objects.retain(entry.object);
        trace!("{}: mapped {} at {:#x} ({:?})", task, entry.object, address, flags);
        Ok(())
    }

    /// Wrap memory the kernel does not own (loader images, the framebuffer)
    /// in a memory object and hand `task` a handle to it
    pub(crate) fn create_borrowed_memory_object(
        &self,
        task: KernelObjectId,
        physical_address: PhysicalAddress,
        size: u64,
        flags: Flags,
        rights: Capability,
    ) -> Result<Handle> {
        let mut objects = self.objects.lock();
        objects.task(task)?.handles.reserve(1)?;

        let object = objects.create(KernelObject::MemoryObject(MemoryObject::borrowed(physical_address, size, flags)));
        objects.task_mut(task)?.handles.insert(HandleEntry { object, rights })
    }

    /// Hand a task with `GET_FRAMEBUFFER` a memory object over the boot
    /// framebuffer
    ///
    /// # Errors
    /// - `MissingPrivilege`
    /// - `NotFound` if the loader set no video mode
    /// - `HandleTableFull`
    pub fn get_framebuffer(&self, task: KernelObjectId) -> Result<(Handle, hal::boot_info::VideoModeInfo)> {
        self.objects.lock().task(task)?.require(TaskPrivileges::GET_FRAMEBUFFER)?;
        let mode = self.framebuffer.ok_or(KernelError::NotFound)?;

        let handle = self.create_borrowed_memory_object(
            task,
            mode.framebuffer_address,
            mode.framebuffer_size().next_multiple_of(Size4KiB::SIZE),
            Flags::WRITABLE,
            Capability::READ | Capability::WRITE | Capability::MAP,
        )?;
        debug!("{}: framebuffer {}x{} as {:?}", task, mode.width, mode.height, handle);
        Ok((handle, mode))
    }
}
