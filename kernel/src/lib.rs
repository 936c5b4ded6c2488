//! Pebble kernel core
//!
//! # Purpose
//! A capability-based object manager for a small microkernel: physical and
//! virtual memory bookkeeping, a reference-counted kernel object table,
//! per-task handle tables, task lifecycle, bounded message channels and a
//! service registry, behind a syscall surface defined by `libpebble`.
//!
//! # Integration Points
//! - Consumes: `hal::boot_info::BootInfo` from the loader
//! - Provides: [`Kernel`], whose methods are the kernel operations, and
//!   [`Kernel::handle_syscall`] for the architecture layer's trap handler
//! - Page-table writes and context switches are the architecture layer's
//!
//! # Architecture
//! One lock per table, always taken in this order:
//!
//! ```text
//! registry → objects → pmm → scheduler
//! ```
//!
//! Per-task handle tables and address spaces live inside task objects, under
//! the object table lock. Frames released by destroying objects are returned
//! to the allocator only after the object lock is dropped.

#![no_std]

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod config;
pub mod error;
pub mod handle;
pub mod invariants;
pub mod ipc;
pub mod logger;
pub mod memory;
pub mod object;
pub mod scheduler;
pub mod service;
pub mod syscall;

pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use handle::{HandleEntry, HandleTable};
pub use ipc::{Received, ReceivedMessage};
pub use object::{KernelObjectId, TaskBlock, TaskState};
pub use service::ServiceInfo;
pub use syscall::{SyscallContext, UserMemory};

use hal::boot_info::{BootInfo, VideoModeInfo};
use hal::memory::{Flags, FrameSize, PhysicalAddress, Size4KiB};
use libpebble::{Capability, TaskPrivileges};
use log::{info, trace};
use memory::PhysicalMemoryManager;
use object::{ObjectTable, Reclaim};
use scheduler::Scheduler;
use service::ServiceRegistry;
use spin::Mutex;

/// Kernel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Snapshot of physical memory accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub allocated_bytes: u64,
}

/// The kernel: every table, each behind its own lock
pub struct Kernel {
    config: KernelConfig,
    registry: Mutex<ServiceRegistry>,
    objects: Mutex<ObjectTable>,
    pmm: Mutex<PhysicalMemoryManager>,
    scheduler: Mutex<Scheduler>,
    framebuffer: Option<VideoModeInfo>,
}

impl Kernel {
    /// Create a kernel with no memory and no tasks
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation
    pub fn new(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Mutex::new(ServiceRegistry::new()),
            objects: Mutex::new(ObjectTable::new()),
            pmm: Mutex::new(PhysicalMemoryManager::new()),
            scheduler: Mutex::new(Scheduler::new()),
            framebuffer: None,
        })
    }

    /// Bring the kernel up from what the loader handed over
    ///
    /// Seeds the allocator from the `Conventional` entries of the memory map,
    /// remembers the video mode, and spawns one task per loaded image with
    /// each segment mapped at its virtual address. The segments stay owned
    /// by the loader's memory map entries; their memory objects never free
    /// them.
    ///
    /// # Errors
    /// - `InvalidConfig` for a bad config or boot info magic
    /// - `InvalidAddress` / `AddressInUse` for malformed image segments
    pub fn from_boot_info(config: KernelConfig, boot_info: &BootInfo) -> Result<Self> {
        if !boot_info.is_valid() {
            return Err(KernelError::InvalidConfig("boot info magic does not match"));
        }

        let mut kernel = Self::new(config)?;
        *kernel.pmm.get_mut() = PhysicalMemoryManager::from_memory_map(boot_info.memory_map());
        kernel.framebuffer = boot_info.video_mode;

        let stats = kernel.memory_stats();
        info!("Pebble kernel v{}: {} KiB of physical memory", VERSION, stats.total_bytes / 1024);

        for image in boot_info.loaded_images() {
            let privileges = TaskPrivileges::from_bits_truncate(image.privileges);
            let task = kernel.spawn_task(image.name(), privileges)?;

            for segment in image.segments() {
                let mut rights = Capability::READ | Capability::MAP;
                if segment.flags.contains(Flags::WRITABLE) {
                    rights |= Capability::WRITE;
                }
                let size = segment.size.checked_next_multiple_of(Size4KiB::SIZE).ok_or(KernelError::InvalidAddress)?;
                let handle =
                    kernel.create_borrowed_memory_object(task, segment.physical_address, size, segment.flags, rights)?;
                kernel.map_memory_object(task, handle, segment.virtual_address)?;
                kernel.close_handle(task, handle)?;
            }
        }

        Ok(kernel)
    }

    /// Hand a region of physical memory to the allocator
    ///
    /// # Returns
    /// Bytes actually added after trimming (0 if the region was rejected)
    pub fn add_memory_region(&self, base: PhysicalAddress, size: u64) -> u64 {
        self.pmm.lock().add_region(base, size)
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The video mode the loader left behind, if any
    #[inline]
    pub fn video_mode(&self) -> Option<VideoModeInfo> {
        self.framebuffer
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let pmm = self.pmm.lock();
        MemoryStats {
            total_bytes: pmm.total_bytes(),
            free_bytes: pmm.free_bytes(),
            allocated_bytes: pmm.allocated_bytes(),
        }
    }

    /// Number of live kernel objects
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Reference count of a live object
    pub fn ref_count(&self, object: KernelObjectId) -> Option<usize> {
        self.objects.lock().ref_count(object)
    }

    /// Whether `object` is still alive
    pub fn object_exists(&self, object: KernelObjectId) -> bool {
        self.objects.lock().contains(object)
    }

    /// Flags `task` has the memory object at `address` mapped with
    pub fn mapping_flags(&self, task: KernelObjectId, address: hal::memory::VirtualAddress) -> Result<Flags> {
        let objects = self.objects.lock();
        let mapping = objects.task(task)?.address_space.mapping_at(address).ok_or(KernelError::InvalidAddress)?;
        Ok(mapping.flags)
    }

    /// Act on what destroying objects left behind
    ///
    /// Must be called without the object table lock held.
    fn finish(&self, reclaim: Reclaim) {
        if !reclaim.frames.is_empty() {
            let mut pmm = self.pmm.lock();
            for (start, count) in reclaim.frames {
                pmm.free_n(start, count);
            }
        }

        if !reclaim.wake.is_empty() {
            let mut objects = self.objects.lock();
            let mut scheduler = self.scheduler.lock();
            for task in reclaim.wake {
                if let Err(error) = scheduler::wake_locked(&mut objects, &mut scheduler, task) {
                    trace!("{}: not woken after destruction ({})", task, error);
                }
            }
        }
    }
}

static_assertions::assert_impl_all!(Kernel: Send, Sync);
