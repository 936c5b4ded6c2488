//! Per-task address space bookkeeping
//!
//! Records which memory objects a task has mapped where. Page tables are the
//! architecture layer's job; this module only guarantees the ranges it hands
//! out are page-aligned, confined to the user half, and never overlap.
//!
//! # Architecture
//! - One `AddressSpace` per task, owned by the task object
//! - Each mapping holds a reference on its memory object, released when the
//!   task dies

use crate::error::{KernelError, Result};
use crate::object::KernelObjectId;
use alloc::vec::Vec;
use hal::memory::{Flags, FrameSize, Size4KiB, VirtualAddress};

/// One mapped memory object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub start: VirtualAddress,
    /// Size in bytes, a multiple of 4KiB
    pub size: u64,
    pub object: KernelObjectId,
    pub flags: Flags,
}

impl Mapping {
    /// One past the last mapped byte, as a raw address
    #[inline]
    pub fn end(&self) -> u64 {
        self.start.as_u64() + self.size
    }

    #[inline]
    pub fn contains(&self, address: VirtualAddress) -> bool {
        self.start <= address && address.as_u64() < self.end()
    }
}

/// Virtual address space of a single task
#[derive(Debug, Default)]
pub struct AddressSpace {
    /// Sorted by start address, never overlapping
    mappings: Vec<Mapping>,
}

impl AddressSpace {
    pub const fn new() -> Self {
        Self { mappings: Vec::new() }
    }

    /// Check that `start..start + size` can be mapped
    ///
    /// # Errors
    /// - `InvalidAddress` if the range is unaligned, empty, or leaves the
    ///   user half
    /// - `AddressInUse` if it overlaps an existing mapping
    pub fn check_range(&self, start: VirtualAddress, size: u64) -> Result<()> {
        if size == 0 || !start.is_aligned(Size4KiB::SIZE) || size % Size4KiB::SIZE != 0 {
            return Err(KernelError::InvalidAddress);
        }

        // The last byte must still be a user address
        let last = start.checked_add(size - 1).ok_or(KernelError::InvalidAddress)?;
        if !start.is_in_lower_half() || !last.is_in_lower_half() {
            return Err(KernelError::InvalidAddress);
        }

        let end = start.as_u64() + size;
        if self.mappings.iter().any(|mapping| start.as_u64() < mapping.end() && mapping.start.as_u64() < end) {
            return Err(KernelError::AddressInUse);
        }

        Ok(())
    }

    /// Record a mapping of `object`
    ///
    /// The caller hands over one reference on `object` with the mapping.
    ///
    /// # Errors
    /// As [`AddressSpace::check_range`]; nothing is recorded on failure
    pub fn map(&mut self, start: VirtualAddress, size: u64, object: KernelObjectId, flags: Flags) -> Result<()> {
        self.check_range(start, size)?;

        let index = self.mappings.partition_point(|mapping| mapping.start < start);
        self.mappings.insert(index, Mapping { start, size, object, flags });
        Ok(())
    }

    /// The mapping covering `address`, if any
    pub fn mapping_at(&self, address: VirtualAddress) -> Option<&Mapping> {
        self.mappings.iter().find(|mapping| mapping.contains(address))
    }

    /// Remove every mapping, handing their references back to the caller
    pub fn take_mappings(&mut self) -> Vec<Mapping> {
        core::mem::take(&mut self.mappings)
    }

    #[inline]
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Total mapped bytes
    pub fn mapped_bytes(&self) -> u64 {
        self.mappings.iter().map(|mapping| mapping.size).sum()
    }
}
