//! Physical memory manager
//!
//! Tracks free physical memory as a list of holes: contiguous free regions,
//! kept sorted by base address and never touching each other. Frames of any
//! size class are carved out of the first hole that can hold them once
//! aligned, and freed frames are merged back with whatever holes they touch.
//!
//! # Design
//! - First fit in ascending address order
//! - Allocation splits a hole into at most two remainders: alignment padding
//!   in front and the tail behind
//! - Freeing coalesces with both neighbours, regardless of the size class the
//!   neighbouring memory was allocated with
//! - Freeing memory that is already free or that was never managed is a
//!   kernel bug and panics

use alloc::vec::Vec;
use hal::boot_info::{MemoryMapEntry, MemoryType};
use hal::memory::{Frame, FrameSize, PhysicalAddress, Size4KiB};
use log::{debug, trace, warn};
use thiserror::Error;

/// A contiguous free region of physical memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoleInfo {
    pub base: PhysicalAddress,
    pub size: u64,
}

impl HoleInfo {
    /// One past the last free byte, as a raw address
    #[inline]
    pub fn end(&self) -> u64 {
        self.base.as_u64() + self.size
    }

    fn new(base: u64, size: u64) -> Self {
        // Every hole lies inside a region that was validated on the way in
        Self { base: PhysicalAddress::new(base).unwrap_or_default(), size }
    }
}

/// Errors returned by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("no hole can satisfy the request")]
    OutOfMemory,

    #[error("zero frames requested")]
    ZeroSized,
}

/// Hole-list physical memory allocator
pub struct PhysicalMemoryManager {
    /// Free memory, sorted by base, no two holes adjacent or overlapping
    holes: Vec<HoleInfo>,

    /// Managed memory, sorted by base, touching regions merged
    regions: Vec<HoleInfo>,

    total_bytes: u64,
    free_bytes: u64,
}

impl PhysicalMemoryManager {
    /// Create an allocator that manages no memory yet
    pub const fn new() -> Self {
        Self { holes: Vec::new(), regions: Vec::new(), total_bytes: 0, free_bytes: 0 }
    }

    /// Create an allocator from the boot memory map
    ///
    /// Only `Conventional` entries are used; everything else is already
    /// spoken for.
    pub fn from_memory_map(entries: &[MemoryMapEntry]) -> Self {
        let mut pmm = Self::new();
        for entry in entries.iter().filter(|entry| entry.memory_type == MemoryType::Conventional) {
            pmm.add_region(entry.start, entry.size);
        }
        debug!(
            "Physical memory: {} KiB usable in {} hole(s)",
            pmm.total_bytes / 1024,
            pmm.holes.len()
        );
        pmm
    }

    /// Add a physical memory region to the allocator
    ///
    /// The region is trimmed inwards to 4KiB boundaries. A region that is too
    /// small after trimming, or that overlaps memory already managed, is
    /// rejected with a warning.
    ///
    /// # Arguments
    /// - `base`: Physical address of the start of the region
    /// - `size`: Size of the region in bytes
    ///
    /// # Returns
    /// The number of bytes actually added
    pub fn add_region(&mut self, base: PhysicalAddress, size: u64) -> u64 {
        let start = match base.align_up(Size4KiB::SIZE) {
            Some(start) => start.as_u64(),
            None => {
                warn!("Ignoring memory region at {:#x}: past the physical range", base);
                return 0;
            }
        };
        let end = match base.checked_add(size) {
            Some(end) => end.align_down(Size4KiB::SIZE).as_u64(),
            None => {
                warn!("Ignoring memory region at {:#x} (size {:#x}): past the physical range", base, size);
                return 0;
            }
        };

        if end <= start {
            warn!("Ignoring memory region at {:#x} (size {:#x}): smaller than a frame", base, size);
            return 0;
        }

        if self.regions.iter().any(|region| start < region.end() && region.base.as_u64() < end) {
            warn!("Ignoring memory region {:#x}..{:#x}: overlaps managed memory", start, end);
            return 0;
        }

        let region = HoleInfo::new(start, end - start);
        let index = self.regions.partition_point(|existing| existing.base.as_u64() < start);
        self.regions.insert(index, region);

        // Touching regions become one, so no hole straddles two
        if index + 1 < self.regions.len() && self.regions[index].end() == self.regions[index + 1].base.as_u64() {
            let next = self.regions.remove(index + 1);
            self.regions[index].size += next.size;
        }
        if index > 0 && self.regions[index - 1].end() == start {
            let merged = self.regions.remove(index);
            self.regions[index - 1].size += merged.size;
        }

        self.insert_hole(start, end);
        self.total_bytes += region.size;
        self.free_bytes += region.size;

        trace!("Added memory region {:#x}..{:#x}", start, end);
        region.size
    }

    /// Allocate a single frame of size class `S`
    pub fn allocate<S: FrameSize>(&mut self) -> Result<Frame<S>, AllocationError> {
        self.allocate_n::<S>(1)
    }

    /// Allocate `count` physically contiguous frames of size class `S`
    ///
    /// # Returns
    /// The first frame of the run
    ///
    /// # Errors
    /// - `ZeroSized` if `count` is 0
    /// - `OutOfMemory` if no hole holds `count` aligned frames
    pub fn allocate_n<S: FrameSize>(&mut self, count: u64) -> Result<Frame<S>, AllocationError> {
        if count == 0 {
            return Err(AllocationError::ZeroSized);
        }
        let bytes = count.checked_mul(S::SIZE).ok_or(AllocationError::OutOfMemory)?;
        if bytes > self.free_bytes {
            return Err(AllocationError::OutOfMemory);
        }

        for index in 0..self.holes.len() {
            let hole = self.holes[index];
            let Some(aligned) = hole.base.align_up(S::SIZE) else {
                continue;
            };
            let Some(run_end) = aligned.as_u64().checked_add(bytes) else {
                continue;
            };
            if run_end > hole.end() {
                continue;
            }

            let front = HoleInfo::new(hole.base.as_u64(), aligned.as_u64() - hole.base.as_u64());
            let tail = HoleInfo::new(run_end, hole.end() - run_end);
            match (front.size > 0, tail.size > 0) {
                (true, true) => {
                    self.holes[index] = front;
                    self.holes.insert(index + 1, tail);
                }
                (true, false) => self.holes[index] = front,
                (false, true) => self.holes[index] = tail,
                (false, false) => {
                    self.holes.remove(index);
                }
            }

            self.free_bytes -= bytes;
            trace!("Allocated {} x {} frame(s) at {:#x}", count, S::NAME, aligned);
            return Ok(Frame::containing(aligned));
        }

        Err(AllocationError::OutOfMemory)
    }

    /// Free a single frame
    ///
    /// # Panics
    /// If the frame is already free or was never managed by this allocator
    pub fn free<S: FrameSize>(&mut self, frame: Frame<S>) {
        self.free_n(frame, 1);
    }

    /// Free `count` contiguous frames starting at `start`
    ///
    /// # Panics
    /// If any part of the run is already free or was never managed by this
    /// allocator
    pub fn free_n<S: FrameSize>(&mut self, start: Frame<S>, count: u64) {
        if count == 0 {
            return;
        }

        let base = start.start().as_u64();
        let end = match count.checked_mul(S::SIZE).and_then(|bytes| base.checked_add(bytes)) {
            Some(end) => end,
            None => panic!("freeing {} x {} frames at {:#x} overflows", count, S::NAME, base),
        };

        if !self.regions.iter().any(|region| region.base.as_u64() <= base && end <= region.end()) {
            panic!("freeing {:#x}..{:#x}, which is not managed memory", base, end);
        }
        if self.holes.iter().any(|hole| base < hole.end() && hole.base.as_u64() < end) {
            panic!("double free of {:#x}..{:#x}", base, end);
        }

        self.insert_hole(base, end);
        self.free_bytes += end - base;
        trace!("Freed {} x {} frame(s) at {:#x}", count, S::NAME, base);
    }

    /// Insert `start..end` into the hole list, merging with touching holes
    ///
    /// The range must not overlap any existing hole.
    fn insert_hole(&mut self, start: u64, end: u64) {
        let index = self.holes.partition_point(|hole| hole.base.as_u64() < start);

        let joins_previous = index > 0 && self.holes[index - 1].end() == start;
        let joins_next = index < self.holes.len() && self.holes[index].base.as_u64() == end;

        match (joins_previous, joins_next) {
            (true, true) => {
                let next = self.holes.remove(index);
                self.holes[index - 1].size += (end - start) + next.size;
            }
            (true, false) => self.holes[index - 1].size += end - start,
            (false, true) => self.holes[index] = HoleInfo::new(start, (end - start) + self.holes[index].size),
            (false, false) => self.holes.insert(index, HoleInfo::new(start, end - start)),
        }
    }

    /// Total bytes under management
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes currently free
    #[inline]
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    /// Bytes currently handed out
    #[inline]
    pub fn allocated_bytes(&self) -> u64 {
        self.total_bytes - self.free_bytes
    }

    /// The current hole list, ascending by base
    #[inline]
    pub fn holes(&self) -> &[HoleInfo] {
        &self.holes
    }

    /// The managed regions, ascending by base
    #[inline]
    pub fn regions(&self) -> &[HoleInfo] {
        &self.regions
    }
}

impl Default for PhysicalMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}
