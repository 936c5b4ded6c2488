//! Memory objects
//!
//! A physically contiguous run of memory that tasks can map. Objects created
//! by `create_memory_object` own their frames and give them back to the
//! allocator when destroyed; objects wrapping loader images or the
//! framebuffer only describe memory someone else owns.

use hal::memory::{Flags, Frame, FrameSize, PhysicalAddress, Size4KiB};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    physical_address: PhysicalAddress,
    size: u64,
    flags: Flags,
    owns_frames: bool,
}

impl MemoryObject {
    /// An object owning `count` frames starting at `start`
    pub fn owned(start: Frame<Size4KiB>, count: u64, flags: Flags) -> Self {
        Self { physical_address: start.start(), size: count * Size4KiB::SIZE, flags, owns_frames: true }
    }

    /// An object describing memory it does not own
    pub fn borrowed(physical_address: PhysicalAddress, size: u64, flags: Flags) -> Self {
        Self { physical_address, size, flags, owns_frames: false }
    }

    #[inline]
    pub fn physical_address(&self) -> PhysicalAddress {
        self.physical_address
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[inline]
    pub fn owns_frames(&self) -> bool {
        self.owns_frames
    }

    /// The frames to hand back on destruction, as `(first, count)`
    pub fn owned_frames(&self) -> Option<(Frame<Size4KiB>, u64)> {
        self.owns_frames
            .then(|| (Frame::containing(self.physical_address), self.size / Size4KiB::SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrowed_object_returns_no_frames() {
        let address = PhysicalAddress::new(0x8000_0000).unwrap();
        let object = MemoryObject::borrowed(address, 0x30_0000, Flags::WRITABLE);
        assert!(object.owned_frames().is_none());
        assert_eq!(object.size(), 0x30_0000);
    }

    #[test]
    fn test_owned_object_returns_its_run() {
        let frame = Frame::<Size4KiB>::containing(PhysicalAddress::new(0x20_0000).unwrap());
        let object = MemoryObject::owned(frame, 4, Flags::empty());
        assert_eq!(object.size(), 0x4000);
        assert_eq!(object.owned_frames(), Some((frame, 4)));
    }
}
