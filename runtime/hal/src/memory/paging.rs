//! Frames, pages and the supported page-size classes
//!
//! A `Frame<S>` names a physically contiguous, `S`-aligned region of
//! `S::SIZE` bytes; a `Page<S>` is the virtual counterpart. Both are plain
//! values: owning the memory behind a frame is the allocator's business.

use super::{PhysicalAddress, VirtualAddress};
use bitflags::bitflags;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Add;

/// A page-size class supported by the paging hardware
pub trait FrameSize: Clone + Copy + fmt::Debug + PartialEq + Eq + PartialOrd + Ord {
    /// Size in bytes (also the required alignment)
    const SIZE: u64;

    /// Short human-readable name
    const NAME: &'static str;
}

/// 4KiB pages (leaf page-table entries)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Size4KiB {}

/// 2MiB large pages
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Size2MiB {}

/// 1GiB huge pages
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Size1GiB {}

impl FrameSize for Size4KiB {
    const SIZE: u64 = 0x1000;
    const NAME: &'static str = "4KiB";
}

impl FrameSize for Size2MiB {
    const SIZE: u64 = 0x20_0000;
    const NAME: &'static str = "2MiB";
}

impl FrameSize for Size1GiB {
    const SIZE: u64 = 0x4000_0000;
    const NAME: &'static str = "1GiB";
}

static_assertions::const_assert_eq!(Size2MiB::SIZE % Size4KiB::SIZE, 0);
static_assertions::const_assert_eq!(Size1GiB::SIZE % Size2MiB::SIZE, 0);

/// An address was not aligned to the size class it was used with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotAligned {
    /// The offending address
    pub address: u64,
    /// The alignment that was required
    pub alignment: u64,
}

/// A physical frame of size class `S`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame<S: FrameSize = Size4KiB> {
    start: PhysicalAddress,
    _size: PhantomData<S>,
}

impl<S: FrameSize> Frame<S> {
    /// The frame starting exactly at `address`
    pub fn starts_with(address: PhysicalAddress) -> Result<Self, NotAligned> {
        if !address.is_aligned(S::SIZE) {
            return Err(NotAligned { address: address.as_u64(), alignment: S::SIZE });
        }

        Ok(Self { start: address, _size: PhantomData })
    }

    /// The frame containing `address`
    pub fn containing(address: PhysicalAddress) -> Self {
        Self { start: address.align_down(S::SIZE), _size: PhantomData }
    }

    /// First byte of the frame
    #[inline]
    pub fn start(&self) -> PhysicalAddress {
        self.start
    }

    /// One past the last byte of the frame, as a raw address
    #[inline]
    pub fn end(&self) -> u64 {
        self.start.as_u64() + S::SIZE
    }

    /// Size of the frame in bytes
    #[inline]
    pub const fn size(&self) -> u64 {
        S::SIZE
    }

    /// The frame `count` frames further on, or `None` past the physical range
    pub fn checked_add(self, count: u64) -> Option<Self> {
        let start = self.start.checked_add(count.checked_mul(S::SIZE)?)?;
        Some(Self { start, _size: PhantomData })
    }
}

impl<S: FrameSize> Add<u64> for Frame<S> {
    type Output = Frame<S>;

    fn add(self, count: u64) -> Frame<S> {
        match self.checked_add(count) {
            Some(frame) => frame,
            None => panic!("frame arithmetic left the physical address range"),
        }
    }
}

impl<S: FrameSize> fmt::Debug for Frame<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame<{}>({:#x})", S::NAME, self.start)
    }
}

/// A virtual page of size class `S`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page<S: FrameSize = Size4KiB> {
    start: VirtualAddress,
    _size: PhantomData<S>,
}

impl<S: FrameSize> Page<S> {
    /// The page starting exactly at `address`
    pub fn starts_with(address: VirtualAddress) -> Result<Self, NotAligned> {
        if !address.is_aligned(S::SIZE) {
            return Err(NotAligned { address: address.as_u64(), alignment: S::SIZE });
        }

        Ok(Self { start: address, _size: PhantomData })
    }

    /// The page containing `address`
    pub fn containing(address: VirtualAddress) -> Self {
        Self { start: address.align_down(S::SIZE), _size: PhantomData }
    }

    #[inline]
    pub fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    pub const fn size(&self) -> u64 {
        S::SIZE
    }

    /// The page `count` pages further on, or `None` if that is not canonical
    pub fn checked_add(self, count: u64) -> Option<Self> {
        let start = self.start.checked_add(count.checked_mul(S::SIZE)?)?;
        Some(Self { start, _size: PhantomData })
    }
}

impl<S: FrameSize> Add<u64> for Page<S> {
    type Output = Page<S>;

    fn add(self, count: u64) -> Page<S> {
        match self.checked_add(count) {
            Some(page) => page,
            None => panic!("page arithmetic left the canonical address range"),
        }
    }
}

impl<S: FrameSize> fmt::Debug for Page<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page<{}>({:#x})", S::NAME, self.start)
    }
}

bitflags! {
    /// Attributes of a mapping
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        /// Writes are allowed
        const WRITABLE = 1 << 0;
        /// Instruction fetches are allowed
        const EXECUTABLE = 1 << 1;
        /// Accessible from user mode
        const USER_ACCESSIBLE = 1 << 2;
        /// Normal cacheable memory (clear for device memory and framebuffers)
        const CACHED = 1 << 3;
    }
}
