//! Type-safe physical and virtual addresses
//!
//! Both address types are plain `Copy` values over a `u64`. Construction is
//! checked: physical addresses must fit the paging hardware's physical width,
//! and virtual addresses must be canonical (bits 48..64 copy bit 47).

use core::fmt;

/// Number of significant bits in a physical address
pub const PHYSICAL_ADDRESS_BITS: u32 = 52;

/// Number of significant bits in a virtual address before sign extension
pub const VIRTUAL_ADDRESS_BITS: u32 = 48;

/// A physical memory address
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create a physical address, or `None` if it is wider than the hardware allows
    pub const fn new(address: u64) -> Option<Self> {
        if address >> PHYSICAL_ADDRESS_BITS == 0 {
            Some(Self(address))
        } else {
            None
        }
    }

    /// Get the raw address
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check whether the address is a multiple of `align` (a power of two)
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }

    /// Round down to a multiple of `align` (a power of two)
    #[inline]
    pub const fn align_down(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    /// Round up to a multiple of `align`, or `None` if that leaves the physical range
    pub fn align_up(self, align: u64) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        let rounded = self.0.checked_add(align - 1)? & !(align - 1);
        Self::new(rounded)
    }

    /// Offset the address by `bytes`, staying inside the physical range
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        Self::new(self.0.checked_add(bytes)?)
    }

    /// Distance in bytes from `base` up to this address
    pub fn offset_from(self, base: PhysicalAddress) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl From<PhysicalAddress> for u64 {
    fn from(address: PhysicalAddress) -> u64 {
        address.0
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#x})", self.0)
    }
}

impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A virtual memory address
///
/// Always canonical. The lower half (bit 47 clear) is user space; the upper
/// half belongs to the kernel.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create a virtual address, or `None` if it is not canonical
    pub const fn new(address: u64) -> Option<Self> {
        if Self::is_canonical(address) {
            Some(Self(address))
        } else {
            None
        }
    }

    /// Create a virtual address by sign-extending bit 47 into the upper bits
    pub const fn new_canonicalise(address: u64) -> Self {
        let shift = 64 - VIRTUAL_ADDRESS_BITS;
        Self((((address << shift) as i64) >> shift) as u64)
    }

    const fn is_canonical(address: u64) -> bool {
        let upper = address >> (VIRTUAL_ADDRESS_BITS - 1);
        upper == 0 || upper == (u64::MAX >> (VIRTUAL_ADDRESS_BITS - 1))
    }

    /// Get the raw address
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether the address lies in the user half of the address space
    #[inline]
    pub const fn is_in_lower_half(self) -> bool {
        self.0 >> (VIRTUAL_ADDRESS_BITS - 1) == 0
    }

    /// Check whether the address is a multiple of `align` (a power of two)
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }

    /// Round down to a multiple of `align` (a power of two)
    #[inline]
    pub const fn align_down(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    /// Round up to a multiple of `align`, or `None` if the result is not canonical
    pub fn align_up(self, align: u64) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        let rounded = self.0.checked_add(align - 1)? & !(align - 1);
        Self::new(rounded)
    }

    /// Offset the address by `bytes`, staying canonical
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        Self::new(self.0.checked_add(bytes)?)
    }

    /// Distance in bytes from `base` up to this address
    pub fn offset_from(self, base: VirtualAddress) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl From<VirtualAddress> for u64 {
    fn from(address: VirtualAddress) -> u64 {
        address.0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({:#x})", self.0)
    }
}

impl fmt::LowerHex for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

static_assertions::assert_eq_size!(PhysicalAddress, u64);
static_assertions::assert_eq_size!(VirtualAddress, u64);
