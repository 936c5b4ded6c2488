//! Address and frame model
//!
//! Everything here is a value type: addresses, frames and pages carry no
//! ownership. The kernel's physical memory manager decides who owns a frame.

pub mod address;
pub mod paging;

pub use address::{PhysicalAddress, VirtualAddress, PHYSICAL_ADDRESS_BITS, VIRTUAL_ADDRESS_BITS};
pub use paging::{Flags, Frame, FrameSize, NotAligned, Page, Size1GiB, Size2MiB, Size4KiB};
