//! Pebble HAL - types shared between the loader and the kernel
//!
//! # Purpose
//! Provides the typed address model (physical/virtual addresses, frames and
//! pages of the three supported size classes) and the boot handoff structures
//! the loader fills in before jumping to the kernel.
//!
//! # Integration Points
//! - Depends on: `bitflags`, `static_assertions`
//! - Provides to: the kernel (allocator seeding, memory objects) and the loader

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod boot_info;
pub mod memory;

pub use memory::{
    Flags, Frame, FrameSize, Page, PhysicalAddress, Size1GiB, Size2MiB, Size4KiB,
    VirtualAddress,
};
