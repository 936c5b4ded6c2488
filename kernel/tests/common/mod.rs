//! Shared setup for the kernel integration tests

#![allow(dead_code)]

use hal::memory::PhysicalAddress;
use kernel::invariants::check_all;
use kernel::{Kernel, KernelConfig, KernelObjectId};
use libpebble::TaskPrivileges;

/// Base of the memory region handed to test kernels
pub const MEMORY_BASE: u64 = 0x10_0000;

/// A kernel with `bytes` of physical memory at [`MEMORY_BASE`]
pub fn kernel_with(config: KernelConfig, bytes: u64) -> Kernel {
    let kernel = Kernel::new(config).unwrap();
    assert_eq!(kernel.add_memory_region(PhysicalAddress::new(MEMORY_BASE).unwrap(), bytes), bytes);
    kernel
}

/// Default config, 1MiB of memory
pub fn new_kernel() -> Kernel {
    kernel_with(KernelConfig::default(), 0x10_0000)
}

pub fn all_privileges() -> TaskPrivileges {
    TaskPrivileges::all()
}

/// Schedule until `task` is the one Running
pub fn run(kernel: &Kernel, task: KernelObjectId) {
    for _ in 0..64 {
        if kernel.current_task() == Some(task) {
            return;
        }
        kernel.schedule();
    }
    panic!("{} never got scheduled", task);
}

pub fn assert_invariants(kernel: &Kernel) {
    let violations = check_all(kernel);
    assert!(violations.is_empty(), "invariant violations: {:#?}", violations);
}
