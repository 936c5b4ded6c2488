//! Handle table and object lifetime tests

mod common;

use common::{assert_invariants, kernel_with, new_kernel};
use kernel::{KernelConfig, KernelError};
use libpebble::{Capability, Handle, TaskPrivileges};

#[test]
fn test_first_handle_is_one() {
    let kernel = new_kernel();
    let task = kernel.spawn_task("first", TaskPrivileges::empty()).unwrap();
    assert_eq!(kernel.create_channel(task).unwrap(), Handle(1));
    assert_eq!(kernel.create_channel(task).unwrap(), Handle(2));
    assert_eq!(kernel.resolve(task, Handle::ZERO, Capability::empty()), Err(KernelError::InvalidHandle));
    assert_invariants(&kernel);
}

#[test]
fn test_duplicate_only_narrows() {
    let kernel = new_kernel();
    let task = kernel.spawn_task("narrow", TaskPrivileges::empty()).unwrap();
    let channel = kernel.create_channel(task).unwrap();
    let object = kernel.resolve(task, channel, Capability::empty()).unwrap().object;

    let send_only = kernel.duplicate(task, channel, Capability::SEND).unwrap();
    assert_eq!(kernel.resolve(task, send_only, Capability::SEND).unwrap().object, object);
    assert_eq!(kernel.resolve(task, send_only, Capability::RECEIVE), Err(KernelError::AccessDenied));
    assert_eq!(kernel.ref_count(object), Some(2));

    // No DUPLICATE right on the narrowed handle
    assert_eq!(kernel.duplicate(task, send_only, Capability::SEND), Err(KernelError::AccessDenied));

    // MAP was never held
    assert_eq!(
        kernel.duplicate(task, channel, Capability::SEND | Capability::MAP),
        Err(KernelError::CapabilityEscalation)
    );
    assert_eq!(kernel.ref_count(object), Some(2));
    assert_invariants(&kernel);
}

#[test]
fn test_duplicate_into_other_task() {
    let kernel = new_kernel();
    let owner = kernel.spawn_task("owner", TaskPrivileges::empty()).unwrap();
    let peer = kernel.spawn_task("peer", TaskPrivileges::empty()).unwrap();
    let channel = kernel.create_channel(owner).unwrap();

    let given = kernel.duplicate_into(owner, channel, peer, Capability::RECEIVE).unwrap();
    assert_eq!(given, Handle(1));
    assert_eq!(
        kernel.resolve(peer, given, Capability::RECEIVE).unwrap().object,
        kernel.resolve(owner, channel, Capability::empty()).unwrap().object
    );
    assert_invariants(&kernel);
}

#[test]
fn test_close_destroys_on_last_reference() {
    let kernel = new_kernel();
    let task = kernel.spawn_task("closer", TaskPrivileges::empty()).unwrap();
    let channel = kernel.create_channel(task).unwrap();
    let object = kernel.resolve(task, channel, Capability::empty()).unwrap().object;
    let copy = kernel.duplicate(task, channel, Capability::SEND).unwrap();

    kernel.close_handle(task, channel).unwrap();
    assert!(kernel.object_exists(object));
    assert_eq!(kernel.ref_count(object), Some(1));

    kernel.close_handle(task, copy).unwrap();
    assert!(!kernel.object_exists(object));
    assert_eq!(kernel.close_handle(task, copy), Err(KernelError::InvalidHandle));
    assert_invariants(&kernel);
}

#[test]
fn test_object_ids_are_not_reused() {
    let kernel = new_kernel();
    let task = kernel.spawn_task("ids", TaskPrivileges::empty()).unwrap();

    let first = kernel.create_channel(task).unwrap();
    let first_id = kernel.resolve(task, first, Capability::empty()).unwrap().object;
    kernel.close_handle(task, first).unwrap();

    let second = kernel.create_channel(task).unwrap();
    let second_id = kernel.resolve(task, second, Capability::empty()).unwrap().object;
    // The handle slot is reused, the object id is not
    assert_eq!(first, second);
    assert!(second_id > first_id);
}

#[test]
fn test_full_table_creates_nothing() {
    let config = KernelConfig { max_handles_per_task: 3, ..KernelConfig::default() };
    let kernel = kernel_with(config, 0x10_0000);
    let task = kernel.spawn_task("small", TaskPrivileges::empty()).unwrap();

    kernel.create_channel(task).unwrap();
    kernel.create_channel(task).unwrap();
    let objects = kernel.object_count();
    let free = kernel.memory_stats().free_bytes;

    assert_eq!(kernel.create_channel(task), Err(KernelError::HandleTableFull));
    assert_eq!(
        kernel.create_memory_object(task, 0x1000, hal::memory::Flags::WRITABLE),
        Err(KernelError::HandleTableFull)
    );
    assert_eq!(kernel.object_count(), objects);
    assert_eq!(kernel.memory_stats().free_bytes, free);
    assert_invariants(&kernel);
}

#[test]
fn test_handles_are_task_local() {
    let kernel = new_kernel();
    let a = kernel.spawn_task("a", TaskPrivileges::empty()).unwrap();
    let b = kernel.spawn_task("b", TaskPrivileges::empty()).unwrap();
    let channel = kernel.create_channel(a).unwrap();

    assert_eq!(kernel.resolve(b, channel, Capability::empty()), Err(KernelError::InvalidHandle));
    assert_eq!(kernel.close_handle(b, channel), Err(KernelError::InvalidHandle));
    assert!(kernel.resolve(a, channel, Capability::SEND).is_ok());
}
