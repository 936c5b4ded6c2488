//! Memory objects, mappings and boot

mod common;

use common::{assert_invariants, kernel_with, new_kernel};
use hal::boot_info::{BootInfo, LoadedImage, MemoryMapEntry, MemoryType, PixelFormat, Segment, VideoModeInfo};
use hal::memory::{Flags, PhysicalAddress, VirtualAddress};
use kernel::{Kernel, KernelConfig, KernelError, TaskState};
use libpebble::{Capability, TaskPrivileges};

fn virt(address: u64) -> VirtualAddress {
    VirtualAddress::new(address).unwrap()
}

fn phys(address: u64) -> PhysicalAddress {
    PhysicalAddress::new(address).unwrap()
}

#[test]
fn test_memory_object_sizes() {
    let kernel = kernel_with(KernelConfig::default(), 0x4000);
    let task = kernel.spawn_task("sizes", TaskPrivileges::empty()).unwrap();

    assert_eq!(kernel.create_memory_object(task, 0, Flags::empty()), Err(KernelError::InvalidSize));
    assert_eq!(kernel.create_memory_object(task, 0x1800, Flags::empty()), Err(KernelError::InvalidSize));
    assert_eq!(kernel.create_memory_object(task, 0x5000, Flags::empty()), Err(KernelError::OutOfMemory));

    kernel.create_memory_object(task, 0x4000, Flags::WRITABLE).unwrap();
    assert_eq!(kernel.memory_stats().free_bytes, 0);
    assert_eq!(kernel.memory_stats().allocated_bytes, 0x4000);
    assert_invariants(&kernel);
}

#[test]
fn test_mapping_flags_follow_rights() {
    let kernel = new_kernel();
    let task = kernel.spawn_task("mapper", TaskPrivileges::empty()).unwrap();
    let memory = kernel.create_memory_object(task, 0x2000, Flags::WRITABLE).unwrap();
    let read_only = kernel.duplicate(task, memory, Capability::READ | Capability::MAP).unwrap();

    kernel.map_memory_object(task, memory, virt(0x40_0000)).unwrap();
    kernel.map_memory_object(task, read_only, virt(0x50_0000)).unwrap();

    assert_eq!(kernel.mapping_flags(task, virt(0x40_1000)), Ok(Flags::WRITABLE | Flags::USER_ACCESSIBLE));
    assert_eq!(kernel.mapping_flags(task, virt(0x50_0000)), Ok(Flags::USER_ACCESSIBLE));
    assert_eq!(kernel.mapping_flags(task, virt(0x60_0000)), Err(KernelError::InvalidAddress));

    let object = kernel.resolve(task, memory, Capability::empty()).unwrap().object;
    assert_eq!(kernel.ref_count(object), Some(4));
    assert_invariants(&kernel);
}

#[test]
fn test_map_rejections() {
    let kernel = new_kernel();
    let task = kernel.spawn_task("mapper", TaskPrivileges::empty()).unwrap();
    let memory = kernel.create_memory_object(task, 0x2000, Flags::empty()).unwrap();
    let no_map = kernel.duplicate(task, memory, Capability::READ).unwrap();
    let channel = kernel.create_channel(task).unwrap();

    kernel.map_memory_object(task, memory, virt(0x40_0000)).unwrap();
    assert_eq!(kernel.map_memory_object(task, memory, virt(0x40_1000)), Err(KernelError::AddressInUse));
    assert_eq!(kernel.map_memory_object(task, memory, virt(0x40_0800)), Err(KernelError::InvalidAddress));
    assert_eq!(
        kernel.map_memory_object(task, memory, virt(0xffff_8000_0000_0000)),
        Err(KernelError::InvalidAddress)
    );
    assert_eq!(kernel.map_memory_object(task, no_map, virt(0x80_0000)), Err(KernelError::AccessDenied));

    let channel_object = kernel.resolve(task, channel, Capability::empty()).unwrap().object;
    let fake = kernel.create_handle(task, channel_object, Capability::MAP).unwrap();
    assert_eq!(kernel.map_memory_object(task, fake, virt(0x80_0000)), Err(KernelError::WrongObjectType));
    assert_invariants(&kernel);
}

#[test]
fn test_exit_reclaims_everything() {
    let kernel = new_kernel();
    let free_before = kernel.memory_stats().free_bytes;
    let task = kernel.spawn_task("leaky", TaskPrivileges::empty()).unwrap();

    let memory = kernel.create_memory_object(task, 0x8000, Flags::WRITABLE).unwrap();
    kernel.map_memory_object(task, memory, virt(0x40_0000)).unwrap();
    kernel.create_memory_object(task, 0x1000, Flags::empty()).unwrap();
    kernel.create_channel(task).unwrap();
    assert_eq!(kernel.memory_stats().free_bytes, free_before - 0x9000);

    kernel.exit_task(task, 3).unwrap();
    assert_eq!(kernel.memory_stats().free_bytes, free_before);
    assert_eq!(kernel.object_count(), 0);
    assert_eq!(kernel.task_state(task), Err(KernelError::NotFound));
    assert_invariants(&kernel);
}

#[test]
fn test_mapping_outlives_handle() {
    let kernel = new_kernel();
    let free_before = kernel.memory_stats().free_bytes;
    let task = kernel.spawn_task("mapper", TaskPrivileges::empty()).unwrap();
    let memory = kernel.create_memory_object(task, 0x1000, Flags::WRITABLE).unwrap();
    let object = kernel.resolve(task, memory, Capability::empty()).unwrap().object;

    kernel.map_memory_object(task, memory, virt(0x40_0000)).unwrap();
    kernel.close_handle(task, memory).unwrap();
    assert!(kernel.object_exists(object));
    assert_eq!(kernel.memory_stats().free_bytes, free_before - 0x1000);

    kernel.kill_task(task).unwrap();
    assert!(!kernel.object_exists(object));
    assert_eq!(kernel.memory_stats().free_bytes, free_before);
}

#[test]
fn test_framebuffer_access() {
    let mut boot_info = BootInfo::new();
    boot_info
        .add_memory_map_entry(MemoryMapEntry { memory_type: MemoryType::Conventional, start: phys(0x10_0000), size: 0x10_0000 })
        .unwrap();
    boot_info.video_mode = Some(VideoModeInfo {
        framebuffer_address: phys(0xfd00_0000),
        pixel_format: PixelFormat::Bgr32,
        width: 800,
        height: 600,
        stride: 800,
    });
    let kernel = Kernel::from_boot_info(KernelConfig::default(), &boot_info).unwrap();

    let plain = kernel.spawn_task("plain", TaskPrivileges::empty()).unwrap();
    assert_eq!(kernel.get_framebuffer(plain), Err(KernelError::MissingPrivilege));

    let compositor = kernel.spawn_task("compositor", TaskPrivileges::GET_FRAMEBUFFER).unwrap();
    let (handle, mode) = kernel.get_framebuffer(compositor).unwrap();
    assert_eq!(mode.width, 800);
    kernel.map_memory_object(compositor, handle, virt(0x1000_0000)).unwrap();
    assert_eq!(
        kernel.mapping_flags(compositor, virt(0x1000_0000)),
        Ok(Flags::WRITABLE | Flags::USER_ACCESSIBLE)
    );

    // Borrowed memory never reaches the allocator
    let before = kernel.memory_stats();
    kernel.kill_task(compositor).unwrap();
    assert_eq!(kernel.memory_stats(), before);
    assert_invariants(&kernel);
}

#[test]
fn test_no_framebuffer() {
    let kernel = new_kernel();
    let task = kernel.spawn_task("compositor", TaskPrivileges::GET_FRAMEBUFFER).unwrap();
    assert_eq!(kernel.get_framebuffer(task), Err(KernelError::NotFound));
}

#[test]
fn test_boot_spawns_loaded_images() {
    let mut boot_info = BootInfo::new();
    boot_info
        .add_memory_map_entry(MemoryMapEntry { memory_type: MemoryType::Reserved, start: phys(0), size: 0x10_0000 })
        .unwrap();
    boot_info
        .add_memory_map_entry(MemoryMapEntry { memory_type: MemoryType::Conventional, start: phys(0x10_0000), size: 0x20_0000 })
        .unwrap();
    boot_info
        .add_memory_map_entry(MemoryMapEntry { memory_type: MemoryType::LoadedImage, start: phys(0x30_0000), size: 0x3000 })
        .unwrap();

    let mut image = LoadedImage::new("echo", virt(0x40_0000));
    image.privileges = (TaskPrivileges::SERVICE_PROVIDER | TaskPrivileges::EARLY_LOGGING).bits();
    image
        .add_segment(Segment {
            virtual_address: virt(0x40_0000),
            physical_address: phys(0x30_0000),
            size: 0x2000,
            flags: Flags::EXECUTABLE,
        })
        .unwrap();
    image
        .add_segment(Segment {
            virtual_address: virt(0x40_2000),
            physical_address: phys(0x30_2000),
            size: 0x800,
            flags: Flags::WRITABLE,
        })
        .unwrap();
    boot_info.add_loaded_image(image).unwrap();

    let kernel = Kernel::from_boot_info(KernelConfig::default(), &boot_info).unwrap();
    assert_eq!(kernel.memory_stats().total_bytes, 0x20_0000);
    assert_eq!(kernel.memory_stats().allocated_bytes, 0);

    let task = kernel.schedule().unwrap();
    assert_eq!(kernel.task_state(task), Ok(TaskState::Running));
    assert_eq!(kernel.mapping_flags(task, virt(0x40_1000)), Ok(Flags::EXECUTABLE | Flags::USER_ACCESSIBLE));
    assert_eq!(kernel.mapping_flags(task, virt(0x40_2fff)), Ok(Flags::WRITABLE | Flags::USER_ACCESSIBLE));
    // The segment handles were closed once mapped
    assert!(kernel.resolve(task, libpebble::Handle(1), Capability::empty()).is_err());

    let channel = kernel.create_channel(task).unwrap();
    kernel.register_service(task, "echo", channel).unwrap();
    assert_invariants(&kernel);
}

#[test]
fn test_boot_rejects_bad_magic() {
    let mut boot_info = BootInfo::new();
    boot_info.magic = 0xdead_beef;
    assert!(matches!(
        Kernel::from_boot_info(KernelConfig::default(), &boot_info),
        Err(KernelError::InvalidConfig(_))
    ));
}
