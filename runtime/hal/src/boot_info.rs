//! Boot Information Structure
//!
//! The loader fills in a `BootInfo` before handing control to the kernel. It
//! describes the physical memory map, the images the loader put in memory for
//! the initial tasks, and (optionally) the video mode it left the display in.
//!
//! The structure is fixed-size and `#[repr(C)]` so it can be placed at a known
//! physical address without any allocator on either side.

use crate::memory::{Flags, PhysicalAddress, VirtualAddress};
use core::mem::size_of;

/// Magic number to identify a valid boot info (ASCII: "PBBL")
pub const BOOT_INFO_MAGIC: u32 = 0x5042_424C;

/// Maximum number of memory map entries
pub const MAX_MEMORY_MAP_ENTRIES: usize = 64;

/// Maximum number of images the loader can hand over
pub const MAX_LOADED_IMAGES: usize = 16;

/// Maximum number of segments per image
pub const MAX_SEGMENTS: usize = 8;

/// Maximum length of an image name in bytes
pub const MAX_IMAGE_NAME_LEN: usize = 32;

/// What a region of physical memory is used for
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Free for the kernel to allocate
    Conventional = 0,
    /// Firmware-reserved or otherwise unusable
    Reserved = 1,
    /// ACPI tables, reclaimable once parsed
    AcpiReclaimable = 2,
    /// ACPI non-volatile storage
    AcpiNvs = 3,
    /// Still in use by firmware boot services
    UefiServices = 4,
    /// The kernel's own image
    KernelImage = 5,
    /// Page tables built by the loader for the kernel
    KernelPageTables = 6,
    /// Linear framebuffer memory
    FrameBuffer = 7,
    /// This structure
    BootInfo = 8,
    /// An image loaded for an initial task
    LoadedImage = 9,
}

/// One entry of the physical memory map
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapEntry {
    pub memory_type: MemoryType,
    pub start: PhysicalAddress,
    pub size: u64,
}

impl MemoryMapEntry {
    pub const EMPTY: MemoryMapEntry =
        MemoryMapEntry { memory_type: MemoryType::Reserved, start: PhysicalAddress::zero(), size: 0 };

    /// One past the last byte of the region, if it fits the physical range
    pub fn end(&self) -> Option<PhysicalAddress> {
        self.start.checked_add(self.size)
    }
}

/// A contiguous, identically-protected part of a loaded image
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Where the task expects to see the segment
    pub virtual_address: VirtualAddress,
    /// Where the loader put it
    pub physical_address: PhysicalAddress,
    /// Size in bytes, a multiple of 4KiB
    pub size: u64,
    pub flags: Flags,
}

impl Segment {
    pub const EMPTY: Segment = Segment {
        virtual_address: VirtualAddress::zero(),
        physical_address: PhysicalAddress::zero(),
        size: 0,
        flags: Flags::empty(),
    };
}

/// An image the loader placed in memory for an initial task
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    name: [u8; MAX_IMAGE_NAME_LEN],
    name_len: u8,
    num_segments: u8,
    segments: [Segment; MAX_SEGMENTS],
    pub entry_point: VirtualAddress,
    /// Privilege bits the image asks for, interpreted by the kernel
    pub privileges: u32,
}

impl LoadedImage {
    /// Create an image with no segments
    ///
    /// Names longer than `MAX_IMAGE_NAME_LEN` bytes are truncated at a
    /// character boundary.
    pub fn new(name: &str, entry_point: VirtualAddress) -> Self {
        let mut len = name.len().min(MAX_IMAGE_NAME_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }

        let mut bytes = [0u8; MAX_IMAGE_NAME_LEN];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);

        Self {
            name: bytes,
            name_len: len as u8,
            num_segments: 0,
            segments: [Segment::EMPTY; MAX_SEGMENTS],
            entry_point,
            privileges: 0,
        }
    }

    pub fn name(&self) -> &str {
        // Only ever filled from a `&str` cut at a char boundary
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    /// Append a segment
    ///
    /// # Errors
    /// `BootInfoFull` if the image already has `MAX_SEGMENTS` segments
    pub fn add_segment(&mut self, segment: Segment) -> Result<(), BootInfoFull> {
        let index = self.num_segments as usize;
        if index >= MAX_SEGMENTS {
            return Err(BootInfoFull);
        }
        self.segments[index] = segment;
        self.num_segments += 1;
        Ok(())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments[..self.num_segments as usize]
    }
}

/// Layout of a framebuffer pixel
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Red in the lowest byte
    Rgb32 = 0,
    /// Blue in the lowest byte
    Bgr32 = 1,
}

/// The video mode the loader switched to
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoModeInfo {
    pub framebuffer_address: PhysicalAddress,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Pixels per scanline (at least `width`)
    pub stride: u32,
}

impl VideoModeInfo {
    /// Size of the framebuffer in bytes
    pub fn framebuffer_size(&self) -> u64 {
        self.stride as u64 * self.height as u64 * 4
    }
}

/// A fixed-capacity array in the boot info is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfoFull;

/// Everything the loader hands to the kernel
#[repr(C)]
#[derive(Debug, Clone)]
pub struct BootInfo {
    pub magic: u32,
    num_memory_map_entries: u32,
    num_loaded_images: u32,
    memory_map: [MemoryMapEntry; MAX_MEMORY_MAP_ENTRIES],
    loaded_images: [LoadedImage; MAX_LOADED_IMAGES],
    pub video_mode: Option<VideoModeInfo>,
}

impl BootInfo {
    pub fn new() -> Self {
        Self {
            magic: BOOT_INFO_MAGIC,
            num_memory_map_entries: 0,
            num_loaded_images: 0,
            memory_map: [MemoryMapEntry::EMPTY; MAX_MEMORY_MAP_ENTRIES],
            loaded_images: [LoadedImage::new("", VirtualAddress::zero()); MAX_LOADED_IMAGES],
            video_mode: None,
        }
    }

    /// Check the magic number
    pub fn is_valid(&self) -> bool {
        self.magic == BOOT_INFO_MAGIC
    }

    pub fn add_memory_map_entry(&mut self, entry: MemoryMapEntry) -> Result<(), BootInfoFull> {
        let index = self.num_memory_map_entries as usize;
        if index >= MAX_MEMORY_MAP_ENTRIES {
            return Err(BootInfoFull);
        }
        self.memory_map[index] = entry;
        self.num_memory_map_entries += 1;
        Ok(())
    }

    pub fn add_loaded_image(&mut self, image: LoadedImage) -> Result<(), BootInfoFull> {
        let index = self.num_loaded_images as usize;
        if index >= MAX_LOADED_IMAGES {
            return Err(BootInfoFull);
        }
        self.loaded_images[index] = image;
        self.num_loaded_images += 1;
        Ok(())
    }

    pub fn memory_map(&self) -> &[MemoryMapEntry] {
        &self.memory_map[..self.num_memory_map_entries as usize]
    }

    pub fn loaded_images(&self) -> &[LoadedImage] {
        &self.loaded_images[..self.num_loaded_images as usize]
    }

    /// Total bytes of `Conventional` memory in the map
    pub fn conventional_bytes(&self) -> u64 {
        self.memory_map()
            .iter()
            .filter(|entry| entry.memory_type == MemoryType::Conventional)
            .map(|entry| entry.size)
            .sum()
    }
}

impl Default for BootInfo {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::const_assert!(size_of::<MemoryMapEntry>() == 24);
static_assertions::const_assert!(MAX_SEGMENTS <= u8::MAX as usize);
static_assertions::const_assert!(MAX_IMAGE_NAME_LEN <= u8::MAX as usize);
