//! Capability masks and task privileges
//!
//! A `Capability` travels with a handle and says what that handle may be used
//! for. `TaskPrivileges` belong to the task itself and gate the calls that
//! aren't mediated by a handle at all.

use bitflags::bitflags;

bitflags! {
    /// Rights carried by a handle
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capability: u32 {
        /// Read the object's contents
        const READ = 1 << 0;
        /// Write the object's contents (and map it writable)
        const WRITE = 1 << 1;
        /// Map a memory object into an address space
        const MAP = 1 << 2;
        /// Send messages on a channel
        const SEND = 1 << 3;
        /// Receive messages from a channel
        const RECEIVE = 1 << 4;
        /// Create further handles to the same object
        const DUPLICATE = 1 << 5;
        /// Move the handle to another task inside a message
        const TRANSFER = 1 << 6;
    }
}

impl Capability {
    /// Whether a handle with these rights may be narrowed to `requested`
    ///
    /// Narrowing never adds a right: `requested` must be a subset of `self`.
    #[inline]
    pub fn can_narrow_to(self, requested: Capability) -> bool {
        self.contains(requested)
    }
}

bitflags! {
    /// Task-level permissions, granted at spawn and never widened
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TaskPrivileges: u32 {
        /// May write to the kernel log
        const EARLY_LOGGING = 1 << 0;
        /// May take the boot framebuffer
        const GET_FRAMEBUFFER = 1 << 1;
        /// May register services
        const SERVICE_PROVIDER = 1 << 2;
        /// May subscribe to services
        const SERVICE_USER = 1 << 3;
    }
}
