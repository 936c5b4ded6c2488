//! Pebble user ABI
//!
//! Everything a task needs to talk to the kernel, and everything the kernel
//! needs to agree with it on.
//!
//! # Modules
//! - [`capability`]: capability masks and task privileges
//! - [`syscall`]: syscall numbers and the result-word encoding
//! - [`error`]: one error enum per syscall, each with stable codes
//! - [`framebuffer`]: the framebuffer description handed out by get-framebuffer

#![no_std]

pub mod capability;
pub mod error;
pub mod framebuffer;
pub mod syscall;

pub use capability::{Capability, TaskPrivileges};
pub use error::{
    CloseHandleError, CreateChannelError, CreateMemoryObjectError, DuplicateHandleError,
    EarlyLogError, GetFramebufferError, MapMemoryObjectError, ReceiveMessageError,
    RegisterServiceError, SendMessageError, SubscribeToServiceError, SyscallError,
};
pub use framebuffer::{FramebufferInfo, PixelFormat};

use core::fmt;

/// ABI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A task-local reference to a kernel object
///
/// The value indexes the owning task's handle table and means nothing in any
/// other task. `Handle::ZERO` is never issued, so it can be used as "none" in
/// raw syscall arguments.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(pub u32);

impl Handle {
    pub const ZERO: Handle = Handle(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> u32 {
        handle.0
    }
}

static_assertions::assert_eq_size!(Handle, u32);
