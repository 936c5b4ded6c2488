//! Kernel error type
//!
//! Every fallible kernel operation returns [`KernelError`]. The syscall layer
//! narrows it into the per-call error enums from `libpebble`.

use crate::memory::pmm::AllocationError;
use thiserror::Error;

/// Errors returned by kernel operations
///
/// A failed operation leaves the object table, every handle table and the
/// allocator exactly as they were.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("out of physical memory")]
    OutOfMemory,

    #[error("no such object")]
    NotFound,

    #[error("handle is not valid in this task")]
    InvalidHandle,

    #[error("handle lacks a required capability")]
    AccessDenied,

    #[error("requested capabilities are not a subset of the source")]
    CapabilityEscalation,

    #[error("channel is full")]
    ChannelFull,

    #[error("channel is empty")]
    WouldBlock,

    #[error("service name already registered")]
    NameTaken,

    #[error("object is of the wrong type for this operation")]
    WrongObjectType,

    #[error("handle table is full")]
    HandleTableFull,

    #[error("range overlaps an existing mapping")]
    AddressInUse,

    #[error("address is unaligned or outside the user half")]
    InvalidAddress,

    #[error("message payload exceeds the configured maximum")]
    MessageTooLarge,

    #[error("message carries too many handles")]
    TooManyHandles,

    #[error("service name is empty, too long or not UTF-8")]
    InvalidName,

    #[error("task lacks the privilege for this call")]
    MissingPrivilege,

    #[error("operation not valid in the task's current state")]
    InvalidState,

    #[error("a channel cannot carry a handle to itself")]
    SelfTransfer,

    #[error("receive buffer is smaller than the next message")]
    BufferTooSmall,

    #[error("invalid size")]
    InvalidSize,

    #[error("invalid kernel configuration: {0}")]
    InvalidConfig(&'static str),
}

impl From<AllocationError> for KernelError {
    fn from(error: AllocationError) -> Self {
        match error {
            AllocationError::OutOfMemory => KernelError::OutOfMemory,
            AllocationError::ZeroSized => KernelError::InvalidSize,
        }
    }
}

/// Result type for kernel operations
pub type Result<T> = core::result::Result<T, KernelError>;
