//! Per-syscall error kinds
//!
//! Every syscall has its own error enum so callers only match on what that
//! call can actually fail with. Codes are stable: they are what travels in
//! the low 16 bits of the result word, and 0 always means success.

use core::fmt;

/// Conversion between an error enum and its wire code
pub trait SyscallError: Sized + Copy + fmt::Debug {
    /// Non-zero status code for this error
    fn code(self) -> u16;

    /// Reverse of `code`, `None` for codes this call never returns
    fn from_code(code: u16) -> Option<Self>;
}

macro_rules! syscall_error {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident = $code:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(u16)]
        pub enum $name {
            $($(#[$variant_meta])* $variant = $code,)+
        }

        impl SyscallError for $name {
            #[inline]
            fn code(self) -> u16 {
                self as u16
            }

            fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

syscall_error! {
    pub enum CreateMemoryObjectError {
        /// Size was zero or not a multiple of 4KiB
        InvalidSize = 1,
        /// Unknown bits in the flags argument
        InvalidFlags = 2,
        OutOfMemory = 3,
        HandleTableFull = 4,
        /// The calling task is gone
        NoSuchTask = 5,
    }
}

syscall_error! {
    pub enum MapMemoryObjectError {
        InvalidHandle = 1,
        /// Handle lacks `MAP`
        AccessDenied = 2,
        NotAMemoryObject = 3,
        /// Unaligned, not canonical, or outside the lower half
        InvalidAddress = 4,
        /// Overlaps an existing mapping
        AddressInUse = 5,
    }
}

syscall_error! {
    pub enum CreateChannelError {
        OutOfMemory = 1,
        HandleTableFull = 2,
        /// The calling task is gone
        NoSuchTask = 3,
    }
}

syscall_error! {
    pub enum SendMessageError {
        /// The channel or one of the transferred handles is invalid
        InvalidHandle = 1,
        /// Missing `SEND` on the channel or `TRANSFER` on a transferred handle
        AccessDenied = 2,
        NotAChannel = 3,
        ChannelFull = 4,
        MessageTooLarge = 5,
        TooManyHandles = 6,
        /// A buffer argument does not point at readable user memory
        InvalidPointer = 7,
        /// The channel is being transferred in its own message
        CannotTransferChannelIntoItself = 8,
    }
}

syscall_error! {
    pub enum ReceiveMessageError {
        InvalidHandle = 1,
        /// Handle lacks `RECEIVE`
        AccessDenied = 2,
        NotAChannel = 3,
        /// Non-blocking receive on an empty channel
        WouldBlock = 4,
        /// No room for the message's handles; the message stays queued
        HandleTableFull = 5,
        /// A user buffer is smaller than the message; the message stays queued
        BufferTooSmall = 6,
        InvalidPointer = 7,
    }
}

syscall_error! {
    pub enum DuplicateHandleError {
        InvalidHandle = 1,
        /// Handle lacks `DUPLICATE`
        AccessDenied = 2,
        /// Requested rights are not a subset of the source rights
        CapabilityEscalation = 3,
        HandleTableFull = 4,
        /// Unknown bits in the requested mask
        InvalidMask = 5,
    }
}

syscall_error! {
    pub enum CloseHandleError {
        InvalidHandle = 1,
    }
}

syscall_error! {
    pub enum RegisterServiceError {
        /// Task lacks the `SERVICE_PROVIDER` privilege
        TaskDoesNotHaveCorrectPrivilege = 1,
        NamePointerNotValid = 2,
        /// Empty, too long, or not UTF-8
        InvalidName = 3,
        NameTaken = 4,
        InvalidHandle = 5,
        /// Channel handle lacks `DUPLICATE` or `SEND`
        AccessDenied = 6,
        NotAChannel = 7,
    }
}

syscall_error! {
    pub enum SubscribeToServiceError {
        /// Task lacks the `SERVICE_USER` privilege
        TaskDoesNotHaveCorrectPrivilege = 1,
        NamePointerNotValid = 2,
        InvalidName = 3,
        NoServiceWithThatName = 4,
        HandleTableFull = 5,
    }
}

syscall_error! {
    pub enum GetFramebufferError {
        /// Task lacks the `GET_FRAMEBUFFER` privilege
        AccessDenied = 1,
        /// The loader did not set a video mode
        NoFramebuffer = 2,
        InfoAddressIsInvalid = 3,
        HandleTableFull = 4,
    }
}

syscall_error! {
    pub enum EarlyLogError {
        /// Task lacks the `EARLY_LOGGING` privilege
        TaskDoesNotHaveCorrectPrivilege = 1,
        MessageTooLong = 2,
        MessageNotValidUtf8 = 3,
        InvalidPointer = 4,
    }
}
