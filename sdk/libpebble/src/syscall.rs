//! Syscall numbers and the raw register ABI
//!
//! A syscall takes a number and up to six word-sized arguments and returns
//! one result word:
//!
//! ```text
//!  63            32 31            16 15             0
//! +----------------+----------------+----------------+
//! |     value      |    reserved    |     status     |
//! +----------------+----------------+----------------+
//! ```
//!
//! A status of 0 means success, `STATUS_RETRY` means the task was blocked and
//! should re-issue the call once it runs again, `INVALID_SYSCALL` means the
//! number is unknown, and anything else is the call's error code (see
//! [`crate::error`]).

use crate::error::SyscallError;
use crate::Handle;

static_assertions::const_assert_eq!(core::mem::size_of::<usize>(), 8);

pub const SYSCALL_YIELD: usize = 0;
/// `early_log(str_ptr, str_len)`
pub const SYSCALL_EARLY_LOG: usize = 1;
/// `get_framebuffer(info_ptr) -> handle`
pub const SYSCALL_GET_FRAMEBUFFER: usize = 2;
/// `create_memory_object(size, flags) -> handle`
pub const SYSCALL_CREATE_MEMORY_OBJECT: usize = 3;
/// `map_memory_object(handle, virtual_address)`
pub const SYSCALL_MAP_MEMORY_OBJECT: usize = 4;
/// `create_channel() -> handle`
pub const SYSCALL_CREATE_CHANNEL: usize = 5;
/// `send_message(channel, bytes_ptr, bytes_len, handles_ptr, handles_len)`
pub const SYSCALL_SEND_MESSAGE: usize = 6;
/// `receive_message(channel, bytes_ptr, bytes_len, handles_ptr, handles_len, flags) -> lengths`
pub const SYSCALL_RECEIVE_MESSAGE: usize = 7;
/// `duplicate_handle(handle, mask) -> handle`
pub const SYSCALL_DUPLICATE_HANDLE: usize = 8;
/// `close_handle(handle)`
pub const SYSCALL_CLOSE_HANDLE: usize = 9;
/// `register_service(name_ptr, name_len, channel)`
pub const SYSCALL_REGISTER_SERVICE: usize = 10;
/// `subscribe_to_service(name_ptr, name_len) -> handle`
pub const SYSCALL_SUBSCRIBE_TO_SERVICE: usize = 11;
/// `exit(code)`
pub const SYSCALL_EXIT: usize = 12;

/// `receive_message` flag: block when the channel is empty
pub const RECEIVE_BLOCKING: usize = 1 << 0;

pub const STATUS_OK: u16 = 0;
pub const STATUS_RETRY: u16 = 0xfffe;

/// Result word for an unknown syscall number
pub const INVALID_SYSCALL: usize = 0xffff;

/// Build a result word
#[inline]
pub const fn make_result(status: u16, value: u32) -> usize {
    ((value as usize) << 32) | status as usize
}

/// Status part of a result word
#[inline]
pub const fn status_of(word: usize) -> u16 {
    word as u16
}

/// Value part of a result word
#[inline]
pub const fn value_of(word: usize) -> u32 {
    (word >> 32) as u32
}

/// Successful result carrying a handle
#[inline]
pub const fn handle_result(handle: Handle) -> usize {
    make_result(STATUS_OK, handle.0)
}

/// Failed result carrying an error code
#[inline]
pub fn error_result<E: SyscallError>(error: E) -> usize {
    make_result(error.code(), 0)
}

/// Pack a received message's byte and handle counts into a value
#[inline]
pub const fn encode_received(bytes: usize, handles: usize) -> u32 {
    ((handles as u32) << 16) | (bytes as u32 & 0xffff)
}

/// Unpack `(bytes, handles)` from a receive result value
#[inline]
pub const fn decode_received(value: u32) -> (usize, usize) {
    ((value & 0xffff) as usize, (value >> 16) as usize)
}

/// A decoded result word
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status<E> {
    Ok(u32),
    Err(E),
    /// Re-issue the call when the task is next scheduled
    Retry,
    InvalidSyscall,
    /// A code the call is not documented to return
    Unknown(u16),
}

impl<E: SyscallError> Status<E> {
    pub fn from_word(word: usize) -> Self {
        if word == INVALID_SYSCALL {
            return Status::InvalidSyscall;
        }
        match status_of(word) {
            STATUS_OK => Status::Ok(value_of(word)),
            STATUS_RETRY => Status::Retry,
            code => match E::from_code(code) {
                Some(error) => Status::Err(error),
                None => Status::Unknown(code),
            },
        }
    }
}
