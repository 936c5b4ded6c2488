//! Syscall surface
//!
//! Two layers over the kernel operations:
//!
//! - [`SyscallContext`]: typed calls on behalf of one task, each returning
//!   its own `libpebble` error enum
//! - [`Kernel::handle_syscall`]: the raw register ABI the trap handler calls,
//!   decoding arguments, copying buffers through [`UserMemory`] and encoding
//!   the result word described in `libpebble::syscall`

use crate::error::KernelError;
use crate::ipc::{ReceiveLimits, Received};
use crate::object::KernelObjectId;
use crate::Kernel;
use alloc::vec;
use alloc::vec::Vec;
use hal::memory::{Flags, VirtualAddress};
use libpebble::syscall::{self as abi, make_result, STATUS_OK, STATUS_RETRY};
use libpebble::{
    Capability, CloseHandleError, CreateChannelError, CreateMemoryObjectError, DuplicateHandleError, EarlyLogError,
    FramebufferInfo, GetFramebufferError, Handle, MapMemoryObjectError, PixelFormat, ReceiveMessageError,
    RegisterServiceError, SendMessageError, SubscribeToServiceError, SyscallError, TaskPrivileges,
};
use log::{info, trace, warn};

/// A user buffer did not point at accessible memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadAddress;

/// Access to the calling task's memory
///
/// Implemented by the architecture layer over the task's page tables, and by
/// tests over a plain buffer.
pub trait UserMemory {
    /// Copy `buffer.len()` bytes from user address `address`
    fn read(&self, address: usize, buffer: &mut [u8]) -> Result<(), BadAddress>;

    /// Copy `data` to user address `address`
    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), BadAddress>;

    /// Check that `len` bytes at `address` could be written
    fn check_writable(&self, address: usize, len: usize) -> Result<(), BadAddress>;
}

fn read_bytes(memory: &dyn UserMemory, address: usize, len: usize) -> Result<Vec<u8>, BadAddress> {
    let mut bytes = vec![0u8; len];
    if len > 0 {
        memory.read(address, &mut bytes)?;
    }
    Ok(bytes)
}

fn read_handles(memory: &dyn UserMemory, address: usize, count: usize) -> Result<Vec<Handle>, BadAddress> {
    let raw = read_bytes(memory, address, count * 4)?;
    Ok(raw
        .chunks_exact(4)
        .map(|chunk| Handle(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
        .collect())
}

/// Raw handle argument; anything wider than 32 bits can't name a slot
fn handle_arg(arg: usize) -> Handle {
    u32::try_from(arg).map(Handle).unwrap_or(Handle::ZERO)
}

fn ok_result(value: u32) -> usize {
    make_result(STATUS_OK, value)
}

fn result_of<T, E: SyscallError>(result: Result<T, E>, value: impl FnOnce(T) -> u32) -> usize {
    match result {
        Ok(ok) => ok_result(value(ok)),
        Err(error) => abi::error_result(error),
    }
}

impl From<KernelError> for CreateMemoryObjectError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::OutOfMemory => CreateMemoryObjectError::OutOfMemory,
            KernelError::HandleTableFull => CreateMemoryObjectError::HandleTableFull,
            KernelError::InvalidSize => CreateMemoryObjectError::InvalidSize,
            _ => CreateMemoryObjectError::NoSuchTask,
        }
    }
}

impl From<KernelError> for MapMemoryObjectError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::AccessDenied => MapMemoryObjectError::AccessDenied,
            KernelError::WrongObjectType => MapMemoryObjectError::NotAMemoryObject,
            KernelError::InvalidAddress => MapMemoryObjectError::InvalidAddress,
            KernelError::AddressInUse => MapMemoryObjectError::AddressInUse,
            _ => MapMemoryObjectError::InvalidHandle,
        }
    }
}

impl From<KernelError> for CreateChannelError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::OutOfMemory => CreateChannelError::OutOfMemory,
            KernelError::HandleTableFull => CreateChannelError::HandleTableFull,
            _ => CreateChannelError::NoSuchTask,
        }
    }
}

impl From<KernelError> for SendMessageError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::AccessDenied => SendMessageError::AccessDenied,
            KernelError::WrongObjectType => SendMessageError::NotAChannel,
            KernelError::ChannelFull => SendMessageError::ChannelFull,
            KernelError::MessageTooLarge => SendMessageError::MessageTooLarge,
            KernelError::TooManyHandles => SendMessageError::TooManyHandles,
            KernelError::SelfTransfer => SendMessageError::CannotTransferChannelIntoItself,
            _ => SendMessageError::InvalidHandle,
        }
    }
}

impl From<KernelError> for ReceiveMessageError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::AccessDenied => ReceiveMessageError::AccessDenied,
            KernelError::WrongObjectType => ReceiveMessageError::NotAChannel,
            KernelError::WouldBlock | KernelError::InvalidState => ReceiveMessageError::WouldBlock,
            KernelError::HandleTableFull => ReceiveMessageError::HandleTableFull,
            KernelError::BufferTooSmall => ReceiveMessageError::BufferTooSmall,
            _ => ReceiveMessageError::InvalidHandle,
        }
    }
}

impl From<KernelError> for DuplicateHandleError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::AccessDenied => DuplicateHandleError::AccessDenied,
            KernelError::CapabilityEscalation => DuplicateHandleError::CapabilityEscalation,
            KernelError::HandleTableFull => DuplicateHandleError::HandleTableFull,
            _ => DuplicateHandleError::InvalidHandle,
        }
    }
}

impl From<KernelError> for CloseHandleError {
    fn from(_: KernelError) -> Self {
        CloseHandleError::InvalidHandle
    }
}

impl From<KernelError> for RegisterServiceError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::InvalidName => RegisterServiceError::InvalidName,
            KernelError::NameTaken => RegisterServiceError::NameTaken,
            KernelError::AccessDenied => RegisterServiceError::AccessDenied,
            KernelError::WrongObjectType => RegisterServiceError::NotAChannel,
            KernelError::InvalidHandle => RegisterServiceError::InvalidHandle,
            _ => RegisterServiceError::TaskDoesNotHaveCorrectPrivilege,
        }
    }
}

impl From<KernelError> for SubscribeToServiceError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::InvalidName => SubscribeToServiceError::InvalidName,
            KernelError::NotFound => SubscribeToServiceError::NoServiceWithThatName,
            KernelError::HandleTableFull => SubscribeToServiceError::HandleTableFull,
            _ => SubscribeToServiceError::TaskDoesNotHaveCorrectPrivilege,
        }
    }
}

impl From<KernelError> for GetFramebufferError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::NotFound => GetFramebufferError::NoFramebuffer,
            KernelError::HandleTableFull => GetFramebufferError::HandleTableFull,
            _ => GetFramebufferError::AccessDenied,
        }
    }
}

impl From<KernelError> for EarlyLogError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::MessageTooLarge => EarlyLogError::MessageTooLong,
            _ => EarlyLogError::TaskDoesNotHaveCorrectPrivilege,
        }
    }
}

impl Kernel {
    /// Typed syscalls on behalf of `task`
    pub fn syscalls(&self, task: KernelObjectId) -> SyscallContext<'_> {
        SyscallContext { kernel: self, task }
    }

    /// Write `message` to the kernel log, tagged with the task's name
    ///
    /// # Errors
    /// - `MissingPrivilege` without `EARLY_LOGGING`
    /// - `MessageTooLarge` past `max_early_log_len`
    pub fn early_log(&self, task: KernelObjectId, message: &str) -> crate::Result<()> {
        let objects = self.objects.lock();
        let caller = objects.task(task)?;
        caller.require(TaskPrivileges::EARLY_LOGGING)?;
        if message.len() > self.config.max_early_log_len {
            return Err(KernelError::MessageTooLarge);
        }

        info!(target: "user", "[{}] {}", caller.name(), message);
        Ok(())
    }

    /// Dispatch a raw syscall from `task`
    ///
    /// # Arguments
    /// - `number`: one of the `libpebble::syscall::SYSCALL_*` numbers
    /// - `args`: the argument registers, unused ones ignored
    /// - `memory`: the calling task's memory, for pointer arguments
    ///
    /// # Returns
    /// The result word: status in bits 0..16, value in bits 32..64
    pub fn handle_syscall(&self, task: KernelObjectId, number: usize, args: [usize; 6], memory: &mut dyn UserMemory) -> usize {
        trace!("{}: syscall {} {:x?}", task, number, args);
        let context = self.syscalls(task);

        let result = match number {
            abi::SYSCALL_YIELD => {
                context.yield_now();
                ok_result(0)
            }
            abi::SYSCALL_EARLY_LOG => result_of(raw_early_log(&context, args, memory), |()| 0),
            abi::SYSCALL_GET_FRAMEBUFFER => result_of(raw_get_framebuffer(&context, args, memory), |handle| handle.0),
            abi::SYSCALL_CREATE_MEMORY_OBJECT => {
                let flags = u8::try_from(args[1]).ok().and_then(Flags::from_bits);
                let result = match flags {
                    Some(flags) => context.create_memory_object(args[0] as u64, flags),
                    None => Err(CreateMemoryObjectError::InvalidFlags),
                };
                result_of(result, |handle| handle.0)
            }
            abi::SYSCALL_MAP_MEMORY_OBJECT => {
                let result = match VirtualAddress::new(args[1] as u64) {
                    Some(address) => context.map_memory_object(handle_arg(args[0]), address),
                    None => Err(MapMemoryObjectError::InvalidAddress),
                };
                result_of(result, |()| 0)
            }
            abi::SYSCALL_CREATE_CHANNEL => result_of(context.create_channel(), |handle| handle.0),
            abi::SYSCALL_SEND_MESSAGE => result_of(raw_send_message(&context, args, memory), |()| 0),
            abi::SYSCALL_RECEIVE_MESSAGE => match raw_receive_message(&context, args, memory) {
                Ok(Some(value)) => ok_result(value),
                Ok(None) => make_result(STATUS_RETRY, 0),
                Err(error) => abi::error_result(error),
            },
            abi::SYSCALL_DUPLICATE_HANDLE => {
                let rights = u32::try_from(args[1]).ok().and_then(Capability::from_bits);
                let result = match rights {
                    Some(rights) => context.duplicate_handle(handle_arg(args[0]), rights),
                    None => Err(DuplicateHandleError::InvalidMask),
                };
                result_of(result, |handle| handle.0)
            }
            abi::SYSCALL_CLOSE_HANDLE => result_of(context.close_handle(handle_arg(args[0])), |()| 0),
            abi::SYSCALL_REGISTER_SERVICE => result_of(raw_register_service(&context, args, memory), |()| 0),
            abi::SYSCALL_SUBSCRIBE_TO_SERVICE => {
                result_of(raw_subscribe_to_service(&context, args, memory), |handle| handle.0)
            }
            abi::SYSCALL_EXIT => {
                context.exit(args[0] as u64);
                ok_result(0)
            }
            _ => {
                warn!("{}: unknown syscall number {}", task, number);
                abi::INVALID_SYSCALL
            }
        };

        if cfg!(feature = "debug-invariants") {
            for violation in crate::invariants::check_all(self) {
                log::error!("invariant {} violated after syscall {}: {}", violation.invariant, number, violation.description);
            }
        }

        result
    }
}

fn raw_early_log(context: &SyscallContext<'_>, args: [usize; 6], memory: &dyn UserMemory) -> Result<(), EarlyLogError> {
    context.require(TaskPrivileges::EARLY_LOGGING).map_err(|_| EarlyLogError::TaskDoesNotHaveCorrectPrivilege)?;
    if args[1] > context.kernel.config.max_early_log_len {
        return Err(EarlyLogError::MessageTooLong);
    }

    let bytes = read_bytes(memory, args[0], args[1]).map_err(|_| EarlyLogError::InvalidPointer)?;
    let message = core::str::from_utf8(&bytes).map_err(|_| EarlyLogError::MessageNotValidUtf8)?;
    context.early_log(message)
}

fn raw_get_framebuffer(
    context: &SyscallContext<'_>,
    args: [usize; 6],
    memory: &mut dyn UserMemory,
) -> Result<Handle, GetFramebufferError> {
    memory
        .check_writable(args[0], FramebufferInfo::ENCODED_LEN)
        .map_err(|_| GetFramebufferError::InfoAddressIsInvalid)?;

    let (handle, info) = context.get_framebuffer()?;
    if memory.write(args[0], &info.to_bytes()).is_err() {
        warn!("{}: framebuffer info write failed after the address was checked", context.task);
    }
    Ok(handle)
}

fn raw_send_message(context: &SyscallContext<'_>, args: [usize; 6], memory: &dyn UserMemory) -> Result<(), SendMessageError> {
    let config = context.kernel.config;
    if args[2] > config.max_message_bytes {
        return Err(SendMessageError::MessageTooLarge);
    }
    if args[4] > config.max_message_handles {
        return Err(SendMessageError::TooManyHandles);
    }

    let bytes = read_bytes(memory, args[1], args[2]).map_err(|_| SendMessageError::InvalidPointer)?;
    let handles = read_handles(memory, args[3], args[4]).map_err(|_| SendMessageError::InvalidPointer)?;
    context.send_message(handle_arg(args[0]), &bytes, &handles)
}

/// `Ok(None)` means the task blocked and must retry
fn raw_receive_message(
    context: &SyscallContext<'_>,
    args: [usize; 6],
    memory: &mut dyn UserMemory,
) -> Result<Option<u32>, ReceiveMessageError> {
    let (bytes_address, bytes_len, handles_address, handles_len) = (args[1], args[2], args[3], args[4]);
    let blocking = args[5] & abi::RECEIVE_BLOCKING != 0;

    // Buffers are checked up front so a dequeued message is never lost
    memory.check_writable(bytes_address, bytes_len).map_err(|_| ReceiveMessageError::InvalidPointer)?;
    memory
        .check_writable(handles_address, handles_len.saturating_mul(4))
        .map_err(|_| ReceiveMessageError::InvalidPointer)?;

    let limits = ReceiveLimits { max_bytes: bytes_len, max_handles: handles_len };
    let received = context
        .kernel
        .receive_message_within(context.task, handle_arg(args[0]), blocking, Some(limits))
        .map_err(ReceiveMessageError::from)?;

    let message = match received {
        Received::Message(message) => message,
        Received::Blocked => return Ok(None),
    };

    let raw_handles: Vec<u8> = message.handles.iter().flat_map(|handle| handle.0.to_le_bytes()).collect();
    if memory.write(bytes_address, &message.bytes).is_err() || memory.write(handles_address, &raw_handles).is_err() {
        warn!("{}: receive buffer write failed after the buffers were checked", context.task);
    }

    Ok(Some(abi::encode_received(message.bytes.len(), message.handles.len())))
}

fn read_name(memory: &dyn UserMemory, address: usize, len: usize, max_len: usize) -> Result<alloc::string::String, NameError> {
    if len == 0 || len > max_len {
        return Err(NameError::Invalid);
    }
    let bytes = read_bytes(memory, address, len).map_err(|_| NameError::BadPointer)?;
    alloc::string::String::from_utf8(bytes).map_err(|_| NameError::Invalid)
}

enum NameError {
    Invalid,
    BadPointer,
}

fn raw_register_service(
    context: &SyscallContext<'_>,
    args: [usize; 6],
    memory: &dyn UserMemory,
) -> Result<(), RegisterServiceError> {
    context
        .require(TaskPrivileges::SERVICE_PROVIDER)
        .map_err(|_| RegisterServiceError::TaskDoesNotHaveCorrectPrivilege)?;
    let name = read_name(memory, args[0], args[1], context.kernel.config.max_service_name_len).map_err(|error| match error {
        NameError::Invalid => RegisterServiceError::InvalidName,
        NameError::BadPointer => RegisterServiceError::NamePointerNotValid,
    })?;
    context.register_service(&name, handle_arg(args[2]))
}

fn raw_subscribe_to_service(
    context: &SyscallContext<'_>,
    args: [usize; 6],
    memory: &dyn UserMemory,
) -> Result<Handle, SubscribeToServiceError> {
    context
        .require(TaskPrivileges::SERVICE_USER)
        .map_err(|_| SubscribeToServiceError::TaskDoesNotHaveCorrectPrivilege)?;
    let name = read_name(memory, args[0], args[1], context.kernel.config.max_service_name_len).map_err(|error| match error {
        NameError::Invalid => SubscribeToServiceError::InvalidName,
        NameError::BadPointer => SubscribeToServiceError::NamePointerNotValid,
    })?;
    context.subscribe_to_service(&name)
}

/// Typed syscalls made by one task
pub struct SyscallContext<'k> {
    kernel: &'k Kernel,
    task: KernelObjectId,
}

impl SyscallContext<'_> {
    #[inline]
    pub fn task(&self) -> KernelObjectId {
        self.task
    }

    fn require(&self, privileges: TaskPrivileges) -> crate::Result<()> {
        self.kernel.objects.lock().task(self.task)?.require(privileges)
    }

    pub fn early_log(&self, message: &str) -> Result<(), EarlyLogError> {
        Ok(self.kernel.early_log(self.task, message)?)
    }

    pub fn get_framebuffer(&self) -> Result<(Handle, FramebufferInfo), GetFramebufferError> {
        let (handle, mode) = self.kernel.get_framebuffer(self.task)?;
        let info = FramebufferInfo {
            width: u16::try_from(mode.width).unwrap_or(u16::MAX),
            height: u16::try_from(mode.height).unwrap_or(u16::MAX),
            stride: u16::try_from(mode.stride).unwrap_or(u16::MAX),
            pixel_format: match mode.pixel_format {
                hal::boot_info::PixelFormat::Rgb32 => PixelFormat::Rgb32,
                hal::boot_info::PixelFormat::Bgr32 => PixelFormat::Bgr32,
            },
        };
        Ok((handle, info))
    }

    pub fn create_memory_object(&self, size: u64, flags: Flags) -> Result<Handle, CreateMemoryObjectError> {
        Ok(self.kernel.create_memory_object(self.task, size, flags)?)
    }

    pub fn map_memory_object(&self, handle: Handle, address: VirtualAddress) -> Result<(), MapMemoryObjectError> {
        Ok(self.kernel.map_memory_object(self.task, handle, address)?)
    }

    pub fn create_channel(&self) -> Result<Handle, CreateChannelError> {
        Ok(self.kernel.create_channel(self.task)?)
    }

    pub fn send_message(&self, channel: Handle, bytes: &[u8], handles: &[Handle]) -> Result<(), SendMessageError> {
        Ok(self.kernel.send_message(self.task, channel, bytes, handles)?)
    }

    pub fn receive_message(&self, channel: Handle, blocking: bool) -> Result<Received, ReceiveMessageError> {
        Ok(self.kernel.receive_message(self.task, channel, blocking)?)
    }

    pub fn duplicate_handle(&self, handle: Handle, rights: Capability) -> Result<Handle, DuplicateHandleError> {
        Ok(self.kernel.duplicate(self.task, handle, rights)?)
    }

    pub fn close_handle(&self, handle: Handle) -> Result<(), CloseHandleError> {
        Ok(self.kernel.close_handle(self.task, handle)?)
    }

    pub fn register_service(&self, name: &str, channel: Handle) -> Result<(), RegisterServiceError> {
        Ok(self.kernel.register_service(self.task, name, channel)?)
    }

    pub fn subscribe_to_service(&self, name: &str) -> Result<Handle, SubscribeToServiceError> {
        Ok(self.kernel.subscribe_to_service(self.task, name)?)
    }

    /// Give up the CPU; a task that isn't Running is left as it is
    pub fn yield_now(&self) {
        if let Err(error) = self.kernel.yield_task(self.task) {
            trace!("{}: yield ignored ({})", self.task, error);
        }
    }

    pub fn exit(&self, code: u64) {
        if let Err(error) = self.kernel.exit_task(self.task, code) {
            warn!("{}: exit failed ({})", self.task, error);
        }
    }
}
