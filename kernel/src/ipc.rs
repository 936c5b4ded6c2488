//! Message passing
//!
//! Channels carry byte payloads plus handles. Sending never blocks; receiving
//! either fails with `WouldBlock` or, when asked to, blocks the receiver on
//! the channel's wait list until the next send wakes it. A send wakes every
//! waiter; those that find the channel empty again block again.
//!
//! ## Handle transfer
//!
//! Every transferred handle needs `TRANSFER`. On a successful send the
//! handles leave the sender's table and travel inside the message, carrying
//! their references with them; on receive they are installed in the
//! receiver's table with the rights they had. A channel can't carry a handle
//! to itself.
//!
//! ## Ordering
//!
//! Messages on one channel are received in the order they were sent. Nothing
//! is promised across channels.

use crate::error::{KernelError, Result};
use crate::handle::HandleEntry;
use crate::object::{Channel, KernelObject, KernelObjectId, Message, TaskBlock};
use crate::scheduler::wake_locked;
use crate::Kernel;
use alloc::vec::Vec;
use libpebble::{Capability, Handle};
use log::trace;

/// Rights on the handle returned by `create_channel`
pub const CHANNEL_CREATOR_RIGHTS: Capability = Capability::SEND
    .union(Capability::RECEIVE)
    .union(Capability::DUPLICATE)
    .union(Capability::TRANSFER);

/// A message as delivered to the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub bytes: Vec<u8>,
    /// Transferred handles, now in the receiver's table
    pub handles: Vec<Handle>,
}

/// Outcome of a receive that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(ReceivedMessage),
    /// The channel was empty and the caller is now Blocked on it; it should
    /// retry once it runs again
    Blocked,
}

/// Limits a receive buffer imposes, checked before anything is dequeued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReceiveLimits {
    pub max_bytes: usize,
    pub max_handles: usize,
}

impl Kernel {
    /// Create a channel and give `task` a handle to it
    ///
    /// The handle carries `SEND | RECEIVE | DUPLICATE | TRANSFER`.
    pub fn create_channel(&self, task: KernelObjectId) -> Result<Handle> {
        let mut objects = self.objects.lock();
        objects.task(task)?.handles.reserve(1)?;

        let channel = objects.create(KernelObject::Channel(Channel::new(self.config.channel_capacity)));
        let handle = objects.task_mut(task)?.handles.insert(HandleEntry { object: channel, rights: CHANNEL_CREATOR_RIGHTS })?;
        trace!("{}: created channel {} as {:?}", task, channel, handle);
        Ok(handle)
    }

    /// Queue a message on the channel behind `channel`
    ///
    /// Validation happens before anything changes: on error the sender's
    /// table and the channel are as they were.
    ///
    /// # Errors
    /// - `MessageTooLarge` / `TooManyHandles` past the configured limits
    /// - `InvalidHandle` for the channel or any transferred handle (including
    ///   the same handle listed twice)
    /// - `AccessDenied` without `SEND` on the channel or `TRANSFER` on a
    ///   transferred handle
    /// - `WrongObjectType` if `channel` is not a channel
    /// - `SelfTransfer` if a transferred handle names the channel itself
    /// - `ChannelFull`
    pub fn send_message(&self, task: KernelObjectId, channel: Handle, bytes: &[u8], handles: &[Handle]) -> Result<()> {
        if bytes.len() > self.config.max_message_bytes {
            return Err(KernelError::MessageTooLarge);
        }
        if handles.len() > self.config.max_message_handles {
            return Err(KernelError::TooManyHandles);
        }

        let mut objects = self.objects.lock();

        let sender = objects.task(task)?;
        let target = sender.handles.resolve(channel, Capability::SEND)?;
        for (index, &handle) in handles.iter().enumerate() {
            if handles[..index].contains(&handle) {
                return Err(KernelError::InvalidHandle);
            }
            let entry = sender.handles.resolve(handle, Capability::TRANSFER)?;
            if entry.object == target.object {
                return Err(KernelError::SelfTransfer);
            }
        }
        if objects.channel(target.object)?.is_full() {
            return Err(KernelError::ChannelFull);
        }

        // Nothing below can fail
        let sender = objects.task_mut(task)?;
        let mut carried = Vec::with_capacity(handles.len());
        for &handle in handles {
            carried.push(sender.handles.remove(handle)?);
        }

        let channel_object = objects.channel_mut(target.object)?;
        if channel_object.push(Message { bytes: bytes.to_vec(), handles: carried }).is_err() {
            return Err(KernelError::ChannelFull);
        }

        // Every waiter retries, so one that dies or can't take the message
        // leaves it for the others
        let waiters = channel_object.take_waiters();
        trace!("{}: sent {} byte(s) and {} handle(s) on {}", task, bytes.len(), handles.len(), target.object);

        if !waiters.is_empty() {
            let mut scheduler = self.scheduler.lock();
            for waiter in waiters {
                if let Err(error) = wake_locked(&mut objects, &mut scheduler, waiter) {
                    trace!("{}: waiter {} not woken ({})", target.object, waiter, error);
                }
            }
        }

        Ok(())
    }

    /// Take the oldest message from the channel behind `channel`
    ///
    /// With `blocking` set and nothing queued, the caller (which must be
    /// Running) becomes `Blocked(OnChannel)` and joins the wait list; the
    /// next send makes it and every other waiter Ready again.
    ///
    /// # Errors
    /// - `InvalidHandle` / `AccessDenied` (needs `RECEIVE`) /
    ///   `WrongObjectType`
    /// - `WouldBlock` for a non-blocking receive on an empty channel
    /// - `HandleTableFull` if the message's handles don't fit; the message
    ///   stays queued
    /// - `InvalidState` for a blocking receive by a task that isn't Running
    pub fn receive_message(&self, task: KernelObjectId, channel: Handle, blocking: bool) -> Result<Received> {
        self.receive_message_within(task, channel, blocking, None)
    }

    pub(crate) fn receive_message_within(
        &self,
        task: KernelObjectId,
        channel: Handle,
        blocking: bool,
        limits: Option<ReceiveLimits>,
    ) -> Result<Received> {
        let mut objects = self.objects.lock();

        let receiver = objects.task(task)?;
        let source = receiver.handles.resolve(channel, Capability::RECEIVE)?;
        let free_slots = receiver.handles.free_slots();

        let channel_object = objects.channel(source.object)?;
        let Some(front) = channel_object.front() else {
            if !blocking {
                return Err(KernelError::WouldBlock);
            }

            objects.task_mut(task)?.block(TaskBlock::OnChannel(source.object))?;
            objects.channel_mut(source.object)?.add_waiter(task);
            self.scheduler.lock().descheduled(task);
            trace!("{}: blocked receiving on {}", task, source.object);
            return Ok(Received::Blocked);
        };

        if let Some(limits) = limits {
            if front.bytes.len() > limits.max_bytes || front.handles.len() > limits.max_handles {
                return Err(KernelError::BufferTooSmall);
            }
        }
        if front.handles.len() > free_slots {
            return Err(KernelError::HandleTableFull);
        }

        let message = objects.channel_mut(source.object)?.pop().ok_or(KernelError::WouldBlock)?;
        let receiver = objects.task_mut(task)?;
        let mut handles = Vec::with_capacity(message.handles.len());
        for entry in message.handles {
            handles.push(receiver.handles.insert(entry)?);
        }

        trace!("{}: received {} byte(s) and {} handle(s) from {}", task, message.bytes.len(), handles.len(), source.object);
        Ok(Received::Message(ReceivedMessage { bytes: message.bytes, handles }))
    }
}
