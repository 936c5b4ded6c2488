//! Channel objects
//!
//! A channel is a bounded FIFO of messages plus a queue of tasks blocked
//! waiting for one. Unlike a rendezvous endpoint, senders never block: a full
//! channel is reported to the sender and nothing is queued.
//!
//! ```text
//! Channel
//!   ├─ Messages: [M1] → [M2] → [M3]   (at most `capacity`)
//!   └─ Waiters:  [T4] → [T5]          (tasks in Blocked(OnChannel))
//! ```

use super::KernelObjectId;
use crate::handle::HandleEntry;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// A queued message
///
/// Transferred handles travel as table entries; each holds the reference the
/// sender's handle used to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub bytes: Vec<u8>,
    pub handles: Vec<HandleEntry>,
}

#[derive(Debug)]
pub struct Channel {
    capacity: usize,
    messages: VecDeque<Message>,
    waiters: VecDeque<KernelObjectId>,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, messages: VecDeque::new(), waiters: VecDeque::new() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    /// Queue a message, handing it back if the channel is full
    pub fn push(&mut self, message: Message) -> Result<(), Message> {
        if self.is_full() {
            return Err(message);
        }
        self.messages.push_back(message);
        Ok(())
    }

    /// The message the next receive would get
    #[inline]
    pub fn front(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Append a blocked task, once
    pub fn add_waiter(&mut self, task: KernelObjectId) {
        if !self.waiters.contains(&task) {
            self.waiters.push_back(task);
        }
    }

    /// Remove a task from the wait list, returning whether it was there
    pub fn remove_waiter(&mut self, task: KernelObjectId) -> bool {
        match self.waiters.iter().position(|&waiter| waiter == task) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Empty the wait list, oldest waiter first
    pub fn take_waiters(&mut self) -> Vec<KernelObjectId> {
        self.waiters.drain(..).collect()
    }

    pub fn waiters(&self) -> impl Iterator<Item = KernelObjectId> + '_ {
        self.waiters.iter().copied()
    }

    /// Empty the channel for destruction
    pub fn take_contents(&mut self) -> (Vec<Message>, Vec<KernelObjectId>) {
        (self.messages.drain(..).collect(), self.waiters.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn message(byte: u8) -> Message {
        Message { bytes: vec![byte], handles: Vec::new() }
    }

    #[test]
    fn test_fifo_order() {
        let mut channel = Channel::new(4);
        channel.push(message(1)).unwrap();
        channel.push(message(2)).unwrap();
        assert_eq!(channel.front().map(|m| m.bytes[0]), Some(1));
        assert_eq!(channel.pop().map(|m| m.bytes[0]), Some(1));
        assert_eq!(channel.pop().map(|m| m.bytes[0]), Some(2));
        assert!(channel.pop().is_none());
    }

    #[test]
    fn test_full_channel_hands_message_back() {
        let mut channel = Channel::new(1);
        channel.push(message(1)).unwrap();
        assert!(channel.is_full());
        assert_eq!(channel.push(message(2)), Err(message(2)));
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_waiters_queue_once_in_order() {
        let mut channel = Channel::new(1);
        channel.add_waiter(KernelObjectId(3));
        channel.add_waiter(KernelObjectId(5));
        channel.add_waiter(KernelObjectId(3));
        assert_eq!(channel.waiters().count(), 2);

        assert!(channel.remove_waiter(KernelObjectId(3)));
        assert!(!channel.remove_waiter(KernelObjectId(3)));
        assert_eq!(channel.take_waiters(), [KernelObjectId(5)]);
        assert!(channel.take_waiters().is_empty());
    }
}
