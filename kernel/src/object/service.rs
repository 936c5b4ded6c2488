//! Service objects
//!
//! A named channel published by a provider task. The service holds its own
//! reference on the channel, so the provider can close its handle without
//! taking the service down.

use super::KernelObjectId;
use alloc::string::String;
use alloc::vec::Vec;
use libpebble::Capability;

#[derive(Debug)]
pub struct Service {
    name: String,
    provider: KernelObjectId,
    channel: KernelObjectId,
    subscriber_rights: Capability,
    subscribers: Vec<KernelObjectId>,
}

impl Service {
    pub fn new(name: &str, provider: KernelObjectId, channel: KernelObjectId, subscriber_rights: Capability) -> Self {
        Self { name: String::from(name), provider, channel, subscriber_rights, subscribers: Vec::new() }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn provider(&self) -> KernelObjectId {
        self.provider
    }

    #[inline]
    pub fn channel(&self) -> KernelObjectId {
        self.channel
    }

    /// Rights given to the handle each subscriber receives
    #[inline]
    pub fn subscriber_rights(&self) -> Capability {
        self.subscriber_rights
    }

    /// Subscribers in subscription order
    #[inline]
    pub fn subscribers(&self) -> &[KernelObjectId] {
        &self.subscribers
    }

    /// Record a subscriber, once
    pub fn add_subscriber(&mut self, task: KernelObjectId) {
        if !self.subscribers.contains(&task) {
            self.subscribers.push(task);
        }
    }

    pub fn remove_subscriber(&mut self, task: KernelObjectId) {
        self.subscribers.retain(|&subscriber| subscriber != task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_ordered_and_unique() {
        let mut service = Service::new("fb", KernelObjectId(1), KernelObjectId(2), Capability::SEND);
        service.add_subscriber(KernelObjectId(7));
        service.add_subscriber(KernelObjectId(4));
        service.add_subscriber(KernelObjectId(7));
        assert_eq!(service.subscribers(), &[KernelObjectId(7), KernelObjectId(4)]);

        service.remove_subscriber(KernelObjectId(7));
        assert_eq!(service.subscribers(), &[KernelObjectId(4)]);
    }
}
