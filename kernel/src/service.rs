//! Service Registry
//!
//! Lets provider tasks publish a channel under a name and user tasks find it.
//! Each registration creates a Service object; the registry holds one
//! reference on it and the service holds one on its channel, so a service
//! outlives the provider's own handles until it is unregistered or the
//! provider dies.
//!
//! The registry has its own lock, always taken before the object table's.

use crate::error::{KernelError, Result};
use crate::handle::HandleEntry;
use crate::object::{KernelObject, KernelObjectId, ObjectTable, Reclaim, Service};
use crate::Kernel;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use libpebble::{Capability, Handle, TaskPrivileges};
use log::{debug, info};

/// Most a subscriber's handle can carry
pub const SUBSCRIBER_RIGHTS: Capability = Capability::SEND.union(Capability::TRANSFER);

/// Snapshot of a registered service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub service: KernelObjectId,
    pub provider: KernelObjectId,
    pub channel: KernelObjectId,
    pub subscribers: Vec<KernelObjectId>,
}

/// Name → service object
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, KernelObjectId>,
}

impl ServiceRegistry {
    pub const fn new() -> Self {
        Self { services: BTreeMap::new() }
    }

    pub fn lookup(&self, name: &str) -> Option<KernelObjectId> {
        self.services.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    fn insert(&mut self, name: &str, service: KernelObjectId) {
        self.services.insert(String::from(name), service);
    }

    fn remove(&mut self, name: &str) -> Option<KernelObjectId> {
        self.services.remove(name)
    }

    /// Registered `(name, service)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, KernelObjectId)> {
        self.services.iter().map(|(name, &service)| (name.as_str(), service))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Drop everything the registry knows about a dying task
///
/// Services it provides are unregistered (their references go into
/// `reclaim`) and it is removed from every subscriber list.
pub(crate) fn forget_task(
    registry: &mut ServiceRegistry,
    objects: &mut ObjectTable,
    task: KernelObjectId,
    reclaim: &mut Reclaim,
) {
    let provided: Vec<(String, KernelObjectId)> = registry
        .iter()
        .filter(|&(_, service)| objects.service(service).map(|s| s.provider() == task).unwrap_or(false))
        .map(|(name, service)| (String::from(name), service))
        .collect();

    for (name, service) in provided {
        registry.remove(&name);
        info!("Unregistered service '{}' (provider {} is gone)", name, task);
        objects.release_into(service, reclaim);
    }

    let services: Vec<KernelObjectId> = registry.iter().map(|(_, service)| service).collect();
    for service in services {
        if let Ok(service) = objects.service_mut(service) {
            service.remove_subscriber(task);
        }
    }
}

impl Kernel {
    fn check_service_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > self.config.max_service_name_len {
            return Err(KernelError::InvalidName);
        }
        Ok(())
    }

    /// Publish the channel behind `channel` under `name`
    ///
    /// # Errors
    /// - `MissingPrivilege` without `SERVICE_PROVIDER`
    /// - `InvalidName` for an empty or over-long name
    /// - `NameTaken` if the name is registered
    /// - `InvalidHandle` / `AccessDenied` (needs `DUPLICATE | SEND`) /
    ///   `WrongObjectType` for the channel handle
    pub fn register_service(&self, task: KernelObjectId, name: &str, channel: Handle) -> Result<()> {
        let mut registry = self.registry.lock();
        let mut objects = self.objects.lock();

        let provider = objects.task(task)?;
        provider.require(TaskPrivileges::SERVICE_PROVIDER)?;
        self.check_service_name(name)?;
        if registry.contains(name) {
            return Err(KernelError::NameTaken);
        }

        let entry = provider.handles.resolve(channel, Capability::DUPLICATE | Capability::SEND)?;
        objects.channel(entry.object)?;

        // Subscribers never get more than the provider's handle carries
        let subscriber_rights = entry.rights & SUBSCRIBER_RIGHTS;
        objects.retain(entry.object);
        let service = objects.create(KernelObject::Service(Service::new(name, task, entry.object, subscriber_rights)));
        registry.insert(name, service);

        info!("Task {} registered service '{}' ({} on channel {})", task, name, service, entry.object);
        Ok(())
    }

    /// Get a handle to the channel registered under `name`
    ///
    /// The handle carries `SEND`, plus `TRANSFER` when the provider's handle
    /// had it. The caller is appended to the
    /// service's subscriber list the first time it subscribes.
    ///
    /// # Errors
    /// - `MissingPrivilege` without `SERVICE_USER`
    /// - `InvalidName` / `NotFound`
    /// - `HandleTableFull`
    pub fn subscribe_to_service(&self, task: KernelObjectId, name: &str) -> Result<Handle> {
        let registry = self.registry.lock();
        let mut objects = self.objects.lock();

        objects.task(task)?.require(TaskPrivileges::SERVICE_USER)?;
        self.check_service_name(name)?;
        let service_id = registry.lookup(name).ok_or(KernelError::NotFound)?;

        let service = objects.service(service_id)?;
        let entry = HandleEntry { object: service.channel(), rights: service.subscriber_rights() };

        let handle = objects.task_mut(task)?.handles.insert(entry)?;
        objects.retain(entry.object);
        objects.service_mut(service_id)?.add_subscriber(task);

        debug!("Task {} subscribed to '{}' as {:?}", task, name, handle);
        Ok(handle)
    }

    /// Withdraw a service the caller provides
    ///
    /// Handles subscribers already hold stay valid; the channel lives on as
    /// long as they do.
    ///
    /// # Errors
    /// - `NotFound` if no service has that name
    /// - `AccessDenied` if the caller is not the provider
    pub fn unregister_service(&self, task: KernelObjectId, name: &str) -> Result<()> {
        let reclaim = {
            let mut registry = self.registry.lock();
            let mut objects = self.objects.lock();

            let service = registry.lookup(name).ok_or(KernelError::NotFound)?;
            if objects.service(service)?.provider() != task {
                return Err(KernelError::AccessDenied);
            }

            registry.remove(name);
            info!("Task {} unregistered service '{}'", task, name);
            objects.release(service)
        };

        self.finish(reclaim);
        Ok(())
    }

    pub fn lookup_service(&self, name: &str) -> Option<ServiceInfo> {
        let registry = self.registry.lock();
        let objects = self.objects.lock();

        let id = registry.lookup(name)?;
        let service = objects.service(id).ok()?;
        Some(ServiceInfo {
            service: id,
            provider: service.provider(),
            channel: service.channel(),
            subscribers: service.subscribers().to_vec(),
        })
    }

    /// Subscribers of `name` in subscription order
    pub fn service_subscribers(&self, name: &str) -> Result<Vec<KernelObjectId>> {
        self.lookup_service(name).map(|info| info.subscribers).ok_or(KernelError::NotFound)
    }

    /// Names of every registered service
    pub fn service_names(&self) -> Vec<String> {
        self.registry.lock().iter().map(|(name, _)| String::from(name)).collect()
    }
}
