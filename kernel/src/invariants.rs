//! Runtime-checkable kernel invariants
//!
//! Used by the integration tests after every scenario and, with the
//! `debug-invariants` feature, after every raw syscall.
//!
//! # Invariants
//!
//! 1. **Reference counts**: every object's count equals the references that
//!    exist to it (handles, mappings, queued handles, services, the registry
//!    and the kernel's hold on each task that hasn't died)
//! 2. **Handle validity**: every handle and mapping names a live object
//! 3. **Wait lists**: a task is on a channel's wait list exactly when it is
//!    Blocked on that channel, and no channel has both queued messages and
//!    waiters
//! 4. **Run queue**: the queue holds exactly the Ready tasks and `current` is
//!    the one Running task
//! 5. **Physical memory**: holes are sorted, disjoint, never adjacent and lie
//!    inside managed regions; free plus owned-object bytes is the total
//! 6. **Registry**: every name maps to a live service of that name whose
//!    channel is live
//! 7. **Channel bounds**: no channel holds more than its capacity
//! 8. **ID monotonicity**: every live id is below the next id

use crate::object::{KernelObject, KernelObjectId, TaskBlock, TaskState};
use crate::Kernel;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use hal::memory::{FrameSize, Size4KiB};

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// What went wrong
    pub description: String,
}

impl InvariantViolation {
    fn new(invariant: &'static str, description: String) -> Self {
        Self { invariant, description }
    }
}

/// Check every invariant
///
/// Takes every kernel lock, in the usual order, for the duration.
///
/// # Returns
/// The violations found; empty if all invariants hold
pub fn check_all(kernel: &Kernel) -> Vec<InvariantViolation> {
    let registry = kernel.registry.lock();
    let objects = kernel.objects.lock();
    let pmm = kernel.pmm.lock();
    let scheduler = kernel.scheduler.lock();

    let mut violations = Vec::new();
    let mut expected: BTreeMap<KernelObjectId, usize> = BTreeMap::new();
    let mut reference = |id: KernelObjectId, from: String, violations: &mut Vec<InvariantViolation>| {
        if !objects.contains(id) {
            violations.push(InvariantViolation::new("handle_validity", format!("{} refers to dead object {}", from, id)));
        }
        *expected.entry(id).or_insert(0) += 1;
    };

    let mut owned_bytes = 0u64;
    for (id, object, _) in objects.iter() {
        if id >= objects.next_id() {
            violations.push(InvariantViolation::new(
                "id_monotonicity",
                format!("{} is not below the next id {}", id, objects.next_id()),
            ));
        }

        match object {
            KernelObject::Task(task) => {
                if task.state() != TaskState::Dead {
                    reference(id, format!("the kernel's hold on {}", id), &mut violations);
                }
                for (handle, entry) in task.handles.entries() {
                    reference(entry.object, format!("{:?} of task {}", handle, id), &mut violations);
                }
                for mapping in task.address_space.mappings() {
                    reference(mapping.object, format!("mapping at {:?} of task {}", mapping.start, id), &mut violations);
                }
            }
            KernelObject::Channel(channel) => {
                for message in channel.messages() {
                    for entry in &message.handles {
                        reference(entry.object, format!("message queued on {}", id), &mut violations);
                    }
                }
            }
            KernelObject::Service(service) => {
                reference(service.channel(), format!("service {}", id), &mut violations);
            }
            KernelObject::MemoryObject(memory) => {
                if memory.owns_frames() {
                    owned_bytes += memory.size();
                }
            }
        }
    }

    for (name, service) in registry.iter() {
        reference(service, format!("registry entry '{}'", name), &mut violations);
    }

    for (id, _, ref_count) in objects.iter() {
        let references = expected.get(&id).copied().unwrap_or(0);
        if references != ref_count {
            violations.push(InvariantViolation::new(
                "reference_counts",
                format!("{} has ref_count {} but {} reference(s) exist", id, ref_count, references),
            ));
        }
    }

    violations.extend(check_wait_lists(&objects));

    let ready: Vec<KernelObjectId> = scheduler.ready().collect();
    for (id, object, _) in objects.iter() {
        let KernelObject::Task(task) = object else { continue };
        let queued = ready.contains(&id);
        match task.state() {
            TaskState::Ready if !queued => violations.push(InvariantViolation::new(
                "run_queue",
                format!("task {} is Ready but not queued", id),
            )),
            TaskState::Running if scheduler.current() != Some(id) => violations.push(InvariantViolation::new(
                "run_queue",
                format!("task {} is Running but not current", id),
            )),
            state if state != TaskState::Ready && queued => violations.push(InvariantViolation::new(
                "run_queue",
                format!("task {} is queued while {:?}", id, state),
            )),
            _ => {}
        }
    }
    for &id in &ready {
        if objects.task(id).is_err() {
            violations.push(InvariantViolation::new("run_queue", format!("queued {} is not a live task", id)));
        }
    }
    if let Some(current) = scheduler.current() {
        if objects.task(current).map(|task| task.state()) != Ok(TaskState::Running) {
            violations.push(InvariantViolation::new("run_queue", format!("current {} is not Running", current)));
        }
    }

    let holes = pmm.holes();
    for pair in holes.windows(2) {
        if pair[0].end() >= pair[1].base.as_u64() {
            violations.push(InvariantViolation::new(
                "physical_memory",
                format!("holes {:?} and {:?} overlap or touch", pair[0], pair[1]),
            ));
        }
    }
    for hole in holes {
        let inside = pmm.regions().iter().any(|region| region.base <= hole.base && hole.end() <= region.end());
        if !inside || hole.size == 0 || hole.size % Size4KiB::SIZE != 0 {
            violations.push(InvariantViolation::new("physical_memory", format!("malformed hole {:?}", hole)));
        }
    }
    let hole_bytes: u64 = holes.iter().map(|hole| hole.size).sum();
    if hole_bytes != pmm.free_bytes() {
        violations.push(InvariantViolation::new(
            "physical_memory",
            format!("holes add up to {} bytes, free_bytes is {}", hole_bytes, pmm.free_bytes()),
        ));
    }
    if owned_bytes != pmm.allocated_bytes() {
        violations.push(InvariantViolation::new(
            "physical_memory",
            format!("memory objects own {} bytes, allocator has {} allocated", owned_bytes, pmm.allocated_bytes()),
        ));
    }

    for (name, id) in registry.iter() {
        match objects.service(id) {
            Ok(service) if service.name() != name => violations.push(InvariantViolation::new(
                "registry",
                format!("'{}' maps to service {} named '{}'", name, id, service.name()),
            )),
            Ok(service) if objects.channel(service.channel()).is_err() => violations.push(InvariantViolation::new(
                "registry",
                format!("service '{}' has no live channel", name),
            )),
            Ok(_) => {}
            Err(_) => violations.push(InvariantViolation::new("registry", format!("'{}' maps to non-service {}", name, id))),
        }
    }

    violations
}

/// Invariants 3 and 7
fn check_wait_lists(objects: &crate::object::ObjectTable) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (id, object, _) in objects.iter() {
        match object {
            KernelObject::Channel(channel) => {
                if channel.len() > channel.capacity() {
                    violations.push(InvariantViolation::new(
                        "channel_bounds",
                        format!("channel {} holds {} of {}", id, channel.len(), channel.capacity()),
                    ));
                }
                if !channel.is_empty() && channel.waiters().next().is_some() {
                    violations.push(InvariantViolation::new(
                        "wait_lists",
                        format!("channel {} has {} message(s) queued and blocked receivers", id, channel.len()),
                    ));
                }
                for waiter in channel.waiters() {
                    let state = objects.task(waiter).map(|task| task.state());
                    if state != Ok(TaskState::Blocked(TaskBlock::OnChannel(id))) {
                        violations.push(InvariantViolation::new(
                            "wait_lists",
                            format!("{} waits on channel {} but is {:?}", waiter, id, state),
                        ));
                    }
                }
            }
            KernelObject::Task(task) => {
                if let TaskState::Blocked(TaskBlock::OnChannel(channel)) = task.state() {
                    let listed = objects.channel(channel).map(|c| c.waiters().any(|waiter| waiter == id)).unwrap_or(false);
                    if !listed {
                        violations.push(InvariantViolation::new(
                            "wait_lists",
                            format!("task {} is blocked on {} but not on its wait list", id, channel),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    violations
}
