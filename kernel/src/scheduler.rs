//! Scheduler - task lifecycle and run queue
//!
//! The scheduler itself only orders tasks: a FIFO of Ready tasks plus the one
//! that is Running. The state lives in the task objects; the operations below
//! keep the two in step.
//!
//! ## Architecture
//!
//! - Round-robin over a single ready queue
//! - Woken and preempted tasks go to the back
//! - Context switching belongs to the architecture layer, which asks
//!   [`Kernel::schedule`] what to run next
//!
//! ## Termination
//!
//! Exiting or killing a task, in order: marks it Dead, takes it off the run
//! queue and any channel wait list, unregisters the services it provides,
//! removes it from every subscriber list, and only then releases its handles,
//! mappings and the kernel's own reference.

use crate::error::{KernelError, Result};
use crate::object::{KernelObject, KernelObjectId, ObjectTable, Reclaim, Task, TaskBlock, TaskState};
use crate::Kernel;
use alloc::collections::VecDeque;
use libpebble::TaskPrivileges;
use log::{debug, info, trace};

/// Run queue
#[derive(Debug, Default)]
pub struct Scheduler {
    ready: VecDeque<KernelObjectId>,
    current: Option<KernelObjectId>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self { ready: VecDeque::new(), current: None }
    }

    /// Append a Ready task, once
    pub fn enqueue(&mut self, task: KernelObjectId) {
        if !self.ready.contains(&task) {
            self.ready.push_back(task);
        }
    }

    /// Take the next task to run off the front of the queue
    pub fn take_next(&mut self) -> Option<KernelObjectId> {
        self.ready.pop_front()
    }

    /// Forget a task entirely (queue and current slot)
    pub fn remove(&mut self, task: KernelObjectId) {
        self.ready.retain(|&queued| queued != task);
        if self.current == Some(task) {
            self.current = None;
        }
    }

    /// Clear the current slot if `task` holds it
    pub fn descheduled(&mut self, task: KernelObjectId) {
        if self.current == Some(task) {
            self.current = None;
        }
    }

    #[inline]
    pub fn current(&self) -> Option<KernelObjectId> {
        self.current
    }

    #[inline]
    pub fn set_current(&mut self, task: Option<KernelObjectId>) {
        self.current = task;
    }

    pub fn ready(&self) -> impl Iterator<Item = KernelObjectId> + '_ {
        self.ready.iter().copied()
    }

    #[inline]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }
}

/// Blocked → Ready, queueing the task and dropping any wait-list entry
///
/// Tasks that are gone or not blocked are left alone.
pub(crate) fn wake_locked(objects: &mut ObjectTable, scheduler: &mut Scheduler, task: KernelObjectId) -> Result<()> {
    let reason = objects.task_mut(task)?.wake()?;
    if let TaskBlock::OnChannel(channel) = reason {
        if let Ok(channel) = objects.channel_mut(channel) {
            channel.remove_waiter(task);
        }
    }
    scheduler.enqueue(task);
    trace!("{}: woken ({:?})", task, reason);
    Ok(())
}

impl Kernel {
    /// Create a Ready task and put it on the run queue
    ///
    /// The kernel keeps the creation reference until the task dies.
    pub fn spawn_task(&self, name: &str, privileges: TaskPrivileges) -> Result<KernelObjectId> {
        let mut objects = self.objects.lock();
        let task = objects.create(KernelObject::Task(Task::new(name, privileges, self.config.max_handles_per_task)));
        self.scheduler.lock().enqueue(task);
        info!("Spawned task '{}' as {} with {:?}", name, task, privileges);
        Ok(task)
    }

    /// Pick the next task to run, round-robin
    ///
    /// A Running task is preempted to the back of the queue first, so with a
    /// single runnable task that task is picked again.
    ///
    /// # Returns
    /// The task now Running, or `None` if nothing is runnable
    pub fn schedule(&self) -> Option<KernelObjectId> {
        let mut objects = self.objects.lock();
        let mut scheduler = self.scheduler.lock();

        if let Some(current) = scheduler.current() {
            if let Ok(task) = objects.task_mut(current) {
                if task.preempt().is_ok() {
                    scheduler.enqueue(current);
                }
            }
            scheduler.set_current(None);
        }

        while let Some(next) = scheduler.take_next() {
            // Only Ready tasks are queued; skip anything that changed under us
            match objects.task_mut(next).and_then(|task| task.dispatch()) {
                Ok(()) => {
                    scheduler.set_current(Some(next));
                    trace!("Dispatched {}", next);
                    return Some(next);
                }
                Err(_) => continue,
            }
        }

        None
    }

    /// The task currently Running, if any
    pub fn current_task(&self) -> Option<KernelObjectId> {
        self.scheduler.lock().current()
    }

    pub fn task_state(&self, task: KernelObjectId) -> Result<TaskState> {
        Ok(self.objects.lock().task(task)?.state())
    }

    /// Running → Ready, to the back of the queue
    pub fn yield_task(&self, task: KernelObjectId) -> Result<()> {
        let mut objects = self.objects.lock();
        objects.task_mut(task)?.preempt()?;

        let mut scheduler = self.scheduler.lock();
        scheduler.descheduled(task);
        scheduler.enqueue(task);
        trace!("{}: yielded", task);
        Ok(())
    }

    /// Running → Blocked
    ///
    /// Blocking on a channel also puts the task on that channel's wait list.
    ///
    /// # Errors
    /// - `InvalidState` if the task isn't Running, or the channel already
    ///   has a message waiting
    pub fn block_task(&self, task: KernelObjectId, reason: TaskBlock) -> Result<()> {
        let mut objects = self.objects.lock();
        if let TaskBlock::OnChannel(channel) = reason {
            if !objects.channel(channel)?.is_empty() {
                return Err(KernelError::InvalidState);
            }
        }

        objects.task_mut(task)?.block(reason)?;
        if let TaskBlock::OnChannel(channel) = reason {
            objects.channel_mut(channel)?.add_waiter(task);
        }

        self.scheduler.lock().descheduled(task);
        trace!("{}: blocked ({:?})", task, reason);
        Ok(())
    }

    /// Blocked → Ready
    pub fn wake_task(&self, task: KernelObjectId) -> Result<()> {
        let mut objects = self.objects.lock();
        let mut scheduler = self.scheduler.lock();
        wake_locked(&mut objects, &mut scheduler, task)
    }

    /// Wake every task blocked on `event`
    ///
    /// # Returns
    /// How many tasks were woken
    pub fn signal_event(&self, event: u64) -> usize {
        let mut objects = self.objects.lock();
        let mut scheduler = self.scheduler.lock();

        let waiting: alloc::vec::Vec<KernelObjectId> = objects
            .iter()
            .filter_map(|(id, object, _)| match object {
                KernelObject::Task(task) if task.state() == TaskState::Blocked(TaskBlock::OnEvent(event)) => Some(id),
                _ => None,
            })
            .collect();

        waiting.iter().filter(|&&task| wake_locked(&mut objects, &mut scheduler, task).is_ok()).count()
    }

    /// A task ends itself
    pub fn exit_task(&self, task: KernelObjectId, code: u64) -> Result<()> {
        info!("Task {} exiting with code {}", task, code);
        self.terminate(task, code)
    }

    /// End a task from outside, whatever state it is in
    pub fn kill_task(&self, task: KernelObjectId) -> Result<()> {
        info!("Killing task {}", task);
        self.terminate(task, u64::MAX)
    }

    fn terminate(&self, task: KernelObjectId, code: u64) -> Result<()> {
        let mut reclaim = Reclaim::default();
        {
            let mut registry = self.registry.lock();
            let mut objects = self.objects.lock();

            let previous = objects.task_mut(task)?.kill(code)?;
            if let TaskState::Blocked(TaskBlock::OnChannel(channel)) = previous {
                if let Ok(channel) = objects.channel_mut(channel) {
                    channel.remove_waiter(task);
                }
            }
            self.scheduler.lock().remove(task);

            crate::service::forget_task(&mut registry, &mut objects, task, &mut reclaim);

            let dead = objects.task_mut(task)?;
            let handles = dead.handles.take_all();
            let mappings = dead.address_space.take_mappings();
            debug!("{}: releasing {} handle(s) and {} mapping(s)", task, handles.len(), mappings.len());
            for entry in handles {
                objects.release_into(entry.object, &mut reclaim);
            }
            for mapping in mappings {
                objects.release_into(mapping.object, &mut reclaim);
            }

            objects.release_into(task, &mut reclaim);
        }

        self.finish(reclaim);
        Ok(())
    }
}
