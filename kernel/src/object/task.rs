//! Task objects
//!
//! A task owns its handle table and address space. Its state machine:
//!
//! ```text
//!            dispatch            block
//!   Ready ─────────────▶ Running ─────────▶ Blocked
//!     ▲  ◀─────────────     │                  │
//!     │   preempt/yield     │ exit/kill        │ exit/kill
//!     │                     ▼                  ▼
//!     └──────── wake ───  Dead  ◀──────────────┘
//! ```
//!
//! (`wake` goes Blocked → Ready; `kill` is also valid from Ready.) Dead is
//! terminal. Every illegal transition fails with `InvalidState` and leaves the
//! task untouched.

use super::KernelObjectId;
use crate::error::{KernelError, Result};
use crate::handle::HandleTable;
use crate::memory::AddressSpace;
use alloc::string::String;
use libpebble::TaskPrivileges;

/// Why a task is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskBlock {
    /// Waiting for a message on a channel
    OnChannel(KernelObjectId),
    /// Waiting for an event the architecture layer will signal
    OnEvent(u64),
}

/// Scheduling state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked(TaskBlock),
    Dead,
}

#[derive(Debug)]
pub struct Task {
    name: String,
    privileges: TaskPrivileges,
    state: TaskState,
    exit_code: Option<u64>,
    pub handles: HandleTable,
    pub address_space: AddressSpace,
}

impl Task {
    /// Create a Ready task with an empty handle table and address space
    pub fn new(name: &str, privileges: TaskPrivileges, max_handles: usize) -> Self {
        Self {
            name: String::from(name),
            privileges,
            state: TaskState::Ready,
            exit_code: None,
            handles: HandleTable::new(max_handles),
            address_space: AddressSpace::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn privileges(&self) -> TaskPrivileges {
        self.privileges
    }

    /// Fail with `MissingPrivilege` unless the task holds all of `required`
    pub fn require(&self, required: TaskPrivileges) -> Result<()> {
        if self.privileges.contains(required) {
            Ok(())
        } else {
            Err(KernelError::MissingPrivilege)
        }
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn exit_code(&self) -> Option<u64> {
        self.exit_code
    }

    /// Ready → Running
    pub fn dispatch(&mut self) -> Result<()> {
        self.transition(TaskState::Ready, TaskState::Running)
    }

    /// Running → Ready (preemption or a voluntary yield)
    pub fn preempt(&mut self) -> Result<()> {
        self.transition(TaskState::Running, TaskState::Ready)
    }

    /// Running → Blocked
    pub fn block(&mut self, reason: TaskBlock) -> Result<()> {
        self.transition(TaskState::Running, TaskState::Blocked(reason))
    }

    /// Blocked → Ready
    pub fn wake(&mut self) -> Result<TaskBlock> {
        match self.state {
            TaskState::Blocked(reason) => {
                self.state = TaskState::Ready;
                Ok(reason)
            }
            _ => Err(KernelError::InvalidState),
        }
    }

    /// Any live state → Dead
    ///
    /// # Returns
    /// The state the task was in, so the caller can undo its queueing
    pub fn kill(&mut self, exit_code: u64) -> Result<TaskState> {
        match self.state {
            TaskState::Dead => Err(KernelError::InvalidState),
            previous => {
                self.state = TaskState::Dead;
                self.exit_code = Some(exit_code);
                Ok(previous)
            }
        }
    }

    fn transition(&mut self, from: TaskState, to: TaskState) -> Result<()> {
        if self.state != from {
            return Err(KernelError::InvalidState);
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("test", TaskPrivileges::empty(), 16)
    }

    #[test]
    fn test_full_lifecycle() {
        let mut task = task();
        assert_eq!(task.state(), TaskState::Ready);
        task.dispatch().unwrap();
        task.block(TaskBlock::OnChannel(KernelObjectId(9))).unwrap();
        assert_eq!(task.wake(), Ok(TaskBlock::OnChannel(KernelObjectId(9))));
        task.dispatch().unwrap();
        task.preempt().unwrap();
        assert_eq!(task.kill(3), Ok(TaskState::Ready));
        assert_eq!(task.exit_code(), Some(3));
    }

    #[test]
    fn test_illegal_transitions() {
        let mut task = task();
        assert_eq!(task.block(TaskBlock::OnEvent(1)), Err(KernelError::InvalidState));
        assert_eq!(task.preempt(), Err(KernelError::InvalidState));
        assert_eq!(task.wake(), Err(KernelError::InvalidState));

        task.dispatch().unwrap();
        task.block(TaskBlock::OnEvent(1)).unwrap();
        // A blocked task cannot be dispatched
        assert_eq!(task.dispatch(), Err(KernelError::InvalidState));
        assert_eq!(task.state(), TaskState::Blocked(TaskBlock::OnEvent(1)));
    }

    #[test]
    fn test_dead_is_terminal() {
        let mut task = task();
        task.kill(0).unwrap();
        assert_eq!(task.dispatch(), Err(KernelError::InvalidState));
        assert_eq!(task.wake(), Err(KernelError::InvalidState));
        assert_eq!(task.kill(1), Err(KernelError::InvalidState));
        assert_eq!(task.exit_code(), Some(0));
    }

    #[test]
    fn test_privileges() {
        let task = Task::new("logger", TaskPrivileges::EARLY_LOGGING, 16);
        assert!(task.require(TaskPrivileges::EARLY_LOGGING).is_ok());
        assert_eq!(task.require(TaskPrivileges::SERVICE_PROVIDER), Err(KernelError::MissingPrivilege));
    }
}
