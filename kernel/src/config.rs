//! Kernel configuration
//!
//! Limits that bound every per-task and per-object resource. Passed to
//! [`crate::Kernel::new`]; the default log level comes from the `log-*`
//! cargo features, the way the console is picked at compile time.

use crate::error::{KernelError, Result};
use log::LevelFilter;

/// Log level selected by cargo features
///
/// The most verbose enabled `log-*` feature wins; with none enabled the
/// kernel logs at `Info`.
pub const DEFAULT_LOG_LEVEL: LevelFilter = if cfg!(feature = "log-trace") {
    LevelFilter::Trace
} else if cfg!(feature = "log-debug") {
    LevelFilter::Debug
} else if cfg!(feature = "log-info") {
    LevelFilter::Info
} else if cfg!(feature = "log-warn") {
    LevelFilter::Warn
} else if cfg!(feature = "log-error") {
    LevelFilter::Error
} else {
    LevelFilter::Info
};

/// Resource limits and logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Messages a channel can hold before sends fail with `ChannelFull`
    pub channel_capacity: usize,
    /// Largest message payload in bytes
    pub max_message_bytes: usize,
    /// Most handles a single message can carry
    pub max_message_handles: usize,
    /// Handle table size per task (slot 0 is never issued)
    pub max_handles_per_task: usize,
    /// Longest service name in bytes
    pub max_service_name_len: usize,
    /// Longest early-log message in bytes
    pub max_early_log_len: usize,
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            max_message_bytes: 4096,
            max_message_handles: 8,
            max_handles_per_task: 256,
            max_service_name_len: 64,
            max_early_log_len: 1024,
            log_level: DEFAULT_LOG_LEVEL,
        }
    }
}

impl KernelConfig {
    /// Check the limits are usable
    ///
    /// # Errors
    /// `InvalidConfig` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(KernelError::InvalidConfig("channel_capacity must be non-zero"));
        }
        if self.max_message_bytes == 0 || self.max_message_bytes > u16::MAX as usize {
            return Err(KernelError::InvalidConfig("max_message_bytes must be in 1..=65535"));
        }
        if self.max_message_handles > u16::MAX as usize {
            return Err(KernelError::InvalidConfig("max_message_handles must fit in 16 bits"));
        }
        // Slot 0 is reserved, so one usable handle needs two slots
        if self.max_handles_per_task < 2 || self.max_handles_per_task > u32::MAX as usize {
            return Err(KernelError::InvalidConfig("max_handles_per_task must be in 2..=u32::MAX"));
        }
        if self.max_service_name_len == 0 {
            return Err(KernelError::InvalidConfig("max_service_name_len must be non-zero"));
        }
        if self.max_early_log_len == 0 {
            return Err(KernelError::InvalidConfig("max_early_log_len must be non-zero"));
        }
        Ok(())
    }
}
