//! Kernel logger
//!
//! Implements `log::Log` on top of a [`LogSink`], the minimal output device
//! the architecture layer provides (a UART, a framebuffer console, or nothing
//! at all). The sink can be swapped at any time, e.g. from an early serial
//! port to a graphical console once the framebuffer is up.

use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Output device for kernel log lines
///
/// Only `putc` is required. Full drivers live in user space.
pub trait LogSink: Send + Sync {
    /// Write a single byte
    fn putc(&self, c: u8);

    /// Write a string
    ///
    /// Default implementation writes byte by byte with CRLF line endings.
    fn puts(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.putc(b'\r');
            }
            self.putc(byte);
        }
    }
}

/// Discards everything
pub struct NullSink;

impl LogSink for NullSink {
    #[inline]
    fn putc(&self, _c: u8) {}

    #[inline]
    fn puts(&self, _s: &str) {}
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.puts(s);
        Ok(())
    }
}

/// `log::Log` implementation writing `[LEVEL] target: message` lines
pub struct KernelLogger {
    sink: Mutex<&'static dyn LogSink>,
}

impl KernelLogger {
    pub const fn new() -> Self {
        Self { sink: Mutex::new(&NullSink as &dyn LogSink) }
    }

    /// Replace the output device
    pub fn set_sink(&self, sink: &'static dyn LogSink) {
        *self.sink.lock() = sink;
    }
}

impl Default for KernelLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let sink = *self.sink.lock();
        let _ = writeln!(SinkWriter(sink), "[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

pub static LOGGER: KernelLogger = KernelLogger::new();

/// Install the kernel logger with `sink` as its output
///
/// Later calls only swap the sink and level.
///
/// # Errors
/// Returns `SetLoggerError` if a different logger was installed first
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.set_sink(sink);
    log::set_max_level(level);

    static INSTALLED: spin::Once<bool> = spin::Once::new();
    if *INSTALLED.call_once(|| log::set_logger(&LOGGER).is_ok()) {
        Ok(())
    } else {
        // Someone else's logger is in place; report it
        log::set_logger(&LOGGER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    struct Capture(Mutex<String>);

    impl LogSink for Capture {
        fn putc(&self, c: u8) {
            self.0.lock().push(c as char);
        }
    }

    #[test]
    fn test_puts_uses_crlf() {
        let capture = Capture(Mutex::new(String::new()));
        capture.puts("a\nb");
        assert_eq!(capture.0.lock().as_str(), "a\r\nb");
    }

    #[test]
    fn test_writer_forwards_to_sink() {
        let capture = Capture(Mutex::new(String::new()));
        let _ = write!(SinkWriter(&capture), "{}-{}", 1, 2);
        assert_eq!(capture.0.lock().as_str(), "1-2");
    }
}
