//! Kernel logger wiring: early-log text reaches the installed sink

mod common;

use common::new_kernel;
use kernel::logger::{self, LogSink};
use libpebble::TaskPrivileges;
use log::LevelFilter;
use std::sync::Mutex;

struct Capture(Mutex<String>);

impl LogSink for Capture {
    fn putc(&self, c: u8) {
        self.0.lock().unwrap().push(c as char);
    }
}

static CAPTURE: Capture = Capture(Mutex::new(String::new()));

// One test per binary, since the logger is process-wide
#[test]
fn test_early_log_reaches_sink() {
    let kernel = new_kernel();
    logger::init(&CAPTURE, kernel.config().log_level).unwrap();
    log::set_max_level(LevelFilter::Info);

    let task = kernel.spawn_task("greeter", TaskPrivileges::EARLY_LOGGING).unwrap();
    kernel.syscalls(task).early_log("hi there").unwrap();

    let output = CAPTURE.0.lock().unwrap().clone();
    assert!(output.contains("[INFO] user: [greeter] hi there\r\n"), "captured: {output:?}");

    log::set_max_level(LevelFilter::Off);
    kernel.syscalls(task).early_log("dropped").unwrap();
    assert!(!CAPTURE.0.lock().unwrap().contains("dropped"));
}
