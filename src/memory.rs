//! Memory usage sampling for the batch processor.
//!
//! The batch loop asks a [`MemorySampler`] for the current usage after each
//! chunk. `None` means the platform offers no reading; the ceiling is then
//! never considered exceeded.

use std::sync::Mutex;

use log::debug;
use sysinfo::{Pid, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of the current memory usage, in megabytes.
pub trait MemorySampler: Send + Sync {
    fn used_mb(&self) -> Option<f64>;
}

impl<F> MemorySampler for F
where
    F: Fn() -> Option<f64> + Send + Sync,
{
    fn used_mb(&self) -> Option<f64> {
        self()
    }
}

/// Resident memory of the current process, read through sysinfo.
///
/// The `System` handle is cached and only this process is refreshed per
/// sample.
pub struct ProcessMemorySampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!("[MemorySampler] Process id unavailable: {}", e);
                None
            }
        };
        Self { system: Mutex::new(System::new()), pid }
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn used_mb(&self) -> Option<f64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|process| process.memory() as f64 / BYTES_PER_MB)
    }
}

/// A constant reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FixedMemorySampler(pub Option<f64>);

impl MemorySampler for FixedMemorySampler {
    fn used_mb(&self) -> Option<f64> {
        self.0
    }
}
