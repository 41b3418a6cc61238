//! Memory usage probes for the batch sizer and memory guard.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{Pid, System};
use tracing::debug;

/// Current memory usage of the running process
pub trait MemoryProbe: Send + Sync {
    fn used_bytes(&self) -> u64;

    /// Physical memory available to the process, when known
    fn total_bytes(&self) -> Option<u64> {
        None
    }
}

/// Resident memory of this process via `sysinfo`
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for SystemMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemoryProbe")
            .field("pid", &self.pid)
            .finish()
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            debug!("Current pid unavailable - memory probe will report 0 bytes");
        }
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn used_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system.process(pid).map_or(0, |process| process.memory())
    }

    fn total_bytes(&self) -> Option<u64> {
        let mut system = self.system.lock();
        system.refresh_memory();
        Some(system.total_memory()).filter(|total| *total > 0)
    }
}

/// Settable probe for tests and hosts that measure memory themselves
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    used: AtomicU64,
}

impl FixedMemoryProbe {
    pub fn new(used_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(used_bytes),
        }
    }

    pub fn set(&self, used_bytes: u64) {
        self.used.store(used_bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probe() {
        let probe = FixedMemoryProbe::new(10);
        assert_eq!(probe.used_bytes(), 10);
        probe.set(20);
        assert_eq!(probe.used_bytes(), 20);
        assert_eq!(probe.total_bytes(), None);
    }

    #[test]
    fn test_system_probe_reports_this_process() {
        let probe = SystemMemoryProbe::new();
        assert!(probe.used_bytes() > 0);
    }
}
