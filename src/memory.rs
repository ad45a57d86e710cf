//! Host memory monitoring

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;

/// Point-in-time memory snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryUsage {
    /// Share of host memory in use, 0.0 - 100.0
    pub used_percent: f64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryUsage {
    /// Build a snapshot from raw counters. "Used" for the percentage is
    /// everything that is not available, which includes reclaimable caches.
    pub fn from_counters(total_bytes: u64, available_bytes: u64, used_bytes: u64) -> Self {
        let used_percent = if total_bytes == 0 {
            0.0
        } else {
            total_bytes.saturating_sub(available_bytes) as f64 / total_bytes as f64 * 100.0
        };
        Self {
            used_percent,
            available_bytes,
            used_bytes,
            total_bytes,
        }
    }

    /// `used_percent` as a fraction, comparable with `max_memory_usage`
    pub fn used_fraction(&self) -> f64 {
        self.used_percent / 100.0
    }
}

/// Source of memory snapshots. Every call must query fresh values.
pub trait MemoryMonitor: Send + Sync {
    fn snapshot(&self) -> MemoryUsage;
}

/// Reads host memory through `sysinfo`
pub struct SystemMemoryMonitor {
    system: Mutex<System>,
}

impl SystemMemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn snapshot(&self) -> MemoryUsage {
        let mut system = self.system.lock();
        system.refresh_memory();
        MemoryUsage::from_counters(
            system.total_memory(),
            system.available_memory(),
            system.used_memory(),
        )
    }
}
