//! Host introspection and auto-tuning.
//!
//! [`SystemReport::detect`] inspects logical cores, physical RAM and the presence
//! of a GPU, then classifies the machine into a [`Profile`] that decides the
//! default I/O chunk size. Detection never fails: anything that cannot be read
//! degrades to conservative defaults.
//!
//! The pipeline takes a report by value, so tests can pin hardware with
//! [`SystemReport::synthetic`]. [`profile`] caches one detected report for the
//! lifetime of the process.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// RAM assumed when the host does not tell us.
pub const FALLBACK_MEMORY_BYTES: u64 = 2 * GIB;
/// Chunk size used when hardware introspection is unavailable.
pub const FALLBACK_IO_CHUNK_MB: u32 = 16;

/// Coarse machine class driving default tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    Constrained,
    Standard,
    HighMemory,
    Workstation,
}

impl Profile {
    /// Classify a host from its core count and total RAM.
    #[must_use]
    pub fn classify(threads: u32, total_memory_bytes: u64) -> Self {
        if threads <= 1 || total_memory_bytes < 4 * GIB {
            Profile::Constrained
        } else if threads >= 16 && total_memory_bytes >= 64 * GIB {
            Profile::Workstation
        } else if total_memory_bytes >= 32 * GIB {
            Profile::HighMemory
        } else {
            Profile::Standard
        }
    }

    /// Default streaming chunk for this class, in MiB.
    #[must_use]
    pub fn io_chunk_mb(self) -> u32 {
        match self {
            Profile::Constrained => 4,
            Profile::Standard => 16,
            Profile::HighMemory => 64,
            Profile::Workstation => 128,
        }
    }
}

/// Immutable snapshot of host capability for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemReport {
    pub profile: Profile,
    #[serde(rename = "threads")]
    pub thread_count: u32,
    pub io_chunk_mb: u32,
    pub gpu_detected: bool,
    #[serde(rename = "total_memory_mb", with = "as_mib")]
    pub total_memory_bytes: u64,
}

impl SystemReport {
    /// Inspect the current host.
    #[must_use]
    pub fn detect() -> Self {
        let gpu_detected = detect_gpu();
        let Some(total_memory_bytes) = total_memory_bytes() else {
            warn!("physical memory size unavailable; using conservative defaults");
            return Self {
                profile: Profile::Standard,
                thread_count: 1,
                io_chunk_mb: FALLBACK_IO_CHUNK_MB,
                gpu_detected,
                total_memory_bytes: FALLBACK_MEMORY_BYTES,
            };
        };
        let thread_count = u32::try_from(num_cpus::get()).unwrap_or(u32::MAX).max(1);
        let profile = Profile::classify(thread_count, total_memory_bytes);
        let report = Self {
            profile,
            thread_count,
            io_chunk_mb: profile.io_chunk_mb(),
            gpu_detected,
            total_memory_bytes,
        };
        debug!("detected host: {report:?}");
        report
    }

    /// Build a report with pinned values; the profile is derived from them.
    #[must_use]
    pub fn synthetic(thread_count: u32, io_chunk_mb: u32, total_memory_bytes: u64) -> Self {
        let thread_count = thread_count.max(1);
        Self {
            profile: Profile::classify(thread_count, total_memory_bytes),
            thread_count,
            io_chunk_mb: io_chunk_mb.max(1),
            gpu_detected: false,
            total_memory_bytes,
        }
    }

    /// Default chunk size in bytes.
    #[must_use]
    pub fn io_chunk_bytes(&self) -> u64 {
        u64::from(self.io_chunk_mb) * MIB
    }

    /// JSON form handed across the host boundary.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Process-wide cached report; detection runs at most once.
pub fn profile() -> &'static SystemReport {
    static REPORT: OnceLock<SystemReport> = OnceLock::new();
    REPORT.get_or_init(SystemReport::detect)
}

#[cfg(target_os = "linux")]
fn total_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&meminfo)
}

#[cfg(not(target_os = "linux"))]
fn total_memory_bytes() -> Option<u64> {
    None
}

/// Extract `MemTotal` (reported in kB) from `/proc/meminfo` text.
fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line
        .trim_start_matches("MemTotal:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    (kb > 0).then(|| kb * 1024)
}

fn detect_gpu() -> bool {
    const PROBES: &[&str] = &["/dev/nvidia0", "/proc/driver/nvidia/version", "/dev/kfd"];
    PROBES.iter().any(|p| std::path::Path::new(p).exists())
}

mod as_mib {
    use super::MIB;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(bytes / MIB)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let mib = u64::deserialize(d)?;
        mib.checked_mul(MIB).ok_or_else(|| {
            D::Error::custom(format!("total_memory_mb {mib} overflows a byte count"))
        })
    }
}
