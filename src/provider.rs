use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use sysinfo::{CpuExt, NetworkExt, NetworksExt, System, SystemExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("counter target '{0}' is not present")]
    MissingTarget(String),
    #[error("counter is not supported on this platform: {0}")]
    Unsupported(&'static str),
    #[error("failed to read {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Probe(String),
}

/// Identity of one instantaneous counter. Per-target counters carry the
/// volume or interface name they are bound to; combined "all targets"
/// readings are assembled by the sampler from per-target counters, never
/// from a separate counter here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterId {
    CpuLoad,
    MemoryLoad,
    DiskBytesPerSec(String),
    NetReceivedBytesPerSec(String),
    NetSentBytesPerSec(String),
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterId::CpuLoad => write!(f, "cpu load"),
            CounterId::MemoryLoad => write!(f, "memory load"),
            CounterId::DiskBytesPerSec(volume) => write!(f, "disk throughput ({volume})"),
            CounterId::NetReceivedBytesPerSec(iface) => {
                write!(f, "network download throughput ({iface})")
            }
            CounterId::NetSentBytesPerSec(iface) => {
                write!(f, "network upload throughput ({iface})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Volume,
    NetworkInterface,
}

/// Capability seam over the OS instrumentation. One provider instance owns
/// the underlying counter handles for one polling cadence and must not be
/// shared with timers running on another cadence.
pub trait CounterProvider: Send {
    fn read_instantaneous(&mut self, counter: &CounterId) -> Result<f64, ProviderError>;
    fn list_targets(&mut self, kind: TargetKind) -> Result<Vec<String>, ProviderError>;
}

#[derive(PartialEq, Eq, Hash)]
enum RateKey {
    Disk(String),
    NetRx(String),
    NetTx(String),
}

struct RateState {
    total_bytes: u64,
    read_at: Instant,
}

/// Production provider: sysinfo for CPU, memory and NIC byte totals,
/// /proc/diskstats for per-volume throughput. Throughput counters are
/// cumulative, so each read reports the delta against the previous read of
/// the same target; the first read primes the counter and reports zero.
pub struct SysinfoProvider {
    system: System,
    rates: HashMap<RateKey, RateState>,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            rates: HashMap::new(),
        }
    }

    fn update_rate(&mut self, key: RateKey, total_bytes: u64) -> f64 {
        let now = Instant::now();
        let rate = match self.rates.get(&key) {
            Some(prev) => {
                let elapsed = now.duration_since(prev.read_at).as_secs_f64();
                if elapsed > 0.0 {
                    total_bytes.saturating_sub(prev.total_bytes) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.rates.insert(
            key,
            RateState {
                total_bytes,
                read_at: now,
            },
        );
        rate
    }

    fn net_totals(&mut self, iface: &str) -> Result<(u64, u64), ProviderError> {
        self.system.refresh_networks_list();
        self.system.refresh_networks();
        self.system
            .networks()
            .iter()
            .find(|(name, _)| name.as_str() == iface)
            .map(|(_, data)| (data.total_received(), data.total_transmitted()))
            .ok_or_else(|| ProviderError::MissingTarget(iface.to_string()))
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterProvider for SysinfoProvider {
    fn read_instantaneous(&mut self, counter: &CounterId) -> Result<f64, ProviderError> {
        match counter {
            CounterId::CpuLoad => {
                self.system.refresh_cpu();
                let cpus = self.system.cpus();
                if cpus.is_empty() {
                    return Err(ProviderError::Probe("no CPUs reported".to_string()));
                }
                let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
                Ok(f64::from(sum) / cpus.len() as f64)
            }
            CounterId::MemoryLoad => {
                self.system.refresh_memory();
                let total = self.system.total_memory();
                if total == 0 {
                    return Err(ProviderError::Probe(
                        "total memory reported as zero".to_string(),
                    ));
                }
                Ok((self.system.used_memory() as f64 / total as f64) * 100.0)
            }
            CounterId::DiskBytesPerSec(volume) => {
                let totals = read_disk_totals()?;
                let total_bytes = totals
                    .iter()
                    .find(|(name, _)| name == volume)
                    .map(|(_, bytes)| *bytes)
                    .ok_or_else(|| ProviderError::MissingTarget(volume.clone()))?;
                Ok(self.update_rate(RateKey::Disk(volume.clone()), total_bytes))
            }
            CounterId::NetReceivedBytesPerSec(iface) => {
                let (rx, _tx) = self.net_totals(iface)?;
                Ok(self.update_rate(RateKey::NetRx(iface.clone()), rx))
            }
            CounterId::NetSentBytesPerSec(iface) => {
                let (_rx, tx) = self.net_totals(iface)?;
                Ok(self.update_rate(RateKey::NetTx(iface.clone()), tx))
            }
        }
    }

    fn list_targets(&mut self, kind: TargetKind) -> Result<Vec<String>, ProviderError> {
        match kind {
            TargetKind::Volume => Ok(read_disk_totals()?
                .into_iter()
                .map(|(name, _)| name)
                .collect()),
            TargetKind::NetworkInterface => {
                self.system.refresh_networks_list();
                Ok(self
                    .system
                    .networks()
                    .iter()
                    .map(|(name, _)| name.clone())
                    .collect())
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn read_disk_totals() -> Result<Vec<(String, u64)>, ProviderError> {
    let text =
        std::fs::read_to_string("/proc/diskstats").map_err(|source| ProviderError::Io {
            what: "/proc/diskstats".to_string(),
            source,
        })?;
    Ok(parse_diskstats(&text))
}

#[cfg(not(target_os = "linux"))]
fn read_disk_totals() -> Result<Vec<(String, u64)>, ProviderError> {
    Err(ProviderError::Unsupported(
        "disk throughput counters require /proc/diskstats",
    ))
}

/// Cumulative bytes transferred per block device, sectors are 512 bytes.
/// Virtual devices (loop, ram, zram) are not meaningful uptime policies and
/// are filtered out.
fn parse_diskstats(text: &str) -> Vec<(String, u64)> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                return None;
            }
            let name = parts[2];
            if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram") {
                return None;
            }
            let sectors_read: u64 = parts[5].parse().ok()?;
            let sectors_written: u64 = parts[9].parse().ok()?;
            Some((
                name.to_string(),
                sectors_read.saturating_add(sectors_written).saturating_mul(512),
            ))
        })
        .collect()
}
