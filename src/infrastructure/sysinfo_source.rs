//! Local-host counter source backed by `sysinfo`.
//!
//! Counters are addressed by the classic performance-counter names
//! (`Processor\% Processor Time\_Total`, `Process\Working Set\postgres`, ...).
//! Every handle shares one probe; each read refreshes only the part of the
//! system snapshot its counter needs.

use crate::domain::counter::CounterIdentity;
use crate::domain::errors::SampleError;
use crate::domain::ports::{CounterHandle, CounterSource};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Disks, Networks, ProcessesToUpdate, System};
use tracing::debug;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A counter resolved to what `sysinfo` can measure.
#[derive(Debug, Clone, PartialEq)]
enum Metric {
    CpuTotal,
    CpuCore(usize),
    AvailableBytes,
    AvailableMBytes,
    CommittedBytes,
    FreeBytes,
    WorkingSet(String),
    VirtualBytes(String),
    ProcessCpu(String),
    ProcessIoRead(String),
    ProcessIoWrite(String),
    NetReceived(String),
    NetSent(String),
    NetTotal(String),
    DiskFreeMegabytes(String),
    DiskFreePercent(String),
    ProcessCount,
    Uptime,
}

/// A single reading: a gauge is used as is, a cumulative total is turned into
/// a per-second rate by the handle.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Reading {
    Gauge(f64),
    Cumulative(u64),
}

struct Probe {
    system: System,
    networks: Networks,
    disks: Disks,
}

impl Probe {
    fn read(&mut self, metric: &Metric) -> Result<Reading, SampleError> {
        match metric {
            Metric::CpuTotal => {
                self.system.refresh_cpu_usage();
                Ok(Reading::Gauge(self.system.global_cpu_usage() as f64))
            }
            Metric::CpuCore(index) => {
                self.system.refresh_cpu_usage();
                self.system
                    .cpus()
                    .get(*index)
                    .map(|cpu| Reading::Gauge(cpu.cpu_usage() as f64))
                    .ok_or_else(|| SampleError::Unavailable(format!("processor {}", index)))
            }
            Metric::AvailableBytes => {
                self.system.refresh_memory();
                Ok(Reading::Gauge(self.system.available_memory() as f64))
            }
            Metric::AvailableMBytes => {
                self.system.refresh_memory();
                Ok(Reading::Gauge(
                    (self.system.available_memory() as f64 / BYTES_PER_MB).floor(),
                ))
            }
            Metric::CommittedBytes => {
                self.system.refresh_memory();
                let committed = self.system.used_memory() + self.system.used_swap();
                Ok(Reading::Gauge(committed as f64))
            }
            Metric::FreeBytes => {
                self.system.refresh_memory();
                Ok(Reading::Gauge(self.system.free_memory() as f64))
            }
            Metric::WorkingSet(name) => {
                let bytes = self.sum_processes(name, |p| p.memory())?;
                Ok(Reading::Gauge(bytes as f64))
            }
            Metric::VirtualBytes(name) => {
                let bytes = self.sum_processes(name, |p| p.virtual_memory())?;
                Ok(Reading::Gauge(bytes as f64))
            }
            Metric::ProcessCpu(name) => {
                let usage = self.sum_processes(name, |p| p.cpu_usage().round() as u64)?;
                Ok(Reading::Gauge(usage as f64))
            }
            Metric::ProcessIoRead(name) => {
                let total = self.sum_processes(name, |p| p.disk_usage().total_read_bytes)?;
                Ok(Reading::Cumulative(total))
            }
            Metric::ProcessIoWrite(name) => {
                let total = self.sum_processes(name, |p| p.disk_usage().total_written_bytes)?;
                Ok(Reading::Cumulative(total))
            }
            Metric::NetReceived(name) => {
                self.interface_total(name, |rx, _| rx).map(Reading::Cumulative)
            }
            Metric::NetSent(name) => {
                self.interface_total(name, |_, tx| tx).map(Reading::Cumulative)
            }
            Metric::NetTotal(name) => self
                .interface_total(name, |rx, tx| rx.saturating_add(tx))
                .map(Reading::Cumulative),
            Metric::DiskFreeMegabytes(mount) => {
                let (available, _) = self.disk_space(mount)?;
                Ok(Reading::Gauge((available as f64 / BYTES_PER_MB).floor()))
            }
            Metric::DiskFreePercent(mount) => {
                let (available, total) = self.disk_space(mount)?;
                if total == 0 {
                    return Ok(Reading::Gauge(0.0));
                }
                Ok(Reading::Gauge(available as f64 * 100.0 / total as f64))
            }
            Metric::ProcessCount => {
                self.system.refresh_processes(ProcessesToUpdate::All, true);
                Ok(Reading::Gauge(self.system.processes().len() as f64))
            }
            Metric::Uptime => Ok(Reading::Gauge(System::uptime() as f64)),
        }
    }

    /// Sum over every process with this exact name. Several processes may
    /// share a name; none is an unavailable instance.
    fn sum_processes(
        &mut self,
        name: &str,
        value: impl Fn(&sysinfo::Process) -> u64,
    ) -> Result<u64, SampleError> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let mut found = false;
        let mut total: u64 = 0;
        for process in self.system.processes_by_exact_name(OsStr::new(name)) {
            found = true;
            total = total.saturating_add(value(process));
        }
        if !found {
            return Err(SampleError::Unavailable(format!("process '{}'", name)));
        }
        Ok(total)
    }

    fn interface_total(
        &mut self,
        name: &str,
        pick: impl Fn(u64, u64) -> u64,
    ) -> Result<u64, SampleError> {
        self.networks.refresh(true);
        self.networks
            .list()
            .get(name)
            .map(|data| pick(data.total_received(), data.total_transmitted()))
            .ok_or_else(|| SampleError::Unavailable(format!("network interface '{}'", name)))
    }

    /// `(available, total)` bytes of the disk mounted at `mount`.
    fn disk_space(&mut self, mount: &str) -> Result<(u64, u64), SampleError> {
        self.disks.refresh(true);
        let wanted = normalize_mount(mount);
        self.disks
            .list()
            .iter()
            .find(|disk| normalize_mount(&disk.mount_point().to_string_lossy()) == wanted)
            .map(|disk| (disk.available_space(), disk.total_space()))
            .ok_or_else(|| SampleError::Unavailable(format!("disk '{}'", mount)))
    }
}

fn normalize_mount(mount: &str) -> String {
    mount.trim_end_matches(['/', '\\']).to_lowercase()
}

/// Counter source reading the local host.
pub struct SysinfoSource {
    probe: Arc<Mutex<Probe>>,
    host_name: Option<String>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let probe = Probe {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
        };
        Self {
            probe: Arc::new(Mutex::new(probe)),
            host_name: System::host_name(),
        }
    }

    fn is_local(&self, host: &str) -> bool {
        let host = host.trim();
        if host.is_empty()
            || host == "."
            || host.eq_ignore_ascii_case("localhost")
            || host == "127.0.0.1"
            || host == "::1"
        {
            return true;
        }
        self.host_name
            .as_deref()
            .map(|name| name.eq_ignore_ascii_case(host))
            .unwrap_or(false)
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for SysinfoSource {
    fn open(&mut self, identity: &CounterIdentity) -> Result<Box<dyn CounterHandle>, SampleError> {
        if !self.is_local(&identity.host) {
            return Err(SampleError::RemoteHost(identity.host.clone()));
        }
        let metric = resolve(identity)?;
        debug!("SysinfoSource: {} resolved to {:?}", identity, metric);
        Ok(Box::new(SysinfoHandle {
            probe: self.probe.clone(),
            metric,
            previous: None,
        }))
    }
}

/// Map category/counter/instance names (case-insensitive) to a metric.
fn resolve(identity: &CounterIdentity) -> Result<Metric, SampleError> {
    let category = identity.category.trim().to_lowercase();
    let counter = identity.counter.trim().to_lowercase();
    let instance = identity.instance.as_deref().map(str::trim);
    let required = || {
        instance
            .map(str::to_string)
            .ok_or_else(|| SampleError::MissingInstance(identity.key()))
    };
    let unknown = || SampleError::UnknownCounter {
        category: identity.category.clone(),
        counter: identity.counter.clone(),
    };

    match category.as_str() {
        "processor" => match counter.as_str() {
            "% processor time" => match instance {
                None => Ok(Metric::CpuTotal),
                Some(total) if total.eq_ignore_ascii_case("_total") => Ok(Metric::CpuTotal),
                Some(index) => index
                    .parse::<usize>()
                    .map(Metric::CpuCore)
                    .map_err(|_| SampleError::Unavailable(format!("processor '{}'", index))),
            },
            _ => Err(unknown()),
        },
        "memory" => match counter.as_str() {
            "available bytes" => Ok(Metric::AvailableBytes),
            "available mbytes" => Ok(Metric::AvailableMBytes),
            "committed bytes" => Ok(Metric::CommittedBytes),
            "free bytes" => Ok(Metric::FreeBytes),
            _ => Err(unknown()),
        },
        "process" => match counter.as_str() {
            "working set" => Ok(Metric::WorkingSet(required()?)),
            "virtual bytes" => Ok(Metric::VirtualBytes(required()?)),
            "% processor time" => Ok(Metric::ProcessCpu(required()?)),
            "io read bytes/sec" => Ok(Metric::ProcessIoRead(required()?)),
            "io write bytes/sec" => Ok(Metric::ProcessIoWrite(required()?)),
            _ => Err(unknown()),
        },
        "network interface" => match counter.as_str() {
            "bytes received/sec" => Ok(Metric::NetReceived(required()?)),
            "bytes sent/sec" => Ok(Metric::NetSent(required()?)),
            "bytes total/sec" => Ok(Metric::NetTotal(required()?)),
            _ => Err(unknown()),
        },
        "logicaldisk" => match counter.as_str() {
            "free megabytes" => Ok(Metric::DiskFreeMegabytes(required()?)),
            "% free space" => Ok(Metric::DiskFreePercent(required()?)),
            _ => Err(unknown()),
        },
        "system" => match counter.as_str() {
            "processes" => Ok(Metric::ProcessCount),
            "system up time" => Ok(Metric::Uptime),
            _ => Err(unknown()),
        },
        _ => Err(SampleError::UnknownCategory(identity.category.clone())),
    }
}

/// Per-second rate between two cumulative readings. A counter that went
/// backwards (reset, interface re-created) reads as zero.
fn rate_between(previous: u64, current: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    current.saturating_sub(previous) as f64 / elapsed_secs
}

struct SysinfoHandle {
    probe: Arc<Mutex<Probe>>,
    metric: Metric,
    previous: Option<(u64, Instant)>,
}

impl SysinfoHandle {
    fn read(&self) -> Result<Reading, SampleError> {
        let mut probe = self.probe.lock().unwrap_or_else(|e| e.into_inner());
        probe.read(&self.metric)
    }
}

impl CounterHandle for SysinfoHandle {
    fn raw_value(&mut self) -> Result<i64, SampleError> {
        match self.read()? {
            Reading::Gauge(value) => Ok(value.round() as i64),
            Reading::Cumulative(total) => Ok(i64::try_from(total).unwrap_or(i64::MAX)),
        }
    }

    fn next_value(&mut self) -> Result<f64, SampleError> {
        match self.read()? {
            Reading::Gauge(value) => Ok(value),
            Reading::Cumulative(total) => {
                let now = Instant::now();
                let rate = match self.previous {
                    Some((previous, at)) => {
                        rate_between(previous, total, now.duration_since(at).as_secs_f64())
                    }
                    None => 0.0,
                };
                self.previous = Some((total, now));
                Ok(rate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(
        host: &str,
        category: &str,
        counter: &str,
        instance: Option<&str>,
    ) -> CounterIdentity {
        CounterIdentity::new(
            host.to_string(),
            category.to_string(),
            counter.to_string(),
            instance.map(str::to_string),
        )
    }

    #[test]
    fn test_resolve_catalog() {
        assert_eq!(
            resolve(&identity(".", "Processor", "% Processor Time", Some("_Total"))).unwrap(),
            Metric::CpuTotal
        );
        assert_eq!(
            resolve(&identity(".", "Processor", "% Processor Time", Some("2"))).unwrap(),
            Metric::CpuCore(2)
        );
        assert_eq!(
            resolve(&identity(".", "memory", "available mbytes", None)).unwrap(),
            Metric::AvailableMBytes
        );
        assert_eq!(
            resolve(&identity(".", "Process", "Working Set", Some("postgres"))).unwrap(),
            Metric::WorkingSet("postgres".to_string())
        );
        assert_eq!(
            resolve(&identity(".", "Network Interface", "Bytes Total/sec", Some("eth0"))).unwrap(),
            Metric::NetTotal("eth0".to_string())
        );
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(
            resolve(&identity(".", "Process", "Working Set", None)),
            Err(SampleError::MissingInstance(_))
        ));
        assert!(matches!(
            resolve(&identity(".", "Memory", "Pages/sec", None)),
            Err(SampleError::UnknownCounter { .. })
        ));
        assert!(matches!(
            resolve(&identity(".", "MSSQL$Buffer", "Page life", None)),
            Err(SampleError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_rate_between() {
        assert_eq!(rate_between(1_000, 3_000, 2.0), 1_000.0);
        assert_eq!(rate_between(5_000, 1_000, 1.0), 0.0);
        assert_eq!(rate_between(0, 100, 0.0), 0.0);
    }

    #[test]
    fn test_remote_host_rejected() {
        let mut source = SysinfoSource::new();
        let err = source
            .open(&identity("no-such-host-xyz", "Memory", "Available Bytes", None))
            .err()
            .unwrap();
        assert!(matches!(err, SampleError::RemoteHost(_)));
    }

    #[test]
    fn test_missing_process_is_unavailable() {
        let mut source = SysinfoSource::new();
        let mut handle = source
            .open(&identity(".", "Process", "Working Set", Some("no-such-process-xyz")))
            .unwrap();
        let err = handle.raw_value().unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_local_memory_and_first_rate() {
        let mut source = SysinfoSource::new();
        let mut memory = source
            .open(&identity("localhost", "Memory", "Available Bytes", None))
            .unwrap();
        assert!(memory.raw_value().unwrap() > 0);

        let mut processes = source.open(&identity(".", "System", "Processes", None)).unwrap();
        assert!(processes.next_value().unwrap() > 0.0);
    }
}
