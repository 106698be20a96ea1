//! Host probes behind the resource monitor.
//!
//! A probe call is blocking; the monitor runs it on the blocking pool.

use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB_PER_GB: f64 = 1024.0;

/// Aggregate GPU reading in GB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuReading {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub usage_percent: f64,
}

/// One raw sample from a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeReading {
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
    pub cpu_usage_percent: f64,
    /// One-minute load average (zero where the platform has none)
    pub load_average: f64,
    pub gpu: Option<GpuReading>,
}

pub trait SystemProbe: Send + Sync {
    fn sample(&self) -> ProbeReading;
}

/// Production probe: `sysinfo` for memory and CPU, `nvidia-smi` for GPU.
pub struct SysinfoProbe {
    system: Mutex<System>,
    enable_gpu: bool,
}

impl SysinfoProbe {
    pub fn new(enable_gpu: bool) -> Self {
        Self {
            system: Mutex::new(System::new()),
            enable_gpu,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SystemProbe for SysinfoProbe {
    fn sample(&self) -> ProbeReading {
        let (total, available, cpu) = {
            let mut sys = self.system.lock();
            sys.refresh_memory();
            sys.refresh_cpu_usage();
            (
                sys.total_memory(),
                sys.available_memory(),
                sys.global_cpu_usage(),
            )
        };

        let gpu = if self.enable_gpu { query_nvidia_smi() } else { None };

        ProbeReading {
            memory_total_gb: total as f64 / BYTES_PER_GB,
            memory_free_gb: available as f64 / BYTES_PER_GB,
            cpu_usage_percent: f64::from(cpu),
            load_average: System::load_average().one,
            gpu,
        }
    }
}

/// Query every NVIDIA device and aggregate memory; `None` when the tool is
/// missing or reports nothing.
fn query_nvidia_smi() -> Option<GpuReading> {
    let output = std::process::Command::new("nvidia-smi")
        .arg("--query-gpu=memory.total,memory.used,memory.free,utilization.gpu")
        .arg("--format=csv,noheader,nounits")
        .output()
        .ok()?;

    if !output.status.success() {
        debug!(status = ?output.status, "nvidia-smi exited unsuccessfully");
        return None;
    }
    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `total, used, free, util` lines (MiB and percent).
pub(crate) fn parse_nvidia_smi(text: &str) -> Option<GpuReading> {
    let mut reading = GpuReading::default();
    let mut devices = 0usize;
    let mut utilization = 0.0;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<f64> = line
            .split(',')
            .map(|f| f.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        let [total, used, free, util] = fields[..] else {
            return None;
        };
        reading.total_gb += total / MIB_PER_GB;
        reading.used_gb += used / MIB_PER_GB;
        reading.free_gb += free / MIB_PER_GB;
        utilization += util;
        devices += 1;
    }

    if devices == 0 {
        return None;
    }
    reading.usage_percent = utilization / devices as f64;
    Some(reading)
}

/// Probe returning a settable reading.
#[derive(Default)]
pub struct StaticProbe {
    reading: Mutex<ProbeReading>,
}

impl StaticProbe {
    pub fn new(reading: ProbeReading) -> Self {
        Self {
            reading: Mutex::new(reading),
        }
    }

    /// RAM-only host with `free_gb` of `total_gb` available.
    pub fn with_memory(total_gb: f64, free_gb: f64) -> Self {
        Self::new(ProbeReading {
            memory_total_gb: total_gb,
            memory_free_gb: free_gb,
            ..ProbeReading::default()
        })
    }

    pub fn set(&self, reading: ProbeReading) {
        *self.reading.lock() = reading;
    }

    pub fn update(&self, f: impl FnOnce(&mut ProbeReading)) {
        f(&mut self.reading.lock());
    }
}

impl SystemProbe for StaticProbe {
    fn sample(&self) -> ProbeReading {
        *self.reading.lock()
    }
}
