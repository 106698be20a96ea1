//! Resource monitor.
//!
//! Samples host memory, CPU and (best-effort) GPU on its own task and keeps
//! the latest [`ResourceSnapshot`]. Request paths only read that snapshot.
//! Threshold crossings are published on a broadcast channel when a
//! resource changes level, including recovery.

mod probe;

pub use probe::{GpuReading, ProbeReading, StaticProbe, SysinfoProbe, SystemProbe};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use maestro_kernel::AvailableMemory;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ResourceConfig, ThresholdConfig};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total_gb: f64,
    pub free_gb: f64,
    pub used_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    pub usage_percent: f64,
    pub load_average: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub available: bool,
    pub total_gb: f64,
    pub free_gb: f64,
    pub used_gb: f64,
    pub usage_percent: f64,
}

/// Latest host readings. Replaced wholesale on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub memory: MemoryReading,
    pub cpu: CpuReading,
    pub gpu: GpuSnapshot,
}

impl Default for ResourceSnapshot {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            memory: MemoryReading::default(),
            cpu: CpuReading::default(),
            gpu: GpuSnapshot::default(),
        }
    }
}

impl ResourceSnapshot {
    fn from_reading(reading: ProbeReading, gpu_enabled: bool) -> Self {
        let total = reading.memory_total_gb.max(0.0);
        let free = reading.memory_free_gb.clamp(0.0, total);
        let used = total - free;
        let memory = MemoryReading {
            total_gb: total,
            free_gb: free,
            used_gb: used,
            usage_percent: if total > 0.0 { used / total * 100.0 } else { 0.0 },
        };

        let gpu = match reading.gpu.filter(|_| gpu_enabled) {
            Some(g) => GpuSnapshot {
                available: true,
                total_gb: g.total_gb,
                free_gb: g.free_gb,
                used_gb: g.used_gb,
                usage_percent: g.usage_percent,
            },
            None => GpuSnapshot::default(),
        };

        Self {
            timestamp: Utc::now(),
            memory,
            cpu: CpuReading {
                usage_percent: reading.cpu_usage_percent,
                load_average: reading.load_average,
            },
            gpu,
        }
    }

    pub fn available_memory(&self) -> AvailableMemory {
        AvailableMemory::new(self.memory.free_gb, self.gpu.free_gb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Memory,
    Cpu,
    Gpu,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl ResourceLevel {
    fn classify(usage_percent: f64, thresholds: &ThresholdConfig) -> Self {
        if usage_percent >= thresholds.critical {
            Self::Critical
        } else if usage_percent >= thresholds.warning {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

/// A resource moved from one level to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub resource: ResourceKind,
    pub previous: ResourceLevel,
    pub level: ResourceLevel,
    pub usage_percent: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Levels {
    memory: ResourceLevel,
    cpu: ResourceLevel,
    gpu: ResourceLevel,
}

impl Levels {
    fn slot(&mut self, kind: ResourceKind) -> &mut ResourceLevel {
        match kind {
            ResourceKind::Memory => &mut self.memory,
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Gpu => &mut self.gpu,
        }
    }
}

struct MonitorInner {
    config: ResourceConfig,
    probe: Arc<dyn SystemProbe>,
    latest: RwLock<ResourceSnapshot>,
    levels: Mutex<Levels>,
    events: broadcast::Sender<ThresholdEvent>,
    is_running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Periodic host sampler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ResourceMonitor {
    inner: Arc<MonitorInner>,
}

impl ResourceMonitor {
    /// Monitor backed by [`SysinfoProbe`].
    pub fn new(config: ResourceConfig) -> Self {
        let probe = Arc::new(SysinfoProbe::new(config.enable_gpu));
        Self::with_probe(config, probe)
    }

    pub fn with_probe(config: ResourceConfig, probe: Arc<dyn SystemProbe>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                config,
                probe,
                latest: RwLock::new(ResourceSnapshot::default()),
                levels: Mutex::new(Levels::default()),
                events,
                is_running: AtomicBool::new(false),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    /// Take one sample, then keep sampling on the configured interval.
    ///
    /// Returns `false` if already running.
    pub async fn start(&self) -> bool {
        if self
            .inner
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Resource monitor is already running");
            return false;
        }

        self.sample_now().await;

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(monitor) = Self::upgrade(&weak) else {
                    break;
                };
                if !monitor.is_running() {
                    break;
                }
                monitor.sample_now().await;
            }
            debug!("Resource monitor loop exited");
        });
        *self.inner.handle.lock() = Some(handle);

        info!(
            interval_ms = self.inner.config.interval_ms,
            gpu = self.inner.config.enable_gpu,
            "Resource monitor started"
        );
        true
    }

    /// Stop sampling. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        if !self.inner.is_running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(handle) = self.inner.handle.lock().take() {
            handle.abort();
        }
        info!("Resource monitor stopped");
        true
    }

    fn upgrade(weak: &Weak<MonitorInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Sample immediately and replace the latest snapshot.
    pub async fn sample_now(&self) -> ResourceSnapshot {
        let probe = self.inner.probe.clone();
        let reading = match tokio::task::spawn_blocking(move || probe.sample()).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "Resource probe panicked, keeping previous snapshot");
                return self.get_current_readings();
            }
        };

        let snapshot = ResourceSnapshot::from_reading(reading, self.inner.config.enable_gpu);
        *self.inner.latest.write() = snapshot.clone();
        self.evaluate_thresholds(&snapshot);
        snapshot
    }

    pub fn get_current_readings(&self) -> ResourceSnapshot {
        self.inner.latest.read().clone()
    }

    pub fn get_available_memory(&self) -> AvailableMemory {
        self.inner.latest.read().available_memory()
    }

    /// Receive level changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ThresholdEvent> {
        self.inner.events.subscribe()
    }

    fn evaluate_thresholds(&self, snapshot: &ResourceSnapshot) {
        let config = &self.inner.config;
        let mut checks = vec![
            (ResourceKind::Memory, snapshot.memory.usage_percent, &config.memory),
            (ResourceKind::Cpu, snapshot.cpu.usage_percent, &config.cpu),
        ];
        if snapshot.gpu.available {
            checks.push((ResourceKind::Gpu, snapshot.gpu.usage_percent, &config.gpu));
        }

        let mut levels = self.inner.levels.lock();
        for (kind, usage, thresholds) in checks {
            let level = ResourceLevel::classify(usage, thresholds);
            let slot = levels.slot(kind);
            if *slot == level {
                continue;
            }
            let previous = std::mem::replace(slot, level);

            match level {
                ResourceLevel::Critical => warn!(resource = %kind, usage, "Resource usage critical"),
                ResourceLevel::Warning => warn!(resource = %kind, usage, "Resource usage high"),
                ResourceLevel::Normal => info!(resource = %kind, usage, "Resource usage back to normal"),
            }

            // no receivers is fine
            let _ = self.inner.events.send(ThresholdEvent {
                resource: kind,
                previous,
                level,
                usage_percent: usage,
                timestamp: snapshot.timestamp,
            });
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
