//! Memory pressure signalling and system memory sampling.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::System;

/// How long a memory sample stays valid
pub const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// The decode budget is available memory divided by this
pub const MEMORY_BUDGET_DIVISOR: u64 = 4;

/// Anything that must shrink when the host runs low on memory
pub trait MemoryPressureListener: Send + Sync {
    fn on_memory_pressure(&self);
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Weak<dyn MemoryPressureListener>)>>,
}

/// Fan-out of memory pressure signals to every subscribed listener.
///
/// Cloning gives another handle to the same registry. Listeners are held weakly,
/// so subscribing never keeps a cache alive.
#[derive(Clone, Default)]
pub struct MemoryPressureMonitor {
    registry: Arc<Registry>,
}

impl MemoryPressureMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide monitor used when no other monitor is configured
    pub fn shared() -> &'static MemoryPressureMonitor {
        static SHARED: OnceLock<MemoryPressureMonitor> = OnceLock::new();
        SHARED.get_or_init(MemoryPressureMonitor::new)
    }

    /// Subscribe `listener` until the returned subscription is dropped.
    pub fn subscribe<L>(&self, listener: &Arc<L>) -> MemorySubscription
    where
        L: MemoryPressureListener + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn MemoryPressureListener> = weak;
        self.registry.listeners.lock().push((id, weak));

        MemorySubscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Tell every live listener to shrink. Returns how many were notified.
    pub fn signal(&self) -> usize {
        let live: Vec<Arc<dyn MemoryPressureListener>> = {
            let mut listeners = self.registry.listeners.lock();
            listeners.retain(|(_, weak)| weak.strong_count() > 0);
            listeners.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };

        log::debug!("Memory pressure signalled to {} listener(s)", live.len());
        for listener in &live {
            listener.on_memory_pressure();
        }
        live.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for MemoryPressureMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPressureMonitor")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Removes its listener from the monitor when dropped
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct MemorySubscription {
    registry: Weak<Registry>,
    id: u64,
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Cached sampler of available system memory
pub struct MemoryProbe {
    system: System,
    last_sample: Option<(Instant, u64)>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            last_sample: None,
        }
    }

    /// Available memory in bytes, re-sampled at most every [`PROBE_INTERVAL`]
    pub fn available_memory(&mut self) -> u64 {
        if let Some((at, available)) = self.last_sample {
            if at.elapsed() < PROBE_INTERVAL {
                return available;
            }
        }

        self.system.refresh_memory();
        let available = self.system.available_memory();
        self.last_sample = Some((Instant::now(), available));
        available
    }

    /// Bytes the decode window may use.
    ///
    /// Platforms where sysinfo cannot read memory report 0; that is treated as
    /// unknown and does not limit the window.
    pub fn budget(&mut self) -> u64 {
        match self.available_memory() {
            0 => u64::MAX,
            available => available / MEMORY_BUDGET_DIVISOR,
        }
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls system memory and signals a monitor when available memory drops below
/// a fraction of total memory. Signals once per low-memory episode. Stops when
/// dropped.
pub struct SystemMemoryWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SystemMemoryWatcher {
    pub fn spawn(monitor: MemoryPressureMonitor, low_fraction: f64, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("memory-watcher".to_string())
            .spawn(move || {
                let mut system = System::new();
                let mut low = false;
                while !stop_flag.load(Ordering::Acquire) {
                    system.refresh_memory();
                    let total = system.total_memory();
                    let available = system.available_memory();
                    let is_low = total > 0 && (available as f64) < total as f64 * low_fraction;

                    if is_low && !low {
                        log::info!(
                            "Low memory: {} MB available of {} MB",
                            available / 1024 / 1024,
                            total / 1024 / 1024
                        );
                        monitor.signal();
                    }
                    low = is_low;
                    thread::park_timeout(interval);
                }
                log::debug!("Memory watcher stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for SystemMemoryWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}
