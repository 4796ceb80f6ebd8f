//! The partitioned sampling worker pool.
//!
//! N workers each own a disjoint slice of the live containers: the
//! assignment list, the per-container limits and paths, the sample buffers,
//! and the CPU-delta state all live in that worker's slot. Membership
//! changes (admit/evict) go through the pool-level assignment lock and
//! always flush every buffer first, so no batch ever spans a membership
//! change. Workers sample on a condition-variable paced loop and fan each
//! full batch out to the summary queue (when the UI is enabled) and the
//! durable store, in that order, exactly once per batch.
//!
//! Lock order is assignment lock before slot lock. Workers take only their
//! own slot lock while sampling; the assignment lock is reserved for
//! membership changes, flushes, and the paced wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::channel::{SummaryMessage, SummarySink};
use crate::container::{ContainerLimits, ContainerRecord};
use crate::error::ResultOkLogExt;
use crate::runtime::{PathFactory, ResourcePaths};
use crate::sampler::{self, PrevCpu, Sample};
use crate::store::MetricsStore;

/// Wait between passes when a worker has no assignment.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Pool sizing and pacing, taken from the monitor configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Maximum containers one worker may own.
    pub worker_capacity: usize,
    /// Samples buffered per container before a flush.
    pub batch_size: usize,
    /// Pacing interval per assigned container.
    pub sample_interval: Duration,
    /// Whether batch summaries are published to the dashboard queue.
    pub ui_enabled: bool,
}

/// State owned by one worker: its slice of the partition.
#[derive(Default)]
struct WorkerSlot {
    assigned: Vec<String>,
    limits: HashMap<String, ContainerLimits>,
    paths: HashMap<String, ResourcePaths>,
    buffers: HashMap<String, Vec<Sample>>,
    prev_cpu: HashMap<String, PrevCpu>,
}

/// The worker pool. See the module docs for the ownership model.
pub struct WorkerPool {
    cfg: PoolConfig,
    store: Arc<dyn MetricsStore>,
    paths: Box<dyn PathFactory>,
    summary: Option<Arc<dyn SummarySink>>,
    slots: Vec<Arc<Mutex<WorkerSlot>>>,
    /// Maps each admitted name to its owning worker. This is the pool lock:
    /// held for admit, evict, flush and the paced condvar wait, never while
    /// sampling.
    assign: Mutex<HashMap<String, usize>>,
    wakeup: Condvar,
    shutdown: Arc<AtomicBool>,
    running: AtomicBool,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        cfg: PoolConfig,
        store: Arc<dyn MetricsStore>,
        paths: Box<dyn PathFactory>,
        summary: Option<Arc<dyn SummarySink>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let slots = (0..cfg.worker_count)
            .map(|_| Arc::new(Mutex::new(WorkerSlot::default())))
            .collect();
        Self {
            cfg,
            store,
            paths,
            summary,
            slots,
            assign: Mutex::new(HashMap::new()),
            wakeup: Condvar::new(),
            shutdown,
            running: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the worker threads, each starting with an empty assignment.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut handles = self.handles.lock();
        for index in 0..self.cfg.worker_count {
            let pool = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("cgwatch-worker-{index}"))
                .spawn(move || pool.worker_loop(index))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
    }

    /// Stops the pool: signals the workers, joins them, then flushes every
    /// remaining buffer to the store. Idempotent; a second call finds
    /// nothing left to join or flush.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // take the pool lock so no worker is between its running check and
        // the condvar wait when the wakeup fires
        drop(self.assign.lock());
        self.wakeup.notify_all();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                log::error!("sampling worker panicked during shutdown");
            }
        }
        self.flush_all();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst)
    }

    /// Admits a container: binds it to the least-loaded worker and installs
    /// its limits and cgroup paths there.
    ///
    /// Admission is skipped (with a warning) when the limits table has no
    /// record for the name yet or every worker is at capacity. All buffers
    /// are flushed first so no open batch spans the membership change.
    pub fn admit(&self, name: &str) {
        let Some(ContainerRecord { id, limits }) = self.store.get_container(name) else {
            log::warn!("cannot admit `{name}`: limits not yet known");
            return;
        };
        let paths = self.paths.resource_paths(&id);

        let mut assign = self.assign.lock();
        if assign.contains_key(name) {
            log::debug!("container `{name}` already assigned");
            return;
        }
        self.flush_all_locked();

        let mut target = None;
        let mut min_load = self.cfg.worker_capacity;
        for (index, slot) in self.slots.iter().enumerate() {
            let load = slot.lock().assigned.len();
            if load < min_load {
                min_load = load;
                target = Some(index);
            }
        }
        let Some(index) = target else {
            log::warn!("no worker has capacity left, cannot admit container `{name}`");
            return;
        };

        {
            let mut slot = self.slots[index].lock();
            slot.assigned.push(name.to_owned());
            slot.limits.insert(name.to_owned(), limits);
            slot.paths.insert(name.to_owned(), paths);
        }
        assign.insert(name.to_owned(), index);
        drop(assign);

        log::info!("assigned container `{name}` to worker {index}");
        self.wakeup.notify_all();
    }

    /// Evicts a container: flushes all buffers, then removes the name from
    /// its worker's assignment, limits, paths, buffers, and CPU state.
    pub fn evict(&self, name: &str) {
        let mut assign = self.assign.lock();
        let Some(index) = assign.get(name).copied() else {
            return;
        };
        self.flush_all_locked();

        {
            let mut slot = self.slots[index].lock();
            slot.assigned.retain(|n| n != name);
            slot.limits.remove(name);
            slot.paths.remove(name);
            slot.buffers.remove(name);
            slot.prev_cpu.remove(name);
        }
        assign.remove(name);
        drop(assign);

        log::info!("removed container `{name}` from worker {index}");
        self.wakeup.notify_all();
    }

    /// Drains every worker's buffers into the store. Partial batches carry
    /// no summary message.
    pub fn flush_all(&self) {
        let _assign = self.assign.lock();
        self.flush_all_locked();
    }

    /// Snapshot of each worker's assignment list, indexed by worker.
    pub fn assignments(&self) -> Vec<Vec<String>> {
        let _assign = self.assign.lock();
        self.slots
            .iter()
            .map(|slot| slot.lock().assigned.clone())
            .collect()
    }

    fn flush_all_locked(&self) {
        for slot in &self.slots {
            let drained: Vec<(String, Vec<Sample>)> = {
                let mut slot = slot.lock();
                slot.buffers
                    .iter_mut()
                    .filter(|(_, buf)| !buf.is_empty())
                    .map(|(name, buf)| (name.clone(), std::mem::take(buf)))
                    .collect()
            };
            for (name, samples) in drained {
                self.store.insert_batch(&name, &samples).ok_log();
            }
        }
    }

    fn worker_loop(self: Arc<Self>, index: usize) {
        let slot = Arc::clone(&self.slots[index]);
        while self.is_running() {
            let names: Vec<String> = slot.lock().assigned.clone();

            if names.is_empty() {
                let mut guard = self.assign.lock();
                if !self.is_running() {
                    break;
                }
                self.wakeup.wait_for(&mut guard, IDLE_WAIT);
                continue;
            }

            for name in &names {
                if !self.is_running() {
                    break;
                }
                self.sample_one(&slot, name);
            }

            let mut guard = self.assign.lock();
            if !self.is_running() {
                break;
            }
            let timeout = self
                .cfg
                .sample_interval
                .saturating_mul(names.len() as u32);
            self.wakeup.wait_for(&mut guard, timeout);
        }
    }

    /// Samples one container and flushes its buffer if the batch is full.
    ///
    /// The slot lock is not held across the blocking cgroup reads: paths,
    /// limits, and the previous CPU state are copied out first (only this
    /// worker mutates that state), and the result is stored afterwards.
    fn sample_one(&self, slot: &Mutex<WorkerSlot>, name: &str) {
        let now_ms = sampler::now_ms();
        let (paths, limits, prev) = {
            let slot = slot.lock();
            match (slot.paths.get(name), slot.limits.get(name)) {
                (Some(paths), Some(limits)) => {
                    (paths.clone(), *limits, slot.prev_cpu.get(name).copied())
                }
                // evicted between snapshot and sampling
                _ => return,
            }
        };

        let (sample, next) = sampler::sample_container(&paths, &limits, prev.as_ref(), now_ms);

        let full_batch = {
            let mut slot = slot.lock();
            if !slot.paths.contains_key(name) {
                // evicted while reading; its buffers are already flushed
                return;
            }
            slot.prev_cpu.insert(name.to_owned(), next);
            let buffer = slot.buffers.entry(name.to_owned()).or_default();
            buffer.push(sample);
            if buffer.len() >= self.cfg.batch_size {
                Some(std::mem::take(buffer))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            self.publish_batch(name, &batch);
        }
    }

    /// Fans one full batch out: summary message first (when enabled), then
    /// the durable insert, then the buffer is already clear.
    fn publish_batch(&self, name: &str, batch: &[Sample]) {
        if self.cfg.ui_enabled {
            if let Some(sink) = &self.summary {
                let (mut max_cpu, mut max_mem, mut max_pid) = (0.0f64, 0.0f64, 0.0f64);
                for sample in batch {
                    max_cpu = max_cpu.max(sample.cpu_pct);
                    max_mem = max_mem.max(sample.mem_pct);
                    max_pid = max_pid.max(sample.pid_pct);
                }
                sink.send(&SummaryMessage::new(name, max_cpu, max_mem, max_pid));
            }
        }
        self.store.insert_batch(name, batch).ok_log();
    }

    #[cfg(test)]
    fn buffered_len(&self, name: &str) -> usize {
        let assign = self.assign.lock();
        let Some(index) = assign.get(name) else {
            return 0;
        };
        self.slots[*index]
            .lock()
            .buffers
            .get(name)
            .map_or(0, Vec::len)
    }
}
