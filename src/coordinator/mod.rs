//! The lifecycle coordinator: the single thread that owns the authoritative
//! live-set.
//!
//! Each loop iteration samples the host, pops at most one runtime event
//! (with the refresh interval as timeout), applies it to the limits table,
//! and then reconciles the pool's membership against a memoized snapshot of
//! that table. Folding the reconciler into the event loop keeps one thread
//! as the only caller of `admit`/`evict`, which makes the ordering guarantee
//! — a create is observed before the first sample, a destroy drains before
//! any re-create — fall out of program order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::container::{ContainerLimits, ContainerRecord};
use crate::error::ResultOkLogExt;
use crate::pool::WorkerPool;
use crate::runtime::event::{ContainerEvent, EventAction};
use crate::runtime::events::EventQueue;
use crate::runtime::inspect::{InspectedLimits, LimitsResolver};
use crate::sampler::host::HostSampler;
use crate::sampler::{self, HostSample};
use crate::store::MetricsStore;

pub struct LifecycleCoordinator {
    store: Arc<dyn MetricsStore>,
    pool: Arc<WorkerPool>,
    events: Arc<EventQueue>,
    resolver: Box<dyn LimitsResolver>,
    host: HostSampler,
    refresh: Duration,
    shutdown: Arc<AtomicBool>,
    known: BTreeSet<String>,
}

impl LifecycleCoordinator {
    pub fn new(
        store: Arc<dyn MetricsStore>,
        pool: Arc<WorkerPool>,
        events: Arc<EventQueue>,
        resolver: Box<dyn LimitsResolver>,
        host: HostSampler,
        refresh: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            pool,
            events,
            resolver,
            host,
            refresh,
            shutdown,
            known: BTreeSet::new(),
        }
    }

    /// Runs the event loop until the shutdown flag is raised.
    pub fn run(&mut self) {
        log::info!("lifecycle coordinator running");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.tick();
        }
        log::info!("lifecycle coordinator stopped");
    }

    /// One loop iteration: host sample, at most one event, one reconcile.
    pub fn tick(&mut self) {
        let sample = self.sample_host();
        self.store.insert_host_sample(&sample).ok_log();

        if let Some(line) = self.events.pop_timeout(self.refresh) {
            self.handle_line(&line);
        }

        self.reconcile();
    }

    fn sample_host(&mut self) -> HostSample {
        let timestamp_ms = sampler::now_ms();
        let (cpu_pct, mem_pct) = self.host.sample();
        HostSample {
            timestamp_ms,
            cpu_pct,
            mem_pct,
        }
    }

    fn handle_line(&mut self, line: &str) {
        match ContainerEvent::parse(line) {
            Ok(Some(event)) => self.apply_event(&event),
            Ok(None) => {}
            Err(err) => log::warn!("dropping unparseable runtime event: {err}"),
        }
    }

    fn apply_event(&mut self, event: &ContainerEvent) {
        match event.action {
            EventAction::Create => {
                let limits = self.resolve_limits(event);
                log::info!(
                    "container `{}` created (cpus={}, memory={} MB, pids={})",
                    event.name,
                    limits.cpu_limit_cores,
                    limits.memory_limit_mb,
                    limits.pid_limit
                );
                self.store
                    .upsert_container(
                        &event.name,
                        &ContainerRecord {
                            id: event.id,
                            limits,
                        },
                    )
                    .ok_log();
            }
            EventAction::Destroy => {
                log::info!("container `{}` destroyed", event.name);
                self.store.delete_container(&event.name).ok_log();
            }
        }
    }

    /// Limits come from the event attributes when present; anything missing
    /// is filled from one inspect call. Fields that stay unresolved are
    /// recorded as zero, and the container samples as 0% until a later
    /// create supplies real values.
    fn resolve_limits(&self, event: &ContainerEvent) -> ContainerLimits {
        let attrs = event.attribute_limits();
        let inspected = if attrs.is_complete() {
            InspectedLimits::default()
        } else {
            self.resolver.resolve(&event.id).unwrap_or_default()
        };

        ContainerLimits {
            cpu_limit_cores: attrs
                .cpu_limit_cores
                .or(inspected.cpu_limit_cores)
                .unwrap_or(0.0),
            memory_limit_mb: attrs
                .memory_limit_mb
                .or(inspected.memory_limit_mb)
                .unwrap_or(0),
            pid_limit: attrs.pid_limit.or(inspected.pid_limit).unwrap_or(0),
        }
    }

    /// Diffs the limits-table snapshot against the memoized previous one
    /// and adjusts the pool membership accordingly.
    fn reconcile(&mut self) {
        let current: BTreeSet<String> = self.store.list().into_keys().collect();
        for name in current.difference(&self.known) {
            log::debug!("reconcile: new container `{name}`");
            self.pool.admit(name);
        }
        for name in self.known.difference(&current) {
            log::debug!("reconcile: removed container `{name}`");
            self.pool.evict(name);
        }
        self.known = current;
    }
}
