// src/scheduler/mod.rs
//! Scheduler: a wall-clock tick loop that dispatches one crawl unit per due
//! source, never more than one in flight per source.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cancel::{self, Cancel, CancelHandle};
use crate::config::SchedulerConfig;
use crate::crawl::Crawler;
use crate::error::ControlError;
use crate::registry::{
    NewSource, Source, SourceEntry, SourceId, SourceRegistry, SourceUpdate, StartOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub in_flight: usize,
    pub sources: usize,
}

#[derive(Default)]
struct LoopState {
    running: bool,
    shutdown: Option<CancelHandle>,
    task: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    registry: Arc<SourceRegistry>,
    crawler: Arc<Crawler>,
    cfg: SchedulerConfig,
    state: Mutex<LoopState>,
}

impl Scheduler {
    pub fn new(registry: Arc<SourceRegistry>, crawler: Arc<Crawler>, cfg: SchedulerConfig) -> Self {
        Self {
            registry,
            crawler,
            cfg,
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Returns `false` if the loop was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut st = self.state.lock().expect("scheduler state poisoned");
        if st.running {
            tracing::info!(target: "scheduler", "start requested but already running");
            return false;
        }
        let (handle, shutdown) = cancel::pair();
        let me = Arc::clone(self);
        st.task = Some(tokio::spawn(async move { me.tick_loop(shutdown).await }));
        st.shutdown = Some(handle);
        st.running = true;
        tracing::info!(target: "scheduler", tick_secs = self.cfg.tick_secs, "scheduler started");
        true
    }

    async fn tick_loop(self: Arc<Self>, mut shutdown: Cancel) {
        let mut ticker = tokio::time::interval(self.cfg.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            counter!("scheduler_ticks_total").increment(1);
            let dispatched = self.dispatch_due(Utc::now());
            tracing::debug!(target: "scheduler", dispatched, in_flight = self.registry.in_flight(), "tick");
        }
        tracing::debug!(target: "scheduler", "tick loop exited");
    }

    /// Start a unit for every enabled source that is due at `now`. Sources
    /// whose previous unit is still running are skipped, not queued.
    pub fn dispatch_due(&self, now: DateTime<Utc>) -> usize {
        let mut dispatched = 0;
        for entry in self.registry.entries() {
            if !entry.snapshot().is_due(now) {
                continue;
            }
            match self.spawn_unit(&entry) {
                StartOutcome::Started => {
                    dispatched += 1;
                    counter!("scheduler_dispatched_total").increment(1);
                }
                StartOutcome::InFlight => {
                    counter!("scheduler_skipped_in_flight_total").increment(1);
                    tracing::debug!(target: "scheduler", source_id = entry.id(), "previous crawl still running");
                }
                StartOutcome::Retired => {}
            }
        }
        gauge!("scheduler_in_flight").set(self.registry.in_flight() as f64);
        dispatched
    }

    fn spawn_unit(&self, entry: &Arc<SourceEntry>) -> StartOutcome {
        let crawler = Arc::clone(&self.crawler);
        let unit_entry = Arc::clone(entry);
        entry.try_start(move |cancel, guard| {
            tokio::spawn(async move {
                let _guard = guard;
                crawler.run(&unit_entry, cancel).await;
            })
        })
    }

    /// Stop the tick loop, cancel every in-flight unit and wait for them up to
    /// the grace period; stragglers are aborted. Returns whether the loop was running.
    pub async fn stop(&self) -> bool {
        let (handle, task) = {
            let mut st = self.state.lock().expect("scheduler state poisoned");
            st.running = false;
            (st.shutdown.take(), st.task.take())
        };
        let was_running = handle.is_some();
        if let Some(h) = handle {
            h.cancel();
        }
        if let Some(t) = task {
            if let Err(e) = t.await {
                tracing::warn!(target: "scheduler", error = %e, "tick loop ended abnormally");
            }
        }

        let deadline = Instant::now() + self.cfg.stop_grace();
        let waits: Vec<_> = self
            .registry
            .entries()
            .iter()
            .filter_map(|e| e.cancel_unit())
            .collect();
        let pending = waits.len();
        let mut aborted = 0;
        for w in waits {
            let source_id = w.source_id();
            if !w.finish_by(deadline).await {
                aborted += 1;
                tracing::warn!(target: "scheduler", source_id, "crawl unit aborted after grace period");
            }
        }
        gauge!("scheduler_in_flight").set(self.registry.in_flight() as f64);
        tracing::info!(target: "scheduler", was_running, pending, aborted, "scheduler stopped");
        was_running
    }

    /// Running flag, in-flight units and source count, read under the state lock.
    pub fn status(&self) -> SchedulerStatus {
        let st = self.state.lock().expect("scheduler state poisoned");
        SchedulerStatus {
            running: st.running,
            in_flight: self.registry.in_flight(),
            sources: self.registry.len(),
        }
    }

    pub fn register(&self, new: NewSource) -> Result<Source, ControlError> {
        self.registry.register(new)
    }

    pub fn update(&self, id: SourceId, upd: SourceUpdate) -> Result<Source, ControlError> {
        self.registry.update(id, upd)
    }

    pub fn toggle(&self, id: SourceId) -> Result<Source, ControlError> {
        self.registry.toggle(id)
    }

    /// Crawl one source now, regardless of its interval or enabled flag.
    pub fn crawl_now(&self, id: SourceId) -> Result<StartOutcome, ControlError> {
        let entry = self
            .registry
            .entry(id)
            .ok_or(ControlError::SourceNotFound(id))?;
        let outcome = self.spawn_unit(&entry);
        tracing::info!(target: "scheduler", source_id = id, ?outcome, "manual crawl");
        Ok(outcome)
    }

    /// Remove a source. A running unit is cancelled and awaited (or aborted
    /// after the grace period) before this returns.
    pub async fn remove_source(&self, id: SourceId) -> Result<Source, ControlError> {
        let entry = self.registry.detach(id)?;
        if let Some(w) = entry.cancel_unit() {
            let finished = w.finish_by(Instant::now() + self.cfg.stop_grace()).await;
            tracing::info!(target: "scheduler", source_id = id, finished, "in-flight crawl ended for removed source");
        }
        tracing::info!(target: "scheduler", source_id = id, "source removed");
        Ok(entry.snapshot())
    }
}
