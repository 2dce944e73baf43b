// src/registry/mod.rs
//! Source Registry: configuration and health state for every monitored source,
//! plus the per-source slot that holds its (at most one) in-flight crawl unit.

pub mod source;

pub use source::{validate_url, NewSource, Source, SourceId, SourceUpdate};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::cancel::{self, Cancel, CancelHandle};
use crate::error::ControlError;
use source::{validate_interval, validate_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A unit for this source is still running; nothing was spawned.
    InFlight,
    /// The source was removed.
    Retired,
}

/// Handle to a spawned crawl unit.
#[derive(Debug)]
struct UnitHandle {
    cancel: CancelHandle,
    done: watch::Receiver<bool>,
    abort: AbortHandle,
}

impl UnitHandle {
    fn is_running(&self) -> bool {
        !*self.done.borrow()
    }
}

/// Moved into the unit's task; dropping it (completion, panic or abort) frees the slot.
#[derive(Debug)]
pub struct UnitGuard {
    done: watch::Sender<bool>,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.done.send_replace(true);
    }
}

/// Wait for a cancelled unit to finish, aborting it at the deadline.
#[derive(Debug)]
pub struct UnitWait {
    source_id: SourceId,
    done: watch::Receiver<bool>,
    abort: AbortHandle,
}

impl UnitWait {
    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// Returns `true` if the unit finished on its own before `deadline`.
    pub async fn finish_by(mut self, deadline: Instant) -> bool {
        match tokio::time::timeout_at(deadline, self.done.wait_for(|d| *d)).await {
            Ok(_) => true,
            Err(_) => {
                self.abort.abort();
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    unit: Option<UnitHandle>,
    retired: bool,
}

#[derive(Debug)]
pub struct SourceEntry {
    id: SourceId,
    source: RwLock<Source>,
    slot: Mutex<Slot>,
    in_flight: Arc<AtomicUsize>,
}

impl SourceEntry {
    fn new(source: Source, in_flight: Arc<AtomicUsize>) -> Self {
        Self {
            id: source.id,
            source: RwLock::new(source),
            slot: Mutex::new(Slot::default()),
            in_flight,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn snapshot(&self) -> Source {
        self.source.read().expect("source lock poisoned").clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Source) -> R) -> R {
        let mut guard = self.source.write().expect("source lock poisoned");
        f(&mut guard)
    }

    pub fn is_crawling(&self) -> bool {
        let slot = self.slot.lock().expect("source slot poisoned");
        slot.unit.as_ref().is_some_and(UnitHandle::is_running)
    }

    /// Spawn a unit unless one is already running. The check and the spawn happen
    /// under this source's slot lock, so overlapping callers cannot both start one.
    pub fn try_start<F>(&self, spawn: F) -> StartOutcome
    where
        F: FnOnce(Cancel, UnitGuard) -> JoinHandle<()>,
    {
        let mut slot = self.slot.lock().expect("source slot poisoned");
        if slot.retired {
            return StartOutcome::Retired;
        }
        if slot.unit.as_ref().is_some_and(UnitHandle::is_running) {
            return StartOutcome::InFlight;
        }
        let (cancel_handle, cancel) = cancel::pair();
        let (done_tx, done_rx) = watch::channel(false);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = UnitGuard {
            done: done_tx,
            in_flight: Arc::clone(&self.in_flight),
        };
        let join = spawn(cancel, guard);
        slot.unit = Some(UnitHandle {
            cancel: cancel_handle,
            done: done_rx,
            abort: join.abort_handle(),
        });
        StartOutcome::Started
    }

    /// Signal cancellation to the running unit, if any.
    pub fn cancel_unit(&self) -> Option<UnitWait> {
        let slot = self.slot.lock().expect("source slot poisoned");
        let unit = slot.unit.as_ref().filter(|u| u.is_running())?;
        unit.cancel.cancel();
        Some(UnitWait {
            source_id: self.id,
            done: unit.done.clone(),
            abort: unit.abort.clone(),
        })
    }

    fn retire(&self) {
        self.slot.lock().expect("source slot poisoned").retired = true;
    }
}

#[derive(Debug)]
pub struct SourceRegistry {
    entries: RwLock<BTreeMap<SourceId, Arc<SourceEntry>>>,
    next_id: AtomicU64,
    in_flight: Arc<AtomicUsize>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Validate and add a source. Invalid configuration never reaches the scheduler.
    pub fn register(&self, new: NewSource) -> Result<Source, ControlError> {
        let name = validate_name(&new.name)?;
        let url = validate_url(&new.url)?;
        let interval_minutes = validate_interval(new.interval_minutes)?;

        let mut map = self.entries.write().expect("registry lock poisoned");
        if map.values().any(|e| e.snapshot().url == url) {
            return Err(ControlError::DuplicateSource(url));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let source = Source {
            id,
            name,
            url,
            interval_minutes,
            enabled: new.enabled,
            created_at: Utc::now(),
            last_success_at: None,
            last_checked_at: None,
            last_seen_key: None,
            total_ingested: 0,
            last_error: None,
            error_count: 0,
        };
        map.insert(
            id,
            Arc::new(SourceEntry::new(source.clone(), Arc::clone(&self.in_flight))),
        );
        tracing::info!(target: "registry", id, name = %source.name, url = %source.url, "source registered");
        Ok(source)
    }

    pub fn update(&self, id: SourceId, upd: SourceUpdate) -> Result<Source, ControlError> {
        let name = upd.name.as_deref().map(validate_name).transpose()?;
        let url = upd.url.as_deref().map(validate_url).transpose()?;
        let interval = upd.interval_minutes.map(validate_interval).transpose()?;

        let map = self.entries.read().expect("registry lock poisoned");
        let entry = map.get(&id).ok_or(ControlError::SourceNotFound(id))?;
        if let Some(u) = &url {
            if map.values().any(|e| e.id() != id && &e.snapshot().url == u) {
                return Err(ControlError::DuplicateSource(u.clone()));
            }
        }
        Ok(entry.update(|s| {
            if let Some(n) = name {
                s.name = n;
            }
            if let Some(u) = url {
                if u != s.url {
                    // A different listing page has its own high-water mark.
                    s.last_seen_key = None;
                }
                s.url = u;
            }
            if let Some(i) = interval {
                s.interval_minutes = i;
            }
            if let Some(en) = upd.enabled {
                s.enabled = en;
            }
            s.clone()
        }))
    }

    pub fn toggle(&self, id: SourceId) -> Result<Source, ControlError> {
        let entry = self.entry(id).ok_or(ControlError::SourceNotFound(id))?;
        Ok(entry.update(|s| {
            s.enabled = !s.enabled;
            s.clone()
        }))
    }

    pub fn get(&self, id: SourceId) -> Result<Source, ControlError> {
        self.entry(id)
            .map(|e| e.snapshot())
            .ok_or(ControlError::SourceNotFound(id))
    }

    pub fn list(&self) -> Vec<Source> {
        self.entries().iter().map(|e| e.snapshot()).collect()
    }

    pub fn entry(&self, id: SourceId) -> Option<Arc<SourceEntry>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn entries(&self) -> Vec<Arc<SourceEntry>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Remove from the map and block new units. The caller is responsible for
    /// cancelling and awaiting a unit that may still be running.
    pub fn detach(&self, id: SourceId) -> Result<Arc<SourceEntry>, ControlError> {
        let entry = self
            .entries
            .write()
            .expect("registry lock poisoned")
            .remove(&id)
            .ok_or(ControlError::SourceNotFound(id))?;
        entry.retire();
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Re-insert persisted sources, keeping their ids.
    pub fn restore(&self, sources: Vec<Source>) {
        let mut map = self.entries.write().expect("registry lock poisoned");
        for s in sources {
            self.next_id.fetch_max(s.id + 1, Ordering::SeqCst);
            map.insert(
                s.id,
                Arc::new(SourceEntry::new(s, Arc::clone(&self.in_flight))),
            );
        }
    }
}
