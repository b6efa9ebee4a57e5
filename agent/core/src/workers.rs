// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

/// Tracks the long-lived worker threads of the package manager so the
/// `list threads` and `stat threads` commands have something to report.
///
/// There is no thread enumeration in the standard library, so each worker
/// announces itself on startup and flips its liveness flag through a drop
/// guard when its run loop exits.
#[derive(Clone, Default)]
pub(crate) struct WorkerRegistry {
    inner: Arc<Mutex<Vec<WorkerEntry>>>,
}

struct WorkerEntry {
    name: String,
    thread_id: String,
    kind: WorkerKind,
    alive: Arc<AtomicBool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerKind {
    Manager,
    Messenger,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Manager => f.write_str("manager"),
            WorkerKind::Messenger => f.write_str("messenger"),
        }
    }
}

/// Snapshot of one worker for introspection output.
pub(crate) struct WorkerStatus {
    pub name: String,
    pub thread_id: String,
    pub kind: WorkerKind,
    pub alive: bool,
}

/// Marks the registering worker dead when its run loop unwinds or returns.
pub(crate) struct WorkerGuard {
    alive: Arc<AtomicBool>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

impl WorkerRegistry {
    /// Registers the calling thread. Must be invoked from the worker itself
    /// so the recorded thread id is the worker's own.
    pub(crate) fn register(&self, name: &str, kind: WorkerKind) -> WorkerGuard {
        let alive = Arc::new(AtomicBool::new(true));
        self.inner.lock().push(WorkerEntry {
            name: name.to_string(),
            thread_id: format!("{:?}", std::thread::current().id()),
            kind,
            alive: alive.clone(),
        });
        WorkerGuard { alive }
    }

    /// Worker states sorted by name.
    pub(crate) fn snapshot(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> = self
            .inner
            .lock()
            .iter()
            .map(|entry| WorkerStatus {
                name: entry.name.clone(),
                thread_id: entry.thread_id.clone(),
                kind: entry.kind,
                alive: entry.alive.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub(crate) fn active_count(&self) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|entry| entry.alive.load(Ordering::Relaxed))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_flips_liveness_on_drop() {
        let registry = WorkerRegistry::default();
        let guard = registry.register("package-manager", WorkerKind::Manager);
        assert_eq!(registry.active_count(), 1);
        assert!(registry.snapshot()[0].alive);

        drop(guard);
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.snapshot()[0].alive);
    }

    #[test]
    fn snapshot_is_sorted_by_name() {
        let registry = WorkerRegistry::default();
        let _messenger = registry.register("package-messenger", WorkerKind::Messenger);
        let _manager = registry.register("package-manager", WorkerKind::Manager);

        let names: Vec<String> = registry.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["package-manager", "package-messenger"]);
    }
}
