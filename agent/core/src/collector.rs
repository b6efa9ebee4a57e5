// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Introspection seam into the agent's metric-collection subsystem.
///
/// The package manager does not schedule or collect anything itself; it only
/// reports these numbers when a `stat` command asks for them. Wiring the
/// collector is optional, and every figure prints as `n/a` when it is absent.
pub trait CollectorStats: Send + Sync {
    fn queue_depths(&self) -> QueueDepths;

    fn pool_stats(&self) -> PoolStats;
}

/// Depths of the metric pipeline queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDepths {
    /// Metrics waiting to be scheduled.
    pub waiting: usize,
    /// Metrics queued for transport to the data center.
    pub sending: usize,
    /// Metrics queued for value collection.
    pub collecting: usize,
}

/// Counters of the metric collection worker pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers currently collecting a value.
    pub working: usize,
    /// Workers alive, working or idle.
    pub alive: usize,
    /// Workers the pool currently holds.
    pub pool: usize,
    /// Maximum workers the pool may hold.
    pub capacity: usize,
}
