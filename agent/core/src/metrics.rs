// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, IntCounter, IntGauge, Registry,
};

/// Metrics of the package manager core.
pub(crate) struct Metrics {
    /// Commands placed on the manager channel, by the messenger or the typed
    /// dispatcher API.
    pub commands_enqueued: IntCounter,
    /// Commands taken off the channel by the manager thread.
    pub commands_dequeued: IntCounter,
    /// Command lines discarded because they were malformed or unknown.
    pub commands_dropped: IntCounter,
    /// Packages currently loaded.
    pub packages_loaded: IntGauge,
    /// Resources currently registered, including unowned bootstrap entries.
    pub resources_registered: IntGauge,
    /// Load commands that failed to produce a loaded package.
    pub package_load_errors: IntCounter,
    /// Unload commands that left the package loaded.
    pub package_unload_errors: IntCounter,
    /// Total run time of the node, observed once at stop.
    pub uptime: Histogram,
}

impl Metrics {
    fn new(registry: &Registry) -> Self {
        Self {
            commands_enqueued: register_int_counter_with_registry!(
                "package_commands_enqueued",
                "Commands placed on the package manager channel",
                registry
            )
            .unwrap(),
            commands_dequeued: register_int_counter_with_registry!(
                "package_commands_dequeued",
                "Commands taken off the package manager channel",
                registry
            )
            .unwrap(),
            commands_dropped: register_int_counter_with_registry!(
                "package_commands_dropped",
                "Malformed or unknown command lines discarded",
                registry
            )
            .unwrap(),
            packages_loaded: register_int_gauge_with_registry!(
                "packages_loaded",
                "Packages currently loaded",
                registry
            )
            .unwrap(),
            resources_registered: register_int_gauge_with_registry!(
                "package_resources_registered",
                "Resources currently registered",
                registry
            )
            .unwrap(),
            package_load_errors: register_int_counter_with_registry!(
                "package_load_errors",
                "Load commands that failed",
                registry
            )
            .unwrap(),
            package_unload_errors: register_int_counter_with_registry!(
                "package_unload_errors",
                "Unload commands that failed",
                registry
            )
            .unwrap(),
            uptime: register_histogram_with_registry!(
                "package_manager_uptime",
                "Total run time of the package manager node in seconds",
                registry
            )
            .unwrap(),
        }
    }
}

pub(crate) fn initialise_metrics(registry: Registry) -> Arc<Metrics> {
    Arc::new(Metrics::new(&registry))
}

#[cfg(test)]
pub(crate) fn test_metrics() -> Arc<Metrics> {
    initialise_metrics(Registry::new())
}
