// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use agent_config::Parameters;

use crate::{collector::CollectorStats, metrics::Metrics, workers::WorkerRegistry};

/// Context contains the configuration, metrics, and introspection handles
/// shared by all components of the package manager.
#[derive(Clone)]
pub(crate) struct Context {
    /// Operational parameters from the agent configuration file.
    pub parameters: Parameters,
    /// Metrics of the package manager core.
    pub metrics: Arc<Metrics>,
    /// Optional seam into the metric-collection subsystem, consulted by
    /// `stat` commands.
    pub collector: Option<Arc<dyn CollectorStats>>,
    /// Live worker threads, consulted by `list threads` / `stat threads`.
    pub workers: WorkerRegistry,
}

impl Context {
    pub(crate) fn new(
        parameters: Parameters,
        metrics: Arc<Metrics>,
        collector: Option<Arc<dyn CollectorStats>>,
    ) -> Self {
        Self {
            parameters,
            metrics,
            collector,
            workers: WorkerRegistry::default(),
        }
    }

    /// Creates a context whose package directory and messenger pipe live in a
    /// fresh temporary directory, returned so the test keeps it alive.
    #[cfg(test)]
    pub(crate) fn new_for_test() -> (Self, tempfile::TempDir) {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let parameters = Parameters {
            pkg_path: temp_dir.path().join("packages"),
            pkg_msg_pipe: temp_dir.path().join("pipes").join("pkg_msg"),
        };
        std::fs::create_dir_all(&parameters.pkg_path).unwrap();
        let context = Context::new(parameters, crate::metrics::test_metrics(), None);
        (context, temp_dir)
    }

    #[cfg(test)]
    pub(crate) fn with_collector(mut self, collector: Arc<dyn CollectorStats>) -> Self {
        self.collector = Some(collector);
        self
    }
}
