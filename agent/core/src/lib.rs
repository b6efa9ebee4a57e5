// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dynamic package manager embedded in the gateway agent.
//!
//! Packages are developer-supplied extension modules dropped into a package
//! directory as artifact files. The manager loads, unloads, reloads and
//! updates them at runtime, wires them into a shared resource registry,
//! tracks inter-package dependencies, and accepts control commands written
//! to a named pipe by out-of-process senders.

mod collector;
mod command;
mod context;
mod digest;
mod loader;
mod manager;
mod manager_thread;
mod messenger;
mod metrics;
mod node;
mod package;
mod registry;
mod workers;

pub use collector::{CollectorStats, PoolStats, QueueDepths};
pub use digest::Sha1Digest;
pub use loader::{ArtifactLoader, LoaderError, PackageModule, StaticLoader};
pub use manager::{FirstLoadError, LoadError};
pub use manager_thread::{CoreStartError, DispatchError, ManagerDispatcher};
pub use node::{AgentNode, BootstrapError};
pub use package::{ArtifactKind, Package};
pub use registry::{RegistryError, Resource, ResourceRegistry, ScopedRegistry};
