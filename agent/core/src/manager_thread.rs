// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, thread};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, oneshot::error::RecvError};
use tracing::{debug, error, info, warn};

use crate::{
    command::Command,
    context::Context,
    manager::{FirstLoadError, PackageManager},
    workers::WorkerKind,
};

/// Commands understood by the manager thread: raw lines from the messenger
/// pipe, plus typed requests used by the embedding process and tests.
pub(crate) enum ManagerCommand {
    /// A whitespace-tokenized command line from the messenger pipe.
    Line(Vec<String>),
    Load(String, oneshot::Sender<bool>),
    Unload(String, oneshot::Sender<bool>),
    Reload(String, oneshot::Sender<bool>),
    Update(String, oneshot::Sender<bool>),
    LoadedPackages(oneshot::Sender<Vec<String>>),
    Resources(oneshot::Sender<Vec<String>>),
}

/// Owns the channel sender whose drop terminates the manager thread.
pub(crate) struct ManagerThreadHandle {
    sender: mpsc::UnboundedSender<ManagerCommand>,
    join_handle: thread::JoinHandle<()>,
}

impl std::fmt::Debug for ManagerThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerThreadHandle").finish_non_exhaustive()
    }
}

impl ManagerThreadHandle {
    /// Dropping the strong sender leaves the weak senders of every
    /// dispatcher clone unable to upgrade, so the run loop drains and exits.
    pub(crate) fn stop(self) {
        drop(self.sender);
        self.join_handle.join().ok();
    }
}

struct ManagerThread {
    manager: PackageManager,
    receiver: mpsc::UnboundedReceiver<ManagerCommand>,
    context: Arc<Context>,
    ready: oneshot::Sender<Result<(), FirstLoadError>>,
}

impl ManagerThread {
    fn run(self) {
        let ManagerThread {
            mut manager,
            mut receiver,
            context,
            ready,
        } = self;
        let _guard = context
            .workers
            .register("package-manager", WorkerKind::Manager);
        debug!("Started package manager thread");

        // The mandatory gateway package comes up before any external command
        // is looked at; if it cannot, the dispatch loop never starts.
        match manager.first_load() {
            Ok(()) => {
                ready.send(Ok(())).ok();
            }
            Err(err) => {
                error!("First-load failed: {err}");
                ready.send(Err(err)).ok();
                return;
            }
        }

        while let Some(command) = receiver.blocking_recv() {
            context.metrics.commands_dequeued.inc();
            match command {
                ManagerCommand::Line(tokens) => {
                    info!(
                        "Got message in package messenger queue: {}",
                        tokens.join(" ")
                    );
                    match Command::parse(&tokens) {
                        Ok(command) => {
                            manager.execute(command);
                        }
                        Err(err) => {
                            warn!("{err}");
                            context.metrics.commands_dropped.inc();
                        }
                    }
                }
                ManagerCommand::Load(name, sender) => {
                    sender.send(manager.execute(Command::Load(name))).ok();
                }
                ManagerCommand::Unload(name, sender) => {
                    sender.send(manager.execute(Command::Unload(name))).ok();
                }
                ManagerCommand::Reload(name, sender) => {
                    sender.send(manager.execute(Command::Reload(name))).ok();
                }
                ManagerCommand::Update(name, sender) => {
                    sender.send(manager.execute(Command::Update(name))).ok();
                }
                ManagerCommand::LoadedPackages(sender) => {
                    sender.send(manager.loaded_packages()).ok();
                }
                ManagerCommand::Resources(sender) => {
                    sender.send(manager.resource_identifiers()).ok();
                }
            }
        }
        debug!("Package manager thread stopped");
    }
}

/// Cloneable front of the manager thread. Holds a weak sender so dropping
/// the [`ManagerThreadHandle`] is enough to shut the thread down no matter
/// how many dispatcher clones are around.
#[derive(Clone)]
pub struct ManagerDispatcher {
    sender: mpsc::WeakUnboundedSender<ManagerCommand>,
    context: Arc<Context>,
}

impl std::fmt::Debug for ManagerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerDispatcher").finish_non_exhaustive()
    }
}

impl ManagerDispatcher {
    /// Spawns the manager thread and waits for its first-load to conclude.
    pub(crate) async fn start(
        manager: PackageManager,
        context: Arc<Context>,
    ) -> Result<(Self, ManagerThreadHandle), CoreStartError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (ready_sender, ready_receiver) = oneshot::channel();
        let manager_thread = ManagerThread {
            manager,
            receiver,
            context: context.clone(),
            ready: ready_sender,
        };
        let join_handle = thread::Builder::new()
            .name("package-manager".to_string())
            .spawn(move || manager_thread.run())
            .unwrap();
        let dispatcher = ManagerDispatcher {
            sender: sender.downgrade(),
            context,
        };
        let handle = ManagerThreadHandle {
            sender,
            join_handle,
        };
        match ready_receiver.await {
            Ok(Ok(())) => Ok((dispatcher, handle)),
            Ok(Err(err)) => {
                handle.stop();
                Err(CoreStartError::FirstLoad(err))
            }
            Err(_) => {
                handle.stop();
                Err(CoreStartError::Exited)
            }
        }
    }

    fn send(&self, command: ManagerCommand) -> bool {
        self.context.metrics.commands_enqueued.inc();
        let Some(sender) = self.sender.upgrade() else {
            return false;
        };
        if let Err(err) = sender.send(command) {
            warn!("Couldn't send command to package manager thread, probably is shutting down: {err}");
            return false;
        }
        true
    }

    /// Enqueues one tokenized command line from the messenger pipe. Returns
    /// whether the manager thread was still there to receive it.
    pub(crate) fn dispatch_line(&self, tokens: Vec<String>) -> bool {
        self.send(ManagerCommand::Line(tokens))
    }

    pub async fn load(&self, name: &str) -> Result<bool, DispatchError> {
        self.request(|sender| ManagerCommand::Load(name.to_string(), sender))
            .await
    }

    pub async fn unload(&self, name: &str) -> Result<bool, DispatchError> {
        self.request(|sender| ManagerCommand::Unload(name.to_string(), sender))
            .await
    }

    pub async fn reload(&self, name: &str) -> Result<bool, DispatchError> {
        self.request(|sender| ManagerCommand::Reload(name.to_string(), sender))
            .await
    }

    pub async fn update(&self, name: &str) -> Result<bool, DispatchError> {
        self.request(|sender| ManagerCommand::Update(name.to_string(), sender))
            .await
    }

    /// Sorted identifiers of the loaded packages.
    pub async fn loaded_packages(&self) -> Result<Vec<String>, DispatchError> {
        self.request(ManagerCommand::LoadedPackages).await
    }

    /// Sorted identifiers of the registered resources.
    pub async fn resources(&self) -> Result<Vec<String>, DispatchError> {
        self.request(ManagerCommand::Resources).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, DispatchError> {
        let (sender, receiver) = oneshot::channel();
        self.send(command(sender));
        receiver.await.map_err(DispatchError::Shutdown)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Package manager thread shutdown: {0}")]
    Shutdown(RecvError),
}

#[derive(Debug, Error)]
pub enum CoreStartError {
    #[error(transparent)]
    FirstLoad(#[from] FirstLoadError),

    #[error("package manager thread exited before signaling readiness")]
    Exited,
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;
    use crate::{
        loader::{PackageModule, StaticLoader},
        package::{ArtifactKind, Package},
        registry::ScopedRegistry,
    };

    struct ResourcePackage {
        resources: Vec<&'static str>,
    }

    impl Package for ResourcePackage {
        fn run(&mut self, registry: &mut ScopedRegistry<'_>) -> anyhow::Result<()> {
            for resource in &self.resources {
                registry.register(resource, Arc::new(()))?;
            }
            Ok(())
        }

        fn clean_up(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn resource_module(
        loader: &mut StaticLoader,
        name: &str,
        resources: &'static [&'static str],
    ) {
        loader.register(name, move || {
            Ok(PackageModule::new(move || {
                Box::new(ResourcePackage {
                    resources: resources.to_vec(),
                })
            }))
        });
    }

    fn touch(pkg_path: &Path, name: &str) {
        std::fs::write(
            pkg_path.join(format!("{}.{}", name, ArtifactKind::Source.extension())),
            format!("artifact {name}"),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn dispatches_typed_commands_until_stopped() {
        let (context, _temp_dir) = crate::context::Context::new_for_test();
        let context = Arc::new(context);
        let mut loader = StaticLoader::new();
        resource_module(&mut loader, "gateway", &["gateway"]);
        resource_module(&mut loader, "edge_systems", &["bus"]);
        touch(&context.parameters.pkg_path, "gateway");
        touch(&context.parameters.pkg_path, "edge_systems");
        let manager = PackageManager::new(context.clone(), Box::new(loader));

        let (dispatcher, handle) = ManagerDispatcher::start(manager, context.clone())
            .await
            .unwrap();

        // First-load already brought up the gateway.
        assert_eq!(
            dispatcher.loaded_packages().await.unwrap(),
            vec!["gateway"]
        );

        let dispatcher_1 = dispatcher.clone();
        let dispatcher_2 = dispatcher.clone();
        assert!(dispatcher_1.load("edge_systems").await.unwrap());
        assert_eq!(
            dispatcher_2.loaded_packages().await.unwrap(),
            vec!["edge_systems", "gateway"]
        );
        assert!(dispatcher_1.unload("edge_systems").await.unwrap());
        assert!(!dispatcher_2.unload("edge_systems").await.unwrap());

        handle.stop();

        assert!(dispatcher_1.load("edge_systems").await.is_err());
        assert!(dispatcher_2.loaded_packages().await.is_err());
    }

    #[tokio::test]
    async fn command_lines_apply_in_arrival_order() {
        let (context, _temp_dir) = crate::context::Context::new_for_test();
        let context = Arc::new(context);
        let mut loader = StaticLoader::new();
        resource_module(&mut loader, "gateway", &["gateway"]);
        resource_module(&mut loader, "a", &[]);
        resource_module(&mut loader, "b", &[]);
        for name in ["gateway", "a", "b"] {
            touch(&context.parameters.pkg_path, name);
        }
        let manager = PackageManager::new(context.clone(), Box::new(loader));

        let (dispatcher, handle) = ManagerDispatcher::start(manager, context.clone())
            .await
            .unwrap();

        for line in ["load a", "load b", "not a command", "unload a"] {
            assert!(dispatcher.dispatch_line(
                line.split_whitespace().map(String::from).collect()
            ));
        }

        // The query rides the same FIFO channel, so by the time it answers,
        // every line above has been applied in order.
        assert_eq!(
            dispatcher.loaded_packages().await.unwrap(),
            vec!["b", "gateway"]
        );
        assert_eq!(context.metrics.commands_dropped.get(), 1);
        assert_eq!(
            dispatcher.resources().await.unwrap(),
            vec!["gateway", "package_conf"]
        );

        handle.stop();
    }

    #[tokio::test]
    async fn start_fails_when_first_load_fails() {
        let (context, _temp_dir) = crate::context::Context::new_for_test();
        let context = Arc::new(context);
        // No gateway artifact at all.
        let manager = PackageManager::new(context.clone(), Box::new(StaticLoader::new()));

        let err = ManagerDispatcher::start(manager, context)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreStartError::FirstLoad(FirstLoadError::NoCandidate)
        ));
    }
}
