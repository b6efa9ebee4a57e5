// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    ffi::CString,
    fs, io,
    os::unix::ffi::OsStrExt,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use agent_config::Parameters;
use prometheus::Registry;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    collector::CollectorStats,
    context::Context,
    loader::ArtifactLoader,
    manager::PackageManager,
    manager_thread::{CoreStartError, ManagerDispatcher, ManagerThreadHandle},
    messenger::{MessengerHandle, PackageMessenger},
    metrics::initialise_metrics,
};

/// The running package manager: the manager thread, the messenger listening
/// on the pipe, and the dispatcher that reaches them.
///
/// Bootstrap builds exactly one of these and hands it to the embedding agent;
/// everything the original kept in process-wide globals lives here instead.
pub struct AgentNode {
    context: Arc<Context>,
    start_time: Instant,
    dispatcher: ManagerDispatcher,
    manager_handle: ManagerThreadHandle,
    #[allow(unused)]
    messenger_handle: MessengerHandle,
}

impl std::fmt::Debug for AgentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNode").finish_non_exhaustive()
    }
}

impl AgentNode {
    /// Validates the configured paths, creating the package directory and
    /// the messenger FIFO when absent, then brings up the manager thread
    /// (which performs first-load) and, only once the manager's loop is
    /// running, the messenger.
    pub async fn start(
        parameters: Parameters,
        loader: Box<dyn ArtifactLoader>,
        collector: Option<Arc<dyn CollectorStats>>,
        registry: Registry,
    ) -> Result<Self, BootstrapError> {
        info!(
            "Starting package manager with package directory {}",
            parameters.pkg_path.display()
        );
        ensure_package_dir(&parameters.pkg_path)?;
        ensure_fifo(&parameters.pkg_msg_pipe)?;

        let context = Arc::new(Context::new(
            parameters,
            initialise_metrics(registry),
            collector,
        ));
        let start_time = Instant::now();

        let manager = PackageManager::new(context.clone(), loader);
        let (dispatcher, manager_handle) =
            ManagerDispatcher::start(manager, context.clone()).await?;

        // The messenger starts last because it is what triggers actions.
        let messenger_handle = PackageMessenger::start(
            context.parameters.pkg_msg_pipe.clone(),
            dispatcher.clone(),
            context.clone(),
        );

        info!("Package manager is initialized");
        Ok(Self {
            context,
            start_time,
            dispatcher,
            manager_handle,
            messenger_handle,
        })
    }

    /// A handle for submitting commands from inside the process, next to the
    /// out-of-process pipe.
    pub fn dispatcher(&self) -> ManagerDispatcher {
        self.dispatcher.clone()
    }

    pub async fn stop(self) {
        info!(
            "Stopping package manager. Total run time: {:?}",
            self.start_time.elapsed()
        );
        self.manager_handle.stop();
        // The messenger terminates with the process: it notices the manager
        // is gone the next time a batch arrives.
        self.context
            .metrics
            .uptime
            .observe(self.start_time.elapsed().as_secs_f64());
    }
}

/// The package directory must be a directory we can list; it is created when
/// missing.
fn ensure_package_dir(path: &Path) -> Result<(), BootstrapError> {
    if path.is_dir() {
        fs::read_dir(path).map_err(|source| BootstrapError::PackageDir {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(());
    }
    debug!("Could not find package path: {}", path.display());
    fs::create_dir_all(path).map_err(|source| BootstrapError::PackageDir {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Created package path: {}", path.display());
    Ok(())
}

/// The messenger pipe must be a FIFO; it is created (parent directory
/// included) when missing.
pub(crate) fn ensure_fifo(path: &Path) -> Result<(), BootstrapError> {
    match fs::metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_fifo() {
                Ok(())
            } else {
                Err(BootstrapError::PipeNotFifo {
                    path: path.to_path_buf(),
                })
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.is_dir() {
                    fs::create_dir_all(parent).map_err(|source| BootstrapError::PipeCreate {
                        path: path.to_path_buf(),
                        source,
                    })?;
                    info!("Created directory: {}", parent.display());
                }
            }
            mkfifo(path).map_err(|source| BootstrapError::PipeCreate {
                path: path.to_path_buf(),
                source,
            })?;
            info!("Created pipe: {}", path.display());
            Ok(())
        }
        Err(source) => Err(BootstrapError::PipeCreate {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn mkfifo(path: &Path) -> io::Result<()> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pipe path contains NUL"))?;
    // Readable and writable by the agent's user only.
    if unsafe { libc::mkfifo(path.as_ptr(), 0o600) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not access or create package directory {}: {source}", path.display())]
    PackageDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pipe path exists, but it is not a pipe: {}", path.display())]
    PipeNotFifo { path: PathBuf },

    #[error("could not create messenger pipe {}: {source}", path.display())]
    PipeCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreStartError),
}
