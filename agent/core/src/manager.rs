// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::{BTreeSet, HashMap},
    io,
    path::PathBuf,
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    command::{Command, ListTarget, StatTarget},
    context::Context,
    digest::sha1sum,
    loader::{ArtifactLoader, LoaderError},
    package::{ArtifactKind, PackageRecord},
    registry::ResourceRegistry,
};

/// The mandatory package brought up by first-load before any external
/// command is accepted.
pub(crate) const GATEWAY_PACKAGE: &str = "gateway";

/// The resource the gateway package must register for first-load to count as
/// successful.
pub(crate) const GATEWAY_RESOURCE: &str = "gateway";

/// Resource under which the configured package directory is published, so
/// packages can locate their own data files.
const PACKAGE_CONF_RESOURCE: &str = "package_conf";

/// Ordered record of the packages a cascading unload removed, consumed in
/// reverse by reload and update.
type TrackList = Vec<(String, ArtifactKind)>;

/// Core of the package manager: the map of loaded package records and the
/// resource registry, driven one command at a time by the manager thread.
///
/// Not internally synchronized. The manager thread owns this value
/// exclusively; the command channel in front of it is the serialization
/// point, so every load/unload cascade runs to completion before the next
/// command is looked at.
pub(crate) struct PackageManager {
    context: Arc<Context>,
    loader: Box<dyn ArtifactLoader>,
    packages: HashMap<String, PackageRecord>,
    registry: ResourceRegistry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
    Loaded,
    /// The identifier was already in the loaded-map; loading is a no-op.
    AlreadyLoaded,
}

impl PackageManager {
    pub(crate) fn new(context: Arc<Context>, loader: Box<dyn ArtifactLoader>) -> Self {
        let mut registry = ResourceRegistry::new();
        registry
            .register(
                PACKAGE_CONF_RESOURCE,
                Arc::new(context.parameters.pkg_path.clone()),
                None,
            )
            .expect("a fresh registry cannot conflict");
        Self {
            context,
            loader,
            packages: HashMap::new(),
            registry,
        }
    }

    /// Executes one command. Failures are logged and abandoned; the caller's
    /// dispatch loop never stops because a command failed.
    pub(crate) fn execute(&mut self, command: Command) -> bool {
        let ok = match command {
            Command::Load(name) => self.load(&name),
            Command::Unload(name) => self.unload(&name),
            Command::Delete(name) => {
                debug!("Attempting to delete package: {name}");
                // Reserved in the command grammar, currently a no-op.
                true
            }
            Command::Reload(name) => self.reload(&name),
            Command::Update(name) => self.update(&name),
            Command::List(target) => {
                self.handle_list(target);
                true
            }
            Command::Stat(target) => {
                self.handle_stat(target);
                true
            }
            Command::Check => {
                // Reserved in the command grammar, currently a no-op.
                debug!("Got check command, nothing to do");
                true
            }
        };
        self.sync_gauges();
        ok
    }

    fn load(&mut self, name: &str) -> bool {
        match self.load_package(name, None, &mut Vec::new()) {
            Ok(LoadOutcome::Loaded) => true,
            Ok(LoadOutcome::AlreadyLoaded) => false,
            Err(err) => {
                error!("{err}");
                self.context.metrics.package_load_errors.inc();
                false
            }
        }
    }

    fn unload(&mut self, name: &str) -> bool {
        let ok = self.unload_package(name, &mut Vec::new());
        if !ok {
            self.context.metrics.package_unload_errors.inc();
        }
        ok
    }

    /// Loads `name` and, recursively, the dependencies its module declares.
    /// `stack` carries the chain of identifiers currently being loaded so a
    /// dependency cycle is detected instead of recursing forever.
    fn load_package(
        &mut self,
        name: &str,
        forced: Option<ArtifactKind>,
        stack: &mut Vec<String>,
    ) -> Result<LoadOutcome, LoadError> {
        debug!("Attempting to load package: {name}");

        if self.packages.contains_key(name) {
            warn!("Package already loaded: {name}");
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let (path, kind) = self.resolve_artifact(name, forced)?;
        debug!("Package file found: {}", path.display());

        let digest = sha1sum(&path).map_err(|source| LoadError::ArtifactUnreadable {
            path: path.clone(),
            source,
        })?;
        info!("Loaded package file: {} ({digest})", path.display());

        let module = self.loader.materialize(name, &path, kind)?;

        // Dependencies load before the package itself runs. If any of them
        // cannot be brought up, the package is not loaded either.
        if !module.dependencies().is_empty() {
            info!(
                "Package {} depends on: {}",
                name,
                module.dependencies().join(" ")
            );
            stack.push(name.to_string());
            for dependency in module.dependencies() {
                if stack.iter().any(|pending| pending == dependency) {
                    stack.pop();
                    return Err(LoadError::DependencyCycle {
                        name: name.to_string(),
                        dependency: dependency.clone(),
                    });
                }
                if !self.packages.contains_key(dependency) {
                    if let Err(err) = self.load_package(dependency, None, stack) {
                        error!("{err}");
                    }
                }
                if !self.packages.contains_key(dependency) {
                    stack.pop();
                    return Err(LoadError::DependencyFailed {
                        name: name.to_string(),
                        dependency: dependency.clone(),
                    });
                }
                self.packages
                    .get_mut(dependency)
                    .expect("dependency was just verified to be loaded")
                    .add_dependent(name);
            }
            stack.pop();
            debug!("Dependency check of package {name} is complete");
        }

        let mut record = PackageRecord::new(name);
        if !record.set_instance(module.instantiate()) {
            return Err(LoadError::InstanceAlreadySet {
                name: name.to_string(),
            });
        }

        {
            let mut scoped = self.registry.scoped(name);
            let instance = record
                .instance_mut()
                .expect("instance was just installed");
            if let Err(cause) = instance.run(&mut scoped) {
                // Registrations a partially run package already made are not
                // rolled back; they count as a bug in the package.
                return Err(LoadError::Init {
                    name: name.to_string(),
                    cause,
                });
            }
        }

        record.set_digest(digest);
        record.set_kind(kind);
        self.packages.insert(name.to_string(), record);

        info!("Package class from module {name} is initialized");
        Ok(LoadOutcome::Loaded)
    }

    /// Resolves the artifact to load `name` from. With `forced` only that
    /// kind is probed; otherwise kinds are probed in priority order and the
    /// first existing regular file wins.
    fn resolve_artifact(
        &self,
        name: &str,
        forced: Option<ArtifactKind>,
    ) -> Result<(PathBuf, ArtifactKind), LoadError> {
        let kinds: &[ArtifactKind] = match &forced {
            Some(kind) => std::slice::from_ref(kind),
            None => &ArtifactKind::PRIORITY,
        };
        for kind in kinds {
            let path = self
                .context
                .parameters
                .pkg_path
                .join(format!("{}.{}", name, kind.extension()));
            if path.is_file() {
                return Ok((path, *kind));
            }
        }
        Err(LoadError::ArtifactMissing {
            name: name.to_string(),
        })
    }

    /// Unloads `name`, first cascading through every package that depends on
    /// it. Each package actually unloaded is appended to `track` together
    /// with the artifact kind it had been loaded from.
    fn unload_package(&mut self, name: &str, track: &mut TrackList) -> bool {
        debug!("Attempting to unload package: {name}");

        if !self.packages.contains_key(name) {
            warn!("Could not unload package - not loaded: {name}");
            return false;
        }

        // Stop all dependents before making any change to the package itself.
        let dependents = self.packages[name].dependents();
        if !dependents.is_empty() {
            info!("Package {} is depended by: {}", name, dependents.join(" "));
            for dependent in &dependents {
                if self.packages.contains_key(dependent) {
                    self.unload_package(dependent, track);
                }
                if self.packages.contains_key(dependent) {
                    error!("{name} is still alive, because {dependent} failed to unload");
                    return false;
                }
                self.packages
                    .get_mut(name)
                    .expect("target is still loaded")
                    .del_dependent(dependent);
            }
            debug!("Dependency check of package {name} is complete");
        }

        // Unload proceeds whether or not deregistration finds anything.
        if !self.registry.purge_owner(name) {
            warn!("Could not deregister resource refs for package: {name}");
        }

        let mut record = self
            .packages
            .remove(name)
            .expect("target is still loaded");
        let instance = record
            .instance_mut()
            .expect("loaded package record must hold an instance");
        if let Err(err) = instance.clean_up() {
            error!("Exception in clean-up: {err:#}");
        }
        track.push((
            record.name().to_string(),
            record
                .kind()
                .expect("loaded package record must carry its artifact kind"),
        ));

        info!("Unloaded package: {name}");
        true
    }

    /// Restarts `name` from the same artifacts everything was originally
    /// loaded from: the track list remembers each unloaded package's kind, so
    /// a higher-priority source file dropped in the meantime is ignored.
    fn reload(&mut self, name: &str) -> bool {
        debug!("Attempting to reload package: {name}");

        if !self.packages.contains_key(name) {
            warn!("Could not reload package - not loaded: {name}");
            return false;
        }

        let mut track = TrackList::new();
        if !self.unload_package(name, &mut track) {
            warn!("Could not unload package: {name}");
            return false;
        }
        track.reverse();
        info!(
            "Packages will be reloaded: {}",
            track
                .iter()
                .map(|(pkg, _)| pkg.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );
        for (pkg, kind) in &track {
            if self.packages.contains_key(pkg) {
                continue;
            }
            match self.load_package(pkg, Some(*kind), &mut Vec::new()) {
                Ok(_) => info!("Reloaded package: {pkg}"),
                Err(err) => error!("Unloaded but could not reload package: {pkg}: {err}"),
            }
        }
        self.packages.contains_key(name)
    }

    /// Like reload, but every involved package re-probes artifact kinds in
    /// priority order, so an updated source file supersedes the compiled
    /// artifact a package was running from. Degrades to a plain load when
    /// `name` is not loaded.
    fn update(&mut self, name: &str) -> bool {
        debug!("Attempting to update package: {name}");

        if !self.packages.contains_key(name) {
            info!("Package is not loaded, will try to load: {name}");
            return match self.load_package(name, None, &mut Vec::new()) {
                Ok(LoadOutcome::Loaded) => true,
                Ok(LoadOutcome::AlreadyLoaded) => false,
                Err(err) => {
                    error!("{err}");
                    false
                }
            };
        }

        let mut track = TrackList::new();
        if !self.unload_package(name, &mut track) {
            warn!("Could not unload package: {name}");
            return false;
        }
        track.reverse();
        info!(
            "Packages will be reloaded and updated: {}",
            track
                .iter()
                .map(|(pkg, _)| pkg.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );
        for (pkg, _) in &track {
            if self.packages.contains_key(pkg) {
                continue;
            }
            match self.load_package(pkg, None, &mut Vec::new()) {
                Ok(_) => info!("Reloaded and updated package: {pkg}"),
                Err(err) => error!("Unloaded but could not reload package: {pkg}: {err}"),
            }
        }
        self.packages.contains_key(name)
    }

    /// Brings up the mandatory gateway package before the dispatch loop
    /// starts. When no `gateway` artifact exists, the package directory is
    /// scanned for `gateway_*` artifacts; exactly one candidate stem must
    /// exist for it to be loaded in gateway's stead.
    pub(crate) fn first_load(&mut self) -> Result<(), FirstLoadError> {
        info!("First-load of the gateway package");
        match self.load_package(GATEWAY_PACKAGE, None, &mut Vec::new()) {
            Ok(_) => {}
            Err(LoadError::ArtifactMissing { .. }) => {
                let candidates = self.gateway_candidates()?;
                match candidates.as_slice() {
                    [] => return Err(FirstLoadError::NoCandidate),
                    [candidate] => {
                        let candidate = candidate.clone();
                        info!("Found gateway candidate: {candidate}");
                        if let Err(source) = self.load_package(&candidate, None, &mut Vec::new())
                        {
                            return Err(FirstLoadError::Load { source });
                        }
                    }
                    _ => {
                        return Err(FirstLoadError::Ambiguous {
                            candidates: candidates.join(" "),
                        })
                    }
                }
            }
            Err(source) => return Err(FirstLoadError::Load { source }),
        }
        if !self.registry.has(GATEWAY_RESOURCE) {
            return Err(FirstLoadError::ResourceMissing);
        }
        self.sync_gauges();
        Ok(())
    }

    /// Stems of `gateway_*` artifacts in the package directory, deduplicated
    /// and sorted lexicographically.
    fn gateway_candidates(&self) -> Result<Vec<String>, FirstLoadError> {
        let dir = &self.context.parameters.pkg_path;
        let entries = std::fs::read_dir(dir).map_err(|source| FirstLoadError::Scan {
            path: dir.clone(),
            source,
        })?;
        let mut stems = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| FirstLoadError::Scan {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
                continue;
            };
            if ArtifactKind::from_extension(extension).is_none() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if stem.starts_with("gateway_") {
                stems.insert(stem.to_string());
            }
        }
        Ok(stems.into_iter().collect())
    }

    fn handle_list(&self, target: ListTarget) {
        match target {
            ListTarget::Packages => {
                info!(
                    "List of packages -\n\t{}",
                    self.loaded_packages().join("\n\t")
                );
            }
            ListTarget::Resources => {
                info!(
                    "List of resources -\n\t{}",
                    self.registry.identifiers().join("\n\t")
                );
            }
            ListTarget::Threads => {
                let lines: Vec<String> = self
                    .context
                    .workers
                    .snapshot()
                    .iter()
                    .map(|worker| {
                        format!(
                            "{}: {} {} {}",
                            worker.name, worker.thread_id, worker.kind, worker.alive
                        )
                    })
                    .collect();
                info!("Active threads -\n\t{}", lines.join("\n\t"));
            }
        }
    }

    fn handle_stat(&self, target: StatTarget) {
        match target {
            StatTarget::Metrics => {
                let mut stats = ["n/a"; 4].map(String::from);
                if let Some(collector) = &self.context.collector {
                    let depths = collector.queue_depths();
                    stats[0] = depths.waiting.to_string();
                    stats[1] = depths.sending.to_string();
                    stats[2] = depths.collecting.to_string();
                    stats[3] = collector.pool_stats().working.to_string();
                }
                info!(
                    "Number of metrics in -\n\tWaiting queue: {}\n\tSending queue: {}\n\tCollecting queue: {}\n\tCollecting threads: {}",
                    stats[0], stats[1], stats[2], stats[3]
                );
            }
            StatTarget::CollectionThreads => {
                let mut stats = ["n/a"; 4].map(String::from);
                if let Some(collector) = &self.context.collector {
                    let pool = collector.pool_stats();
                    stats[0] = pool.working.to_string();
                    stats[1] = pool.alive.to_string();
                    stats[2] = pool.pool.to_string();
                    stats[3] = pool.capacity.to_string();
                }
                info!(
                    "Status of collection threads -\n\tCollecting: {}\n\tAlive: {}\n\tPool: {}\n\tCapacity: {}",
                    stats[0], stats[1], stats[2], stats[3]
                );
            }
            StatTarget::Threads => {
                info!(
                    "Count of active threads: {}",
                    self.context.workers.active_count()
                );
            }
        }
    }

    /// Sorted identifiers of the loaded packages.
    pub(crate) fn loaded_packages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.packages.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted identifiers of the registered resources.
    pub(crate) fn resource_identifiers(&self) -> Vec<String> {
        self.registry.identifiers()
    }

    fn sync_gauges(&self) {
        let metrics = &self.context.metrics;
        metrics.packages_loaded.set(self.packages.len() as i64);
        metrics
            .resources_registered
            .set(self.registry.len() as i64);
    }

    #[cfg(test)]
    pub(crate) fn record(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(name)
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Package file not found: {name}")]
    ArtifactMissing { name: String },

    #[error("Could not open file: {}: {source}", path.display())]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Materialize(#[from] LoaderError),

    #[error("{name} is not loaded, because {dependency} depends on it")]
    DependencyCycle { name: String, dependency: String },

    #[error("{name} is not loaded, because {dependency} failed to load")]
    DependencyFailed { name: String, dependency: String },

    #[error("Unexpected failure initializing package: {name}")]
    InstanceAlreadySet { name: String },

    #[error("Exception in initialization of {name}: {cause:#}")]
    Init { name: String, cause: anyhow::Error },
}

#[derive(Debug, Error)]
pub enum FirstLoadError {
    #[error("gateway package failed to load: {source}")]
    Load {
        #[source]
        source: LoadError,
    },

    #[error("no gateway package artifact found in the package directory")]
    NoCandidate,

    #[error("more than one gateway candidate found: {candidates}")]
    Ambiguous { candidates: String },

    #[error("gateway package did not register the \"gateway\" resource")]
    ResourceMissing,

    #[error("could not scan package directory {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
