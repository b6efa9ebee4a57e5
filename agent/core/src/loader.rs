// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, io, path::Path, path::PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::package::{ArtifactKind, Package};

/// A materialized package module: the dependency list the artifact declares
/// plus the constructor for its package instance.
pub struct PackageModule {
    dependencies: Vec<String>,
    constructor: Box<dyn FnOnce() -> Box<dyn Package> + Send>,
}

impl std::fmt::Debug for PackageModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageModule")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl PackageModule {
    pub fn new<F>(constructor: F) -> Self
    where
        F: FnOnce() -> Box<dyn Package> + Send + 'static,
    {
        Self {
            dependencies: Vec::new(),
            constructor: Box::new(constructor),
        }
    }

    /// Declares the package identifiers this module depends on.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn instantiate(self) -> Box<dyn Package> {
        (self.constructor)()
    }
}

/// Materializes package modules from artifact files.
///
/// The manager resolves which artifact to use (path and kind) and records its
/// digest; the loader only has to turn the artifact into a module.
pub trait ArtifactLoader: Send {
    fn materialize(
        &self,
        name: &str,
        path: &Path,
        kind: ArtifactKind,
    ) -> Result<PackageModule, LoaderError>;
}

type ModuleFactory = Box<dyn Fn() -> Result<PackageModule, LoaderError> + Send + Sync>;

/// The registration-convention loader: the embedding agent registers one
/// module factory per package identifier, and artifacts on disk supply
/// identity (presence, kind priority, digest) while the factory supplies
/// behavior.
#[derive(Default)]
pub struct StaticLoader {
    modules: HashMap<String, ModuleFactory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<PackageModule, LoaderError> + Send + Sync + 'static,
    {
        self.modules.insert(name.to_string(), Box::new(factory));
    }

    /// Builder-style [`Self::register`].
    pub fn with_module<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Result<PackageModule, LoaderError> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }
}

impl ArtifactLoader for StaticLoader {
    fn materialize(
        &self,
        name: &str,
        path: &Path,
        kind: ArtifactKind,
    ) -> Result<PackageModule, LoaderError> {
        let factory = self
            .modules
            .get(name)
            .ok_or_else(|| LoaderError::MissingConstructor {
                name: name.to_string(),
            })?;
        let module = factory()?;
        debug!("Loaded module: {} ({} from {})", name, kind, path.display());
        Ok(module)
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    /// The artifact does not export a package constructor.
    #[error("no package constructor registered for module {name}")]
    MissingConstructor { name: String },

    /// The artifact declares dependencies in a shape that is not a sequence
    /// of package identifiers.
    #[error("mal-formatted list of dependencies in module {name}")]
    MalformedDependencies { name: String },

    #[error("could not read module artifact {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed module artifact {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedRegistry;

    struct NoopPackage;

    impl Package for NoopPackage {
        fn run(&mut self, _registry: &mut ScopedRegistry<'_>) -> anyhow::Result<()> {
            Ok(())
        }

        fn clean_up(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn materializes_registered_modules() {
        let loader = StaticLoader::new().with_module("edge_systems", || {
            Ok(PackageModule::new(|| Box::new(NoopPackage)).with_dependencies(["core_bus"]))
        });

        let module = loader
            .materialize(
                "edge_systems",
                Path::new("/tmp/pkg/edge_systems.src"),
                ArtifactKind::Source,
            )
            .unwrap();
        assert_eq!(module.dependencies(), ["core_bus".to_string()]);
        let _instance = module.instantiate();
    }

    #[test]
    fn unregistered_module_is_missing_constructor() {
        let loader = StaticLoader::new();
        let err = loader
            .materialize(
                "ghost",
                Path::new("/tmp/pkg/ghost.src"),
                ArtifactKind::Source,
            )
            .unwrap_err();
        assert!(matches!(err, LoaderError::MissingConstructor { .. }));
    }

    #[test]
    fn factory_errors_propagate() {
        let loader = StaticLoader::new().with_module("broken", || {
            Err(LoaderError::MalformedDependencies {
                name: "broken".to_string(),
            })
        });
        let err = loader
            .materialize(
                "broken",
                Path::new("/tmp/pkg/broken.src"),
                ArtifactKind::Source,
            )
            .unwrap_err();
        assert!(matches!(err, LoaderError::MalformedDependencies { .. }));
    }
}
