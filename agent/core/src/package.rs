// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeSet, fmt};

use tracing::warn;

use crate::{digest::Sha1Digest, registry::ScopedRegistry};

/// The capability every package must implement.
///
/// `run` is invoked once, right after the package module is materialized and
/// instantiated; the scoped registry view it receives attributes every
/// registration to the package so the manager can purge them on unload.
/// `clean_up` is invoked once on unload; its errors are logged and swallowed
/// so an unload always completes.
pub trait Package: Send {
    fn run(&mut self, registry: &mut ScopedRegistry<'_>) -> anyhow::Result<()>;

    fn clean_up(&mut self) -> anyhow::Result<()>;
}

/// The artifact flavors a package can be delivered as.
///
/// The variant order is the probe order: source artifacts take priority so a
/// freshly dropped source file overrides a stale compiled artifact of the
/// same package.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    Source,
    Compiled,
    Optimized,
}

impl ArtifactKind {
    pub const PRIORITY: [ArtifactKind; 3] = [
        ArtifactKind::Source,
        ArtifactKind::Compiled,
        ArtifactKind::Optimized,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Source => "src",
            ArtifactKind::Compiled => "cmod",
            ArtifactKind::Optimized => "omod",
        }
    }

    pub fn from_extension(extension: &str) -> Option<ArtifactKind> {
        Self::PRIORITY
            .into_iter()
            .find(|kind| kind.extension() == extension)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Record of one currently loaded package: identity, artifact provenance, the
/// live instance, and the set of packages that declared a dependency on it.
///
/// The instance reference is intentionally the only place the package object
/// is kept, so dropping the record drops the package.
pub(crate) struct PackageRecord {
    name: String,
    kind: Option<ArtifactKind>,
    digest: Option<Sha1Digest>,
    instance: Option<Box<dyn Package>>,
    dependents: BTreeSet<String>,
}

impl PackageRecord {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            digest: None,
            instance: None,
            dependents: BTreeSet::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Installs the live instance. Succeeds once; the instance is immutable
    /// after it is set, so a second call only reports a warning.
    pub(crate) fn set_instance(&mut self, instance: Box<dyn Package>) -> bool {
        if self.instance.is_some() {
            warn!("Should not override instance of package {}", self.name);
            return false;
        }
        self.instance = Some(instance);
        true
    }

    pub(crate) fn instance_mut(&mut self) -> Option<&mut (dyn Package + 'static)> {
        self.instance.as_deref_mut()
    }

    pub(crate) fn set_kind(&mut self, kind: ArtifactKind) {
        self.kind = Some(kind);
    }

    pub(crate) fn kind(&self) -> Option<ArtifactKind> {
        self.kind
    }

    pub(crate) fn set_digest(&mut self, digest: Sha1Digest) {
        self.digest = Some(digest);
    }

    #[allow(unused)]
    pub(crate) fn digest(&self) -> Option<Sha1Digest> {
        self.digest
    }

    /// Returns a snapshot; mutation goes through add/del, never through the
    /// returned collection.
    pub(crate) fn dependents(&self) -> Vec<String> {
        self.dependents.iter().cloned().collect()
    }

    pub(crate) fn add_dependent(&mut self, name: &str) {
        self.dependents.insert(name.to_string());
    }

    pub(crate) fn del_dependent(&mut self, name: &str) {
        assert!(
            self.dependents.remove(name),
            "{} should be present in dependents of {}",
            name,
            self.name
        );
    }
}
