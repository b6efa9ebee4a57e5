// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operational configuration of the package manager embedded in the gateway
/// agent.
///
/// Read from the agent configuration file, table `[PKG_CFG]`. Both options are
/// required: without a package directory and a messenger pipe the manager has
/// nothing to manage and nobody to listen to, so a missing or malformed file
/// is fatal at bootstrap.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    /// Directory holding package artifacts, one file per package.
    pub pkg_path: PathBuf,

    /// Named pipe (FIFO) on which out-of-process senders write commands.
    pub pkg_msg_pipe: PathBuf,
}

/// The on-disk layout of the agent configuration file. Only the package
/// manager table is modeled here; other agent subsystems own their own
/// sections.
#[derive(Debug, Deserialize, Serialize)]
struct ConfigFile {
    #[serde(rename = "PKG_CFG")]
    pkg_cfg: Parameters,
}

impl Parameters {
    /// Reads the `[PKG_CFG]` table from the TOML configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Parameters, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile =
            toml::from_str(&contents).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(file.pkg_cfg)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not open configuration file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse configuration file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
