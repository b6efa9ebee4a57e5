// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// One control command, as accepted from the messenger pipe or from the
/// typed dispatcher API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Load(String),
    Unload(String),
    /// Reserved in the command grammar; accepted, currently a no-op.
    Delete(String),
    Reload(String),
    Update(String),
    List(ListTarget),
    Stat(StatTarget),
    /// Reserved in the command grammar; accepted, currently a no-op.
    Check,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListTarget {
    Packages,
    Resources,
    Threads,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StatTarget {
    Metrics,
    CollectionThreads,
    Threads,
}

impl Command {
    /// Parses one whitespace-tokenized pipe line. The messenger already
    /// discards empty lines, so `tokens` is non-empty.
    pub(crate) fn parse(tokens: &[String]) -> Result<Command, CommandParseError> {
        let command = tokens[0].as_str();
        match command {
            "load" | "unload" | "delete" | "reload" | "update" => {
                if tokens.len() != 2 {
                    return Err(CommandParseError::InvalidFormat {
                        command: command.to_string(),
                    });
                }
                let name = tokens[1].clone();
                Ok(match command {
                    "load" => Command::Load(name),
                    "unload" => Command::Unload(name),
                    "delete" => Command::Delete(name),
                    "reload" => Command::Reload(name),
                    _ => Command::Update(name),
                })
            }
            "list" => {
                if tokens.len() != 2 {
                    return Err(CommandParseError::InvalidFormat {
                        command: command.to_string(),
                    });
                }
                match tokens[1].as_str() {
                    "packages" | "pkg" => Ok(Command::List(ListTarget::Packages)),
                    "resources" | "res" => Ok(Command::List(ListTarget::Resources)),
                    "threads" | "th" => Ok(Command::List(ListTarget::Threads)),
                    other => Err(CommandParseError::UnsupportedList {
                        parameter: other.to_string(),
                    }),
                }
            }
            "stat" => {
                if tokens.len() != 2 {
                    return Err(CommandParseError::InvalidFormat {
                        command: command.to_string(),
                    });
                }
                match tokens[1].as_str() {
                    "metrics" | "met" => Ok(Command::Stat(StatTarget::Metrics)),
                    "collection_threads" | "col" => {
                        Ok(Command::Stat(StatTarget::CollectionThreads))
                    }
                    "threads" | "th" => Ok(Command::Stat(StatTarget::Threads)),
                    other => Err(CommandParseError::UnsupportedStat {
                        parameter: other.to_string(),
                    }),
                }
            }
            "check" => {
                if tokens.len() != 1 {
                    return Err(CommandParseError::InvalidFormat {
                        command: command.to_string(),
                    });
                }
                Ok(Command::Check)
            }
            other => Err(CommandParseError::UnsupportedCommand {
                command: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum CommandParseError {
    #[error("Invalid format of command: {command}")]
    InvalidFormat { command: String },

    #[error("Unsupported command is dropped: {command}")]
    UnsupportedCommand { command: String },

    #[error("Unsupported list: {parameter}")]
    UnsupportedList { parameter: String },

    #[error("Unsupported stat: {parameter}")]
    UnsupportedStat { parameter: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_package_commands() {
        assert_eq!(
            Command::parse(&tokens("load edge_systems")).unwrap(),
            Command::Load("edge_systems".to_string())
        );
        assert_eq!(
            Command::parse(&tokens("unload edge_systems")).unwrap(),
            Command::Unload("edge_systems".to_string())
        );
        assert_eq!(
            Command::parse(&tokens("reload edge_systems")).unwrap(),
            Command::Reload("edge_systems".to_string())
        );
        assert_eq!(
            Command::parse(&tokens("update edge_systems")).unwrap(),
            Command::Update("edge_systems".to_string())
        );
        assert_eq!(
            Command::parse(&tokens("delete edge_systems")).unwrap(),
            Command::Delete("edge_systems".to_string())
        );
        assert_eq!(Command::parse(&tokens("check")).unwrap(), Command::Check);
    }

    #[test]
    fn parses_list_and_stat_with_abbreviations() {
        assert_eq!(
            Command::parse(&tokens("list packages")).unwrap(),
            Command::List(ListTarget::Packages)
        );
        assert_eq!(
            Command::parse(&tokens("list pkg")).unwrap(),
            Command::List(ListTarget::Packages)
        );
        assert_eq!(
            Command::parse(&tokens("list res")).unwrap(),
            Command::List(ListTarget::Resources)
        );
        assert_eq!(
            Command::parse(&tokens("list th")).unwrap(),
            Command::List(ListTarget::Threads)
        );
        assert_eq!(
            Command::parse(&tokens("stat met")).unwrap(),
            Command::Stat(StatTarget::Metrics)
        );
        assert_eq!(
            Command::parse(&tokens("stat col")).unwrap(),
            Command::Stat(StatTarget::CollectionThreads)
        );
        assert_eq!(
            Command::parse(&tokens("stat threads")).unwrap(),
            Command::Stat(StatTarget::Threads)
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            Command::parse(&tokens("load")),
            Err(CommandParseError::InvalidFormat { .. })
        ));
        assert!(matches!(
            Command::parse(&tokens("load a b")),
            Err(CommandParseError::InvalidFormat { .. })
        ));
        assert!(matches!(
            Command::parse(&tokens("check now")),
            Err(CommandParseError::InvalidFormat { .. })
        ));
        assert!(matches!(
            Command::parse(&tokens("list everything")),
            Err(CommandParseError::UnsupportedList { .. })
        ));
        assert!(matches!(
            Command::parse(&tokens("stat everything")),
            Err(CommandParseError::UnsupportedStat { .. })
        ));
        assert!(matches!(
            Command::parse(&tokens("destroy all")),
            Err(CommandParseError::UnsupportedCommand { .. })
        ));
    }
}
