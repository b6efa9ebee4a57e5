// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
    sync::Arc,
    thread,
};

use tracing::{debug, error, warn};

use crate::{context::Context, manager_thread::ManagerDispatcher, workers::WorkerKind};

/// Sink for the tokenized command lines read off the messenger pipe.
pub(crate) trait CommandSink: Send + 'static {
    /// Returns false when the consumer is gone and reading should stop.
    fn dispatch_line(&self, tokens: Vec<String>) -> bool;
}

impl CommandSink for ManagerDispatcher {
    fn dispatch_line(&self, tokens: Vec<String>) -> bool {
        ManagerDispatcher::dispatch_line(self, tokens)
    }
}

/// Listens on the named pipe for commands cast by other processes and feeds
/// them to the manager thread. It never touches manager state itself.
pub(crate) struct PackageMessenger;

#[allow(unused)]
pub(crate) struct MessengerHandle {
    join_handle: thread::JoinHandle<()>,
}

impl MessengerHandle {
    #[allow(unused)]
    pub(crate) fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl PackageMessenger {
    pub(crate) fn start<S: CommandSink>(
        pipe: PathBuf,
        sink: S,
        context: Arc<Context>,
    ) -> MessengerHandle {
        let join_handle = thread::Builder::new()
            .name("package-messenger".to_string())
            .spawn(move || Self::run(pipe, sink, context))
            .unwrap();
        MessengerHandle { join_handle }
    }

    fn run<S: CommandSink>(pipe: PathBuf, sink: S, context: Arc<Context>) {
        let _guard = context
            .workers
            .register("package-messenger", WorkerKind::Messenger);
        debug!("Started package messenger thread");

        loop {
            // Opening a FIFO read-only blocks until a writer shows up, and
            // reading it hits EOF when the writer closes. One open-read-close
            // cycle is one batch of commands.
            let file = match File::open(&pipe) {
                Ok(file) => file,
                Err(err) => {
                    error!("Could not open messenger pipe {}: {err}", pipe.display());
                    return;
                }
            };
            for line in BufReader::new(file).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("Could not read from messenger pipe: {err}");
                        break;
                    }
                };
                let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
                if tokens.is_empty() {
                    continue;
                }
                if !sink.dispatch_line(tokens) {
                    debug!("Package manager is gone, messenger exiting");
                    return;
                }
            }
        }
    }
}
