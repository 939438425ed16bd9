//! Errors surfaced by discovery, tailing and multiplexing.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No numerically named build was found under `<dir>/builds`.
    #[error("no log files in supplied directory {}", .0.display())]
    NoLogsFound(PathBuf),
    /// A sub-tree below an axis root could not be explored. Never fatal on
    /// its own; collected alongside whatever was discovered.
    #[error("failed to explore {}: {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// An open or read failed for a reason other than the file not existing
    /// yet.
    #[error("failed to read {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tailer for {} was already started", .0.display())]
    AlreadyStarted(PathBuf),
    #[error("tailer for {} was already stopped", .0.display())]
    AlreadyStopped(PathBuf),
    #[error("output of tailer for {} was already taken", .0.display())]
    OutputTaken(PathBuf),
    #[error("tailer task for {} panicked", .0.display())]
    TaskPanicked(PathBuf),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl Error {
    /// Returns `true` for misuse of the `Tailer` lifecycle API.
    pub fn is_caller_misuse(&self) -> bool {
        matches!(
            self,
            Error::AlreadyStarted(_) | Error::AlreadyStopped(_) | Error::OutputTaken(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
