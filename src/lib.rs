//! Live, multiplexed tailing of the log files of a build.
//!
//! A build keeps its console log at `<job>/builds/<number>/log`. Matrix
//! (multi-configuration) builds additionally keep one log per
//! sub-configuration below `<job>/configurations/axis-<name>/<value>/...`,
//! nested once per axis. None of these files need to exist yet when tailing
//! starts.
//!
//! ## Example
//!
//! ```no_run
//! use futures_util::stream;
//! use tailbuild::{discover, Multiplexer, PlainFormatter, Tailer, TailerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tailbuild::Error> {
//!     // Latest build of the job, including every sub-configuration.
//!     let discovery = discover("/var/lib/jenkins/jobs/app", None, true)?;
//!
//!     let mut mux = Multiplexer::new(PlainFormatter::new(), tokio::io::stdout());
//!     for source in discovery.sources {
//!         mux.add(Tailer::new(source, TailerConfig::default()))?;
//!     }
//!
//!     // Stop everything on the first interrupt, then drain.
//!     let interrupts = stream::once(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     });
//!     mux.run(interrupts).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! Files are read from their first byte, not from their end at the time
//! tailing starts. Lines of different files are interleaved in arrival order
//! only.

pub mod axes;
pub mod discovery;
mod error;
mod events;
pub mod format;
pub mod mux;
pub mod pattern;
mod tailer;

pub use discovery::{discover, Discovery, LogSource};
pub use error::{Error, Result};
pub use events::{FileEvents, FileWakeup};
pub use format::{ColorFormatter, Formatter, PlainFormatter};
pub use mux::{FailurePolicy, Multiplexer, MuxReport, TailerId, TailerMessage};
pub use tailer::{Chunk, Tailer, TailerConfig, TailerState, DEFAULT_RETRY_INTERVAL};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
