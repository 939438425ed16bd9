//! Everything related to following a single, possibly not-yet-existing file.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::discovery::LogSource;
use crate::error::{Error, Result};
use crate::events::{FileEvents, FileWakeup};

/// Interval between attempts to open a missing file or read past its end.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// A chunk emitted by a tailer: one line, terminator included.
pub type Chunk = Vec<u8>;

#[derive(Clone, Debug)]
pub struct TailerConfig {
    pub retry_interval: Duration,
    /// Wake up early on filesystem events instead of only on the retry
    /// interval.
    pub watch: bool,
}

impl Default for TailerConfig {
    fn default() -> Self {
        TailerConfig {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            watch: true,
        }
    }
}

/// Lifecycle of a [`Tailer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TailerState {
    /// Constructed, not started.
    Idle,
    /// Waiting for the file to appear.
    Opening,
    /// Emitting lines as they are written.
    Streaming,
    /// Output closed. Terminal.
    Stopped,
}

/// Pieces handed to the background task on start.
struct Launch {
    output: mpsc::Sender<Chunk>,
    stop: oneshot::Receiver<()>,
    state: watch::Sender<TailerState>,
}

/// Follows one file the way `tail -F` would, from its first byte.
///
/// Every completed line is sent on the output channel, including a trailing
/// fragment that was only terminated across several polls. The output closes
/// once the tailer has stopped.
///
/// Dropping a `Tailer` acts as a stop request.
pub struct Tailer {
    source: LogSource,
    config: TailerConfig,
    events: Option<FileEvents>,
    launch: Option<Launch>,
    output: Option<mpsc::Receiver<Chunk>>,
    stop: Option<oneshot::Sender<()>>,
    state: watch::Receiver<TailerState>,
    task: Option<JoinHandle<Result<()>>>,
}

impl Tailer {
    pub fn new(source: LogSource, config: TailerConfig) -> Self {
        // Capacity one is the closest tokio gets to a rendezvous channel;
        // a slow consumer still holds the tailer back.
        let (output_tx, output_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(TailerState::Idle);

        Tailer {
            source,
            config,
            events: None,
            launch: Some(Launch {
                output: output_tx,
                stop: stop_rx,
                state: state_tx,
            }),
            output: Some(output_rx),
            stop: Some(stop_tx),
            state: state_rx,
            task: None,
        }
    }

    /// Wakes up through `events` instead of a watcher of its own. Has no
    /// effect unless [`TailerConfig::watch`] is set, or once started.
    pub fn with_events(mut self, events: FileEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn source(&self) -> &LogSource {
        &self.source
    }

    pub fn config(&self) -> &TailerConfig {
        &self.config
    }

    /// Returns `true` if a shared [`FileEvents`] was handed in.
    pub fn has_events(&self) -> bool {
        self.events.is_some()
    }

    pub fn state(&self) -> TailerState {
        *self.state.borrow()
    }

    /// A receiver following every state transition.
    pub fn state_changes(&self) -> watch::Receiver<TailerState> {
        self.state.clone()
    }

    /// Takes the receiving end of the output. Can only be done once.
    pub fn take_output(&mut self) -> Result<mpsc::Receiver<Chunk>> {
        self.output
            .take()
            .ok_or_else(|| Error::OutputTaken(self.source.path().to_path_buf()))
    }

    /// Spawns the tailing task on the current tokio runtime and returns
    /// immediately.
    pub fn start(&mut self) -> Result<()> {
        let launch = self
            .launch
            .take()
            .ok_or_else(|| Error::AlreadyStarted(self.source.path().to_path_buf()))?;

        let path = self.source.path().to_path_buf();
        let config = self.config.clone();
        let events = self.events.clone();
        self.task = Some(tokio::spawn(run(path, config, events, launch)));

        Ok(())
    }

    /// Requests the tailer to stop. Lines written since the last poll are
    /// still read, then a fragment that is still waiting for its terminator
    /// is flushed.
    ///
    /// May only be called once. Stopping a tailer that already finished on
    /// its own is fine.
    pub fn stop(&mut self) -> Result<()> {
        let stop = self
            .stop
            .take()
            .ok_or_else(|| Error::AlreadyStopped(self.source.path().to_path_buf()))?;

        // The task may have finished already; nobody is left to tell.
        let _ = stop.send(());

        Ok(())
    }

    /// Returns `true` once [`stop`](Tailer::stop) has been called.
    pub fn is_stopping(&self) -> bool {
        self.stop.is_none()
    }

    /// Waits for the background task to finish and returns its outcome.
    /// Resolves immediately if the tailer never started.
    pub async fn join(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|_| Error::TaskPanicked(self.source.path().to_path_buf()))?,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Tailer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Tailer")
            .field("source", &self.source)
            .field("state", &self.state())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

async fn run(
    path: PathBuf,
    config: TailerConfig,
    events: Option<FileEvents>,
    launch: Launch,
) -> Result<()> {
    let Launch {
        output,
        mut stop,
        state,
    } = launch;

    let result = tail(&path, &config, events.as_ref(), &output, &mut stop, &state).await;

    state.send_replace(TailerState::Stopped);
    match &result {
        Ok(()) => tracing::debug!(path = %path.display(), "tailer stopped"),
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "tailer failed"),
    }

    // `output` drops here, closing the channel for the consumer.
    result
}

async fn tail(
    path: &Path,
    config: &TailerConfig,
    shared: Option<&FileEvents>,
    output: &mpsc::Sender<Chunk>,
    stop: &mut oneshot::Receiver<()>,
    state: &watch::Sender<TailerState>,
) -> Result<()> {
    let fs_error = |source: io::Error| Error::Filesystem {
        path: path.to_path_buf(),
        source,
    };

    state.send_replace(TailerState::Opening);
    let mut events = register_events(path, config, shared);

    let file = loop {
        match File::open(path).await {
            Ok(file) => break file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(fs_error(e)),
        }

        tokio::select! {
            biased;
            // A dropped sender counts as a stop request too.
            _ = &mut *stop => return Ok(()),
            _ = pause(config.retry_interval, &mut events) => {}
        }
    };

    state.send_replace(TailerState::Streaming);
    tracing::debug!(path = %path.display(), "opened");
    if events.is_none() {
        events = register_events(path, config, shared);
    }

    let mut reader = BufReader::new(file);
    let mut fragment: Chunk = Vec::new();

    loop {
        if !forward_lines(&mut reader, &mut fragment, output)
            .await
            .map_err(fs_error)?
        {
            // Nobody is listening anymore.
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = &mut *stop => break,
            _ = pause(config.retry_interval, &mut events) => {}
        }
    }

    // Pick up what was appended since the last poll before flushing.
    let listening = forward_lines(&mut reader, &mut fragment, output)
        .await
        .map_err(fs_error)?;
    if listening && !fragment.is_empty() {
        fragment.push(b'\n');
        let _ = output.send(fragment).await;
    }

    Ok(())
}

/// Sends every complete line that can be read right now, keeping an
/// unterminated tail in `fragment`. Returns `false` once the receiver is
/// gone.
async fn forward_lines<R>(
    reader: &mut R,
    fragment: &mut Chunk,
    output: &mpsc::Sender<Chunk>,
) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let read = reader.read_until(b'\n', fragment).await?;

        if read == 0 || fragment.last() != Some(&b'\n') {
            // Caught up; whatever was read stays buffered until its
            // terminator shows up.
            return Ok(true);
        }

        if output.send(std::mem::take(fragment)).await.is_err() {
            return Ok(false);
        }
    }
}

fn register_events(
    path: &Path,
    config: &TailerConfig,
    shared: Option<&FileEvents>,
) -> Option<FileWakeup> {
    if !config.watch {
        return None;
    }

    let wakeup = match shared {
        Some(events) => events.subscribe(path),
        // The wakeup keeps its own watcher alive.
        None => FileEvents::new().and_then(|events| events.subscribe(path)),
    };

    match wakeup {
        Ok(wakeup) => Some(wakeup),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "falling back to polling");
            None
        }
    }
}

async fn pause(interval: Duration, events: &mut Option<FileWakeup>) {
    match events {
        Some(events) => {
            tokio::select! {
                _ = sleep(interval) => {}
                _ = events.changed() => {}
            }
        }
        None => sleep(interval).await,
    }
}
