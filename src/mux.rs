//! Fan-in of many tailers into one output sink, and their coordinated
//! shutdown.

use std::cell::OnceCell;
use std::collections::HashMap;

use futures_util::pin_mut;
use futures_util::stream::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::discovery::LogSource;
use crate::error::{Error, Result};
use crate::events::FileEvents;
use crate::format::Formatter;
use crate::tailer::{Chunk, Tailer};

/// Identity of a tailer within one [`Multiplexer`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TailerId(usize);

/// One chunk relayed from a tailer, or `None` once that tailer has finished.
#[derive(Debug)]
pub struct TailerMessage {
    pub id: TailerId,
    pub chunk: Option<Chunk>,
}

/// What to do when a tailer fails with an unexpected filesystem error.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    /// Stop every other tailer and return the error.
    #[default]
    Abort,
    /// Record the failure and keep draining the rest.
    KeepGoing,
}

/// Summary of a completed [`Multiplexer::run`].
#[derive(Debug, Default)]
pub struct MuxReport {
    /// Number of lines written to the sink.
    pub lines: u64,
    /// Failures tolerated under [`FailurePolicy::KeepGoing`].
    pub failures: Vec<(LogSource, Error)>,
}

struct Tracked {
    tailer: Tailer,
    label: String,
}

/// Owns a set of tailers and writes everything they emit, rendered by a
/// [`Formatter`], to a sink.
///
/// Lines of one tailer keep their order; lines of different tailers are
/// interleaved in arrival order. Tailers that watch for filesystem events
/// share a single watcher.
pub struct Multiplexer<F, W> {
    tailers: HashMap<TailerId, Tracked>,
    next_id: usize,
    /// Created on the first watching tailer; `None` inside if that failed.
    events: OnceCell<Option<FileEvents>>,
    formatter: F,
    sink: W,
    policy: FailurePolicy,
    tx: mpsc::Sender<TailerMessage>,
    rx: mpsc::Receiver<TailerMessage>,
}

impl<F, W> Multiplexer<F, W>
where
    F: Formatter,
    W: AsyncWrite + Unpin,
{
    pub fn new(formatter: F, sink: W) -> Self {
        let (tx, rx) = mpsc::channel(1);

        Multiplexer {
            tailers: HashMap::new(),
            next_id: 0,
            events: OnceCell::new(),
            formatter,
            sink,
            policy: FailurePolicy::default(),
            tx,
            rx,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of tailers that have not reported completion yet.
    pub fn len(&self) -> usize {
        self.tailers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tailers.is_empty()
    }

    /// Tracks `tailer`, relays its output and starts it.
    ///
    /// The tailer must be fresh: neither started nor with its output taken.
    pub fn add(&mut self, mut tailer: Tailer) -> Result<TailerId> {
        if tailer.config().watch && !tailer.has_events() {
            if let Some(events) = self.shared_events() {
                tailer = tailer.with_events(events.clone());
            }
        }

        let output = tailer.take_output()?;
        tailer.start()?;

        let id = TailerId(self.next_id);
        self.next_id += 1;

        tokio::spawn(relay(id, output, self.tx.clone()));

        let label = tailer.source().to_string();
        tracing::debug!(source = %label, "tailing");
        self.tailers.insert(id, Tracked { tailer, label });

        Ok(id)
    }

    /// Writes lines until every tailer has finished.
    ///
    /// Each item of `signals` asks all tailers to stop; the loop then keeps
    /// draining until the last of them confirms, so no final fragment is lost.
    pub async fn run<S>(&mut self, signals: S) -> Result<MuxReport>
    where
        S: Stream<Item = ()>,
    {
        let signals = signals.fuse();
        pin_mut!(signals);

        let mut report = MuxReport::default();

        while !self.tailers.is_empty() {
            tokio::select! {
                Some(()) = signals.next() => self.stop_all(),
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg, &mut report).await?,
                    // We hold a sender ourselves.
                    None => unreachable!("multiplexed channel closed"),
                },
            }
        }

        self.sink.flush().await?;
        Ok(report)
    }

    /// The watcher shared by the tailers added so far, if any of them watch.
    pub fn shared_events(&self) -> Option<&FileEvents> {
        self.events
            .get_or_init(|| match FileEvents::new() {
                Ok(events) => Some(events),
                Err(e) => {
                    tracing::debug!(error = %e, "no filesystem watcher, polling only");
                    None
                }
            })
            .as_ref()
    }

    /// Releases the sink, e.g. to inspect what was written.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Stops every tracked tailer that hasn't been asked to stop yet.
    fn stop_all(&mut self) {
        let mut stopped = 0;
        for tracked in self.tailers.values_mut() {
            if tracked.tailer.is_stopping() {
                continue;
            }
            if let Err(e) = tracked.tailer.stop() {
                tracing::warn!(source = %tracked.label, error = %e, "failed to stop tailer");
            }
            stopped += 1;
        }
        tracing::debug!(stopped, remaining = self.tailers.len(), "shutdown requested");
    }

    async fn handle(&mut self, msg: TailerMessage, report: &mut MuxReport) -> Result<()> {
        let TailerMessage { id, chunk } = msg;

        match chunk {
            Some(chunk) => {
                let tracked = match self.tailers.get(&id) {
                    Some(tracked) => tracked,
                    None => return Ok(()),
                };
                let line = self.formatter.format(&tracked.label, &chunk);
                self.sink.write_all(line.as_bytes()).await?;
                report.lines += 1;
            }
            None => {
                let mut tracked = match self.tailers.remove(&id) {
                    Some(tracked) => tracked,
                    None => return Ok(()),
                };

                tracing::debug!(source = %tracked.label, remaining = self.tailers.len(), "tailer finished");

                if let Err(e) = tracked.tailer.join().await {
                    match self.policy {
                        FailurePolicy::Abort => {
                            self.stop_all();
                            return Err(e);
                        }
                        FailurePolicy::KeepGoing => {
                            tracing::error!(source = %tracked.label, error = %e, "tailer failed");
                            report.failures.push((tracked.tailer.source().clone(), e));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Forwards everything `output` yields, then a completion marker.
async fn relay(id: TailerId, mut output: mpsc::Receiver<Chunk>, mux: mpsc::Sender<TailerMessage>) {
    while let Some(chunk) = output.recv().await {
        let msg = TailerMessage {
            id,
            chunk: Some(chunk),
        };
        if mux.send(msg).await.is_err() {
            return;
        }
    }

    let _ = mux.send(TailerMessage { id, chunk: None }).await;
}
