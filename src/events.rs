//! Filesystem event wakeups for tailed files.
//!
//! Polling stays the source of truth for tailing; these events only let a
//! tailer re-poll before its retry interval elapses.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::Watcher;
use tokio::sync::mpsc;

type Subscribers = HashMap<PathBuf, Vec<mpsc::Sender<()>>>;

/// A single notify watcher shared by any number of tailed files.
///
/// Internally, `FileEvents` contains a [`notify::Watcher`] whose callback
/// runs on a notify-owned thread. Each file gets its own [`FileWakeup`];
/// parent directories are watched once, however many files live in them.
/// Cloning is cheap and shares the same watcher.
///
/// [`notify::Watcher`]: ../notify/trait.Watcher.html
#[derive(Clone)]
pub struct FileEvents {
    shared: Arc<Shared>,
}

struct Shared {
    watcher: Mutex<Watched>,
    subscribers: Arc<Mutex<Subscribers>>,
}

struct Watched {
    inner: notify::RecommendedWatcher,
    watched_directories: HashMap<PathBuf, usize>,
}

impl Debug for FileEvents {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FileEvents")
            .field("watched_directories", &self.watched().watched_directories)
            .finish()
    }
}

impl FileEvents {
    /// Starts the underlying watcher. Nothing is watched until
    /// [`subscribe`](FileEvents::subscribe) is called.
    pub fn new() -> Result<Self, notify::Error> {
        let subscribers: Arc<Mutex<Subscribers>> = Arc::default();
        let notified = Arc::clone(&subscribers);

        let inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(_) => return,
            };
            let subscribers = notified.lock().unwrap_or_else(PoisonError::into_inner);

            // A full channel already holds a pending wakeup.
            if event.paths.is_empty() {
                // Rescans carry no paths; everybody re-polls.
                for tx in subscribers.values().flatten() {
                    let _ = tx.try_send(());
                }
            } else {
                for tx in event.paths.iter().filter_map(|p| subscribers.get(p)).flatten() {
                    let _ = tx.try_send(());
                }
            }
        })?;

        Ok(FileEvents {
            shared: Arc::new(Shared {
                watcher: Mutex::new(Watched {
                    inner,
                    watched_directories: HashMap::new(),
                }),
                subscribers,
            }),
        })
    }

    /// Registers interest in `path`, which does not need to exist yet. Its
    /// parent directory does.
    pub fn subscribe(&self, path: impl Into<PathBuf>) -> Result<FileWakeup, notify::Error> {
        let target = absolutify(path).map_err(notify::Error::io)?;
        let parent = target
            .parent()
            .ok_or_else(|| notify::Error::generic("File needs a parent directory"))?
            .to_path_buf();

        self.add_directory(&parent)?;

        let (tx, rx) = mpsc::channel(1);
        self.subscribers()
            .entry(target.clone())
            .or_default()
            .push(tx);

        Ok(FileWakeup {
            events: self.clone(),
            target,
            parent,
            wakeups: rx,
        })
    }

    /// Number of directories currently under watch.
    pub fn watched_directories(&self) -> usize {
        self.watched().watched_directories.len()
    }

    fn add_directory(&self, dir: &Path) -> Result<(), notify::Error> {
        let mut watched = self.watched();

        if let Some(count) = watched.watched_directories.get_mut(dir) {
            *count += 1;
            return Ok(());
        }

        watched.inner.watch(dir, notify::RecursiveMode::NonRecursive)?;
        watched.watched_directories.insert(dir.to_path_buf(), 1);

        Ok(())
    }

    fn remove_directory(&self, dir: &Path) {
        let mut watched = self.watched();

        match watched.watched_directories.get_mut(dir) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                // Remove from map first in case `unwatch` fails.
                watched.watched_directories.remove(dir);
                if let Err(e) = watched.inner.unwatch(dir) {
                    tracing::debug!(path = %dir.display(), error = %e, "failed to unwatch");
                }
            }
            None => {}
        }
    }

    // The watcher and the subscribers are never locked at the same time; the
    // notify thread takes the subscribers lock from inside the callback.
    fn watched(&self) -> MutexGuard<'_, Watched> {
        self.shared
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wakeups for one file of a [`FileEvents`]. Dropping it releases the watch
/// on the parent directory once no other file there needs it.
pub struct FileWakeup {
    events: FileEvents,
    target: PathBuf,
    parent: PathBuf,
    wakeups: mpsc::Receiver<()>,
}

impl Debug for FileWakeup {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FileWakeup")
            .field("target", &self.target)
            .finish()
    }
}

impl FileWakeup {
    /// The absolutized path being watched for.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Resolves once an event for the file has been seen since the last call.
    pub async fn changed(&mut self) {
        if self.wakeups.recv().await.is_none() {
            // Unsubscribed; never wake up early again.
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for FileWakeup {
    fn drop(&mut self) {
        self.wakeups.close();

        {
            let mut subscribers = self.events.subscribers();
            if let Some(senders) = subscribers.get_mut(&self.target) {
                senders.retain(|tx| !tx.is_closed());
                if senders.is_empty() {
                    subscribers.remove(&self.target);
                }
            }
        }

        self.events.remove_directory(&self.parent);
    }
}

/// Makes `path` absolute with a canonical parent directory, so that it
/// compares equal to the paths notify reports.
fn absolutify(path: impl Into<PathBuf>) -> io::Result<PathBuf> {
    let path = path.into();

    let dir = match path.parent() {
        None => std::env::current_dir()?,
        Some(parent) if parent == Path::new("") => std::env::current_dir()?,
        Some(parent) => parent.to_path_buf(),
    };
    let filename = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?
        .to_os_string();

    let dir = dir.canonicalize().unwrap_or(dir);

    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::{absolutify, FileEvents};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const TIMEOUT_5_SEC: Duration = Duration::from_secs(5);

    #[test]
    fn test_absolutify_relative() {
        let path = absolutify("some.log").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("some.log"));
    }

    #[test]
    fn test_absolutify_bad_filename() {
        let tmp_dir = TempDir::new().unwrap();
        assert!(absolutify(tmp_dir.path().join("..")).is_err());
    }

    #[test]
    fn test_missing_parent() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("missing").join("log");

        let events = FileEvents::new().unwrap();
        assert!(events.subscribe(path).is_err());
        assert_eq!(events.watched_directories(), 0);
    }

    #[tokio::test]
    async fn test_wakeup_on_create() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("log");

        let events = FileEvents::new().unwrap();
        let mut wakeup = events.subscribe(&path).unwrap();
        assert!(wakeup.target().is_absolute());

        std::fs::write(&path, b"first\n").unwrap();

        timeout(TIMEOUT_5_SEC, wakeup.changed())
            .await
            .expect("no wakeup for created file");
    }

    #[tokio::test]
    async fn test_one_watcher_for_many_files() {
        let tmp_dir = TempDir::new().unwrap();
        let nested = tmp_dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();

        let events = FileEvents::new().unwrap();
        let mut first = events.subscribe(tmp_dir.path().join("first.log")).unwrap();
        let mut second = events.subscribe(tmp_dir.path().join("second.log")).unwrap();
        let mut third = events.clone().subscribe(nested.join("third.log")).unwrap();

        // One watch per directory, not per file.
        assert_eq!(events.watched_directories(), 2);

        std::fs::write(tmp_dir.path().join("first.log"), b"1\n").unwrap();
        std::fs::write(tmp_dir.path().join("second.log"), b"2\n").unwrap();
        std::fs::write(nested.join("third.log"), b"3\n").unwrap();

        for wakeup in [&mut first, &mut second, &mut third] {
            timeout(TIMEOUT_5_SEC, wakeup.changed())
                .await
                .expect("no wakeup through the shared watcher");
        }

        drop(third);
        assert_eq!(events.watched_directories(), 1);
        drop(first);
        assert_eq!(events.watched_directories(), 1);
        drop(second);
        assert_eq!(events.watched_directories(), 0);
    }
}
