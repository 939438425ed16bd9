//! Locating every log file that belongs to a build.
//!
//! The layout is the conventional one of a build server job directory:
//!
//! ```text
//! <root>/builds/<number>/log
//! <root>/configurations/axis-<name>/<value>/builds/<number>/log
//! ```
//!
//! where the `configurations` tree may nest several axes deep.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::axes;
use crate::error::{Error, Result};

const BUILDS_DIR: &str = "builds";
const CONFIGURATIONS_DIR: &str = "configurations";
const LOG_FILE: &str = "log";

/// A single file to be tailed.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LogSource {
    path: PathBuf,
}

impl LogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogSource { path: path.into() }
    }

    /// Returns a reference to the path of the file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Result of a [`discover`] call.
#[derive(Debug)]
pub struct Discovery {
    /// The resolved build number.
    pub build: u64,
    /// The top-level build log first, then sub-configuration logs in axis
    /// exploration order.
    pub sources: Vec<LogSource>,
    /// Non-fatal errors hit while exploring sub-configurations.
    pub errors: Vec<Error>,
}

impl Discovery {
    /// Returns `true` if nothing went wrong during exploration.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Path of the log of build `build` under `project_dir`.
pub fn build_log_path(project_dir: impl AsRef<Path>, build: u64) -> PathBuf {
    project_dir
        .as_ref()
        .join(BUILDS_DIR)
        .join(build.to_string())
        .join(LOG_FILE)
}

/// Finds the logs of a build and, if `discover_axes` is set, of each of its
/// matrix sub-configurations.
///
/// A `build` of `None` (or zero) resolves to the most recently modified
/// numeric entry under `<project_dir>/builds`. Failing to resolve is fatal
/// and returned as `Err`; problems below `configurations` only end up in
/// [`Discovery::errors`].
pub fn discover(
    project_dir: impl AsRef<Path>,
    build: Option<u64>,
    discover_axes: bool,
) -> Result<Discovery> {
    let project_dir = project_dir.as_ref();

    let build = match build.filter(|n| *n > 0) {
        Some(build) => build,
        None => latest_build(project_dir)?,
    };

    let mut discovery = Discovery {
        build,
        sources: vec![LogSource::new(build_log_path(project_dir, build))],
        errors: Vec::new(),
    };

    if discover_axes {
        let scan = axes::explore(project_dir.join(CONFIGURATIONS_DIR));
        discovery.errors.extend(scan.errors);

        // Sub-configurations are not searched for further axes; the explorer
        // already returned every nesting level.
        for dir in scan.dirs {
            match discover(&dir, Some(build), false) {
                Ok(sub) => {
                    discovery.sources.extend(sub.sources);
                    discovery.errors.extend(sub.errors);
                }
                Err(e) => discovery.errors.push(e),
            }
        }
    }

    tracing::debug!(
        project = %project_dir.display(),
        build,
        sources = discovery.sources.len(),
        errors = discovery.errors.len(),
        "discovered logs"
    );

    Ok(discovery)
}

/// The numerically named entry of `<project_dir>/builds` with the latest
/// modification time.
pub fn latest_build(project_dir: impl AsRef<Path>) -> Result<u64> {
    let project_dir = project_dir.as_ref();
    let builds_dir = project_dir.join(BUILDS_DIR);

    let fs_error = |source: io::Error| Error::Filesystem {
        path: builds_dir.clone(),
        source,
    };

    let mut latest: Option<(SystemTime, u64)> = None;
    for entry in fs::read_dir(&builds_dir).map_err(fs_error)? {
        let entry = entry.map_err(fs_error)?;

        let number = match entry.file_name().to_str().and_then(|name| name.parse::<u64>().ok()) {
            Some(number) => number,
            None => continue,
        };

        // Not following symlinks, so aliases such as `lastSuccessfulBuild`
        // pointing at a numbered build don't steal its timestamp.
        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .map_err(fs_error)?;

        // Ties go to the higher build number.
        if latest.map_or(true, |best| (modified, number) > best) {
            latest = Some((modified, number));
        }
    }

    latest
        .map(|(_, number)| number)
        .ok_or_else(|| Error::NoLogsFound(project_dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_log_path() {
        assert_eq!(
            build_log_path("/jobs/app", 42),
            PathBuf::from("/jobs/app/builds/42/log")
        );
    }

    #[test]
    fn test_latest_build_missing_dir() {
        let tmp_dir = TempDir::new().unwrap();

        let err = latest_build(tmp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::Filesystem { .. }), "{:?}", err);
    }

    #[test]
    fn test_latest_build_no_numeric_entries() {
        let tmp_dir = TempDir::new().unwrap();
        let builds = tmp_dir.path().join(BUILDS_DIR);
        fs::create_dir_all(builds.join("lastSuccessfulBuild")).unwrap();
        fs::create_dir_all(builds.join("-3")).unwrap();
        fs::write(builds.join("legacyIds"), "").unwrap();

        let err = latest_build(tmp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::NoLogsFound(_)), "{:?}", err);
    }

    #[test]
    fn test_discover_explicit_build_skips_resolution() {
        let tmp_dir = TempDir::new().unwrap();

        let discovery = discover(tmp_dir.path(), Some(9), false).unwrap();

        assert_eq!(discovery.build, 9);
        assert_eq!(
            discovery.sources,
            vec![LogSource::new(tmp_dir.path().join("builds/9/log"))]
        );
        assert!(discovery.is_clean());
    }

    #[test]
    fn test_log_source_display() {
        let source = LogSource::new("/jobs/app/builds/1/log");
        assert_eq!(source.to_string(), "/jobs/app/builds/1/log");
        assert_eq!(source.path(), Path::new("/jobs/app/builds/1/log"));
    }
}
