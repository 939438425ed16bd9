//! Exploration of matrix "axis" directories.
//!
//! A multi-configuration build lays its sub-builds out as
//! `<root>/axis-<name>/<value>`, nested once per axis. The number of axes is
//! not known up front, so levels are explored one at a time until a level
//! comes back empty or [`MAX_AXIS_DEPTH`] is reached.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::MatchOptions;

use crate::error::Error;
use crate::pattern::escape;

/// Hard bound on the number of nested axis levels explored.
pub const MAX_AXIS_DEPTH: usize = 10;

const AXIS_PREFIX: &str = "axis-";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Directories found below an axis root, plus the non-fatal errors hit while
/// looking for them.
#[derive(Debug, Default)]
pub struct AxisScan {
    /// Matched `<value>` directories, shallowest level first and sorted within
    /// each level.
    pub dirs: Vec<PathBuf>,
    pub errors: Vec<Error>,
}

/// Enumerates every `axis-*/*` directory below `base`, at every depth from 1
/// up to [`MAX_AXIS_DEPTH`].
///
/// A missing `base` yields an empty scan. Any other failure to read `base`,
/// or a directory below it, is collected and exploration carries on with
/// whatever could be read. Each unreadable directory is reported once.
pub fn explore(base: impl AsRef<Path>) -> AxisScan {
    let base = base.as_ref();
    let mut scan = AxisScan::default();

    // glob quietly skips a root it can't list, e.g. a regular file.
    match fs::read_dir(base) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return scan,
        Err(e) => {
            scan.errors.push(Error::Discovery {
                path: base.to_path_buf(),
                source: e,
            });
            return scan;
        }
    }

    let mut reported = HashSet::new();

    for depth in 1..=MAX_AXIS_DEPTH {
        let pattern = match level_pattern(base, depth) {
            Ok(pattern) => pattern,
            Err(e) => {
                scan.errors.push(e);
                break;
            }
        };

        let matches = match glob::glob_with(&pattern, MATCH_OPTIONS) {
            Ok(matches) => matches,
            Err(e) => {
                scan.errors.push(invalid_pattern(base, e.to_string()));
                break;
            }
        };

        let mut level = Vec::new();
        for entry in matches {
            match entry {
                // A sub-build root is always a directory.
                Ok(path) if path.is_dir() => level.push(path),
                Ok(_) => {}
                Err(e) => {
                    // Every deeper level walks through the same directory
                    // again.
                    if reported.insert(e.path().to_path_buf()) {
                        tracing::debug!(path = %e.path().display(), error = %e.error(), "unreadable axis directory");
                        scan.errors.push(Error::Discovery {
                            path: e.path().to_path_buf(),
                            source: e.into_error(),
                        });
                    }
                }
            }
        }

        if level.is_empty() {
            tracing::trace!(base = %base.display(), depth, "no axes at depth");
            break;
        }

        level.sort();
        tracing::debug!(base = %base.display(), depth, found = level.len(), "axis level");
        scan.dirs.extend(level);
    }

    scan
}

/// Builds `<base>/axis-*/*` with the pair repeated `depth` times, `base`
/// matched literally.
fn level_pattern(base: &Path, depth: usize) -> Result<String, Error> {
    let base_str = base
        .to_str()
        .ok_or_else(|| invalid_pattern(base, "path is not valid UTF-8".to_string()))?;

    let mut raw = PathBuf::from(escape(base_str));
    for _ in 0..depth {
        raw.push(format!("{}*", AXIS_PREFIX));
        raw.push("*");
    }

    raw.into_os_string()
        .into_string()
        .map_err(|_| invalid_pattern(base, "path is not valid UTF-8".to_string()))
}

fn invalid_pattern(base: &Path, message: String) -> Error {
    Error::Discovery {
        path: base.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, message),
    }
}
