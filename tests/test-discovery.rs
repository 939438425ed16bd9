use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use tailbuild::discovery::latest_build;
use tailbuild::{discover, Error, LogSource};
use tempfile::tempdir;

fn touch_build(project: &Path, build: u64, age_secs: u64) {
    let dir = project.join("builds").join(build.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("log"), b"").unwrap();

    let modified = SystemTime::now() - Duration::from_secs(age_secs);
    File::open(&dir).unwrap().set_modified(modified).unwrap();
}

#[test]
pub fn test_latest_build_by_mtime() {
    let project = tempdir().unwrap();

    // Modification times ordered 5 > 7 > 3.
    touch_build(project.path(), 3, 300);
    touch_build(project.path(), 7, 200);
    touch_build(project.path(), 5, 100);

    assert_eq!(latest_build(project.path()).unwrap(), 5);

    let discovery = discover(project.path(), None, false).unwrap();
    assert_eq!(discovery.build, 5);
    assert_eq!(
        discovery.sources,
        vec![LogSource::new(project.path().join("builds/5/log"))]
    );

    // Zero means "latest" too.
    let discovery = discover(project.path(), Some(0), false).unwrap();
    assert_eq!(discovery.build, 5);
}

#[test]
pub fn test_no_builds_is_fatal() {
    let project = tempdir().unwrap();
    fs::create_dir_all(project.path().join("builds")).unwrap();

    let err = discover(project.path(), None, true).unwrap_err();
    assert!(matches!(err, Error::NoLogsFound(_)), "{:?}", err);
}

#[test]
pub fn test_no_axes_single_source() {
    let project = tempdir().unwrap();
    touch_build(project.path(), 12, 0);

    let discovery = discover(project.path(), None, true).unwrap();

    assert!(discovery.is_clean());
    assert_eq!(
        discovery.sources,
        vec![LogSource::new(project.path().join("builds/12/log"))]
    );
}

#[test]
pub fn test_matrix_sources_in_axis_order() {
    let project = tempdir().unwrap();
    let root = project.path();
    touch_build(root, 4, 0);

    let configurations = root.join("configurations");
    for dir in &["axis-jdk/11", "axis-jdk/8", "axis-jdk/8/axis-os/linux"] {
        fs::create_dir_all(configurations.join(dir)).unwrap();
    }
    // Sub-configurations of an older layout without builds/ still get a
    // source; the file may appear later.
    fs::create_dir_all(configurations.join("axis-jdk/11/builds/4")).unwrap();

    let discovery = discover(root, Some(4), true).unwrap();

    assert!(discovery.is_clean());
    let expected: Vec<LogSource> = [
        root.join("builds/4/log"),
        configurations.join("axis-jdk/11/builds/4/log"),
        configurations.join("axis-jdk/8/builds/4/log"),
        configurations.join("axis-jdk/8/axis-os/linux/builds/4/log"),
    ]
    .into_iter()
    .map(LogSource::new)
    .collect();
    assert_eq!(discovery.sources, expected);
}

#[test]
pub fn test_disabled_axes_skip_configurations() {
    let project = tempdir().unwrap();
    let root = project.path();
    fs::create_dir_all(root.join("configurations/axis-jdk/8")).unwrap();

    let discovery = discover(root, Some(2), false).unwrap();

    assert_eq!(discovery.sources.len(), 1);
}

#[test]
pub fn test_configurations_file_is_not_fatal() {
    let project = tempdir().unwrap();
    let root = project.path();
    fs::write(root.join("configurations"), b"").unwrap();

    let discovery = discover(root, Some(3), true).unwrap();

    assert_eq!(
        discovery.sources,
        vec![LogSource::new(root.join("builds/3/log"))]
    );
    assert_eq!(discovery.errors.len(), 1);
    assert!(
        matches!(&discovery.errors[0], Error::Discovery { path, .. } if path == &root.join("configurations")),
        "{:?}",
        discovery.errors
    );
}

#[cfg(unix)]
#[test]
pub fn test_unreadable_axis_keeps_siblings() {
    use std::os::unix::fs::PermissionsExt;

    let project = tempdir().unwrap();
    let root = project.path();
    let configurations = root.join("configurations");
    fs::create_dir_all(configurations.join("axis-jdk/8")).unwrap();
    let locked = configurations.join("axis-jdk/11");
    fs::create_dir_all(&locked).unwrap();

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Permissions aren't enforced, e.g. when running as root.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let discovery = discover(root, Some(6), true);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let discovery = discovery.unwrap();

    assert!(!discovery.is_clean());
    assert!(discovery
        .sources
        .contains(&LogSource::new(configurations.join("axis-jdk/8/builds/6/log"))));
    assert_eq!(discovery.errors.len(), 1, "{:?}", discovery.errors);
}
