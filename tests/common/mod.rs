//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Write `yaml` as `gantry.yaml` inside `dir` and return its path.
pub fn write_build_file(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("gantry.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

/// Rewrite `path` and move its mtime `offset_secs` into the future.
///
/// Distinct offsets guarantee distinct mtimes on coarse filesystem clocks.
pub fn touch(path: &Path, offset_secs: u64) {
    std::fs::write(path, offset_secs.to_string()).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
        .unwrap();
}

/// Poll `condition` every 10ms until it holds.
///
/// # Panics
///
/// Panics if `timeout` elapses first.
pub async fn wait_until<F>(mut condition: F, timeout: Duration, what: &str)
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
