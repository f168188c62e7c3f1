use std::path::Path;

use anyhow::Context;

/// A self-cleaning scratch directory under the system temp root, named
/// `{prefix}{random}`. Kept around if `ZMX_LEAVE_TEST_LOGS` is set so a
/// failing test's daemon logs can be inspected afterward.
pub struct Dir {
    inner: Option<tempfile::TempDir>,
    path: std::path::PathBuf,
}

impl Dir {
    pub fn new(prefix: &str) -> anyhow::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .rand_bytes(20)
            .tempdir()
            .context("creating tmp dir")?;
        let path = dir.path().to_path_buf();
        Ok(Dir { inner: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        if std::env::var("ZMX_LEAVE_TEST_LOGS").unwrap_or_default() == "true" {
            self.inner.take().map(tempfile::TempDir::into_path);
        }
    }
}
