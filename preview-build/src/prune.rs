//! Removal of output directories whose ref no longer exists upstream.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use preview_core::GitRef;

/// What a prune pass did.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone)]
pub struct Pruner {
    build_root: PathBuf,
}

impl Pruner {
    pub fn new(build_root: impl Into<PathBuf>) -> Self {
        Self {
            build_root: build_root.into(),
        }
    }

    /// Delete every directory under the build root that is neither a current
    /// ref's output directory nor an ancestor of one.
    ///
    /// Ref directories are not descended into. Plain files are left alone.
    /// A missing build root is a no-op; deletion failures are logged and
    /// reported.
    pub fn prune(&self, refs: &[GitRef]) -> PruneReport {
        let mut report = PruneReport::default();
        let keep: HashSet<&str> = refs.iter().map(|r| r.name.as_str()).collect();
        let ancestors: HashSet<&str> = refs
            .iter()
            .flat_map(|r| {
                let name = r.name.as_str();
                name.match_indices('/').map(move |(i, _)| &name[..i])
            })
            .collect();

        let mut pending = vec![String::new()];
        while let Some(rel) = pending.pop() {
            let dir = self.build_root.join(&rel);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if rel.is_empty() && err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(root = %dir.display(), "build root missing, nothing to prune");
                    return report;
                }
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "cannot list directory");
                    report.failed.push((dir, err.to_string()));
                    continue;
                }
            };

            for entry in entries.flatten() {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let child = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };

                if keep.contains(child.as_str()) {
                    continue;
                }
                if ancestors.contains(child.as_str()) {
                    pending.push(child);
                    continue;
                }
                remove(&entry.path(), &mut report);
            }
        }
        report
    }
}

fn remove(path: &Path, report: &mut PruneReport) {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "pruned stale build output");
            report.removed.push(path.to_path_buf());
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to prune");
            report.failed.push((path.to_path_buf(), err.to_string()));
        }
    }
}
