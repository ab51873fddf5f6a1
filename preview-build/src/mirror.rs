//! Local mirror of the upstream repository.
//!
//! The mirror has two independently locked concerns:
//! - the ref database, updated by [`RepositoryMirror::sync`] (fetches are
//!   serialized by an internal lock; git's own lockfiles cover readers);
//! - the single working tree, reachable only through a [`WorkingTree`]
//!   guard obtained from [`RepositoryMirror::lock_working_tree`]. Checkouts
//!   and copies of the tree require the guard, so two builds can never
//!   interleave checkouts.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use preview_core::{CommitSha, Config, GitRef, RefName};

use crate::error::{io_err, BuildError, CommandError};
use crate::process::{CommandOutput, Subprocesses};

const REMOTE: &str = "origin";
const REMOTE_REFS_PREFIX: &str = "refs/remotes/";

/// Thin git CLI driver with a clean environment and a bounded timeout.
#[derive(Debug, Clone)]
pub struct Git {
    subprocesses: Arc<Subprocesses>,
    timeout: Duration,
}

impl Git {
    pub fn new(subprocesses: Arc<Subprocesses>, timeout: Duration) -> Self {
        Self {
            subprocesses,
            timeout,
        }
    }

    /// `git` command rooted at `workdir`, ignoring system and user config.
    fn command(workdir: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(workdir);
        cmd.env("GIT_CONFIG_NOSYSTEM", "1");
        cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    /// Run git and fail on a non-zero exit.
    pub fn run(&self, workdir: &Path, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let mut cmd = Self::command(workdir);
        cmd.args(args);
        self.subprocesses.run(&mut cmd, self.timeout)?.check()
    }

    /// Run git and return trimmed output.
    pub fn stdout(&self, workdir: &Path, args: &[&str]) -> Result<String, CommandError> {
        Ok(self.run(workdir, args)?.output.trim().to_string())
    }

    /// Force the tree at `workdir` onto `target` (detached HEAD).
    pub fn checkout(&self, workdir: &Path, target: &str) -> Result<(), BuildError> {
        let checkout_err = |source| BuildError::Checkout {
            target: target.to_string(),
            source: Box::new(source),
        };
        if target.is_empty() || target.starts_with('-') {
            return Err(BuildError::GitOutput(format!(
                "refusing to check out {target:?}"
            )));
        }
        self.run(workdir, &["reset", "--hard", "--quiet", target])
            .map_err(checkout_err)?;
        self.run(workdir, &["checkout", "--force", "--quiet", "--detach", target])
            .map_err(checkout_err)?;
        Ok(())
    }
}

/// Owner of the local mirror directory.
#[derive(Debug)]
pub struct RepositoryMirror {
    path: PathBuf,
    remote_url: String,
    git: Git,
    fetch_lock: Mutex<()>,
    tree_lock: Mutex<()>,
}

impl RepositoryMirror {
    pub fn new(config: &Config, subprocesses: Arc<Subprocesses>) -> Self {
        Self {
            path: config.work_path.clone(),
            remote_url: config.remote_url.clone(),
            git: Git::new(subprocesses, config.git_timeout()),
            fetch_lock: Mutex::new(()),
            tree_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Ensure the mirror and its `origin` remote exist, fetch with pruning,
    /// and return the current ref set.
    pub fn sync(&self) -> Result<Vec<GitRef>, BuildError> {
        let _fetching = self.fetch_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mirror_err = |source| BuildError::MirrorSync(Box::new(source));

        fs::create_dir_all(&self.path).map_err(|e| io_err(&self.path, e))?;
        if !self.path.join(".git").exists() {
            tracing::info!(path = %self.path.display(), "initialising mirror repository");
            self.git
                .run(&self.path, &["init", "--quiet"])
                .map_err(mirror_err)?;
        }

        match self.git.stdout(&self.path, &["remote", "get-url", REMOTE]) {
            Ok(url) if url == self.remote_url => {}
            Ok(url) => {
                tracing::info!(from = %url, to = %self.remote_url, "updating origin URL");
                self.git
                    .run(&self.path, &["remote", "set-url", REMOTE, &self.remote_url])
                    .map_err(mirror_err)?;
            }
            Err(_) => {
                tracing::info!(
                    url = %self.remote_url,
                    path = %self.path.display(),
                    "creating origin remote",
                );
                self.git
                    .run(&self.path, &["remote", "add", REMOTE, &self.remote_url])
                    .map_err(mirror_err)?;
            }
        }

        tracing::info!("fetching remote branches");
        self.git
            .run(&self.path, &["fetch", "--prune", "--quiet", REMOTE])
            .map_err(mirror_err)?;

        let refs = self.refs()?;
        for git_ref in &refs {
            tracing::info!(branch = %git_ref.name, commit = %git_ref.commit, "remote branch");
        }
        Ok(refs)
    }

    /// Refs already present in the mirror, without fetching.
    ///
    /// Ordered lexicographically by name; symbolic refs are skipped.
    pub fn refs(&self) -> Result<Vec<GitRef>, BuildError> {
        if !self.path.join(".git").exists() {
            return Ok(Vec::new());
        }
        let pattern = format!("{REMOTE_REFS_PREFIX}{REMOTE}/");
        let listing = self
            .git
            .stdout(
                &self.path,
                &[
                    "for-each-ref",
                    "--format=%(objectname)%09%(symref)%09%(refname)",
                    &pattern,
                ],
            )
            .map_err(|source| BuildError::MirrorSync(Box::new(source)))?;
        parse_ref_listing(&listing)
    }

    /// Exclusive access to the shared working tree.
    pub fn lock_working_tree(&self) -> WorkingTree<'_> {
        WorkingTree {
            mirror: self,
            _guard: self.tree_lock.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Proof of exclusive access to the mirror's working tree.
pub struct WorkingTree<'a> {
    mirror: &'a RepositoryMirror,
    _guard: MutexGuard<'a, ()>,
}

impl WorkingTree<'_> {
    pub fn path(&self) -> &Path {
        &self.mirror.path
    }

    /// Force-reset and check out `target` in the shared tree.
    pub fn checkout(&self, target: &str) -> Result<(), BuildError> {
        self.mirror.git.checkout(&self.mirror.path, target)
    }

    /// Copy the whole tree, `.git` included, into `dest`.
    pub fn copy_to(&self, dest: &Path) -> Result<(), BuildError> {
        copy_tree(&self.mirror.path, dest)
    }
}

fn parse_ref_listing(listing: &str) -> Result<Vec<GitRef>, BuildError> {
    let mut refs = Vec::new();
    for line in listing.lines().filter(|line| !line.trim().is_empty()) {
        let mut fields = line.splitn(3, '\t');
        let (Some(object), Some(symref), Some(refname)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(BuildError::GitOutput(line.to_string()));
        };
        if !symref.is_empty() {
            continue;
        }
        let Some(name) = refname.strip_prefix(REMOTE_REFS_PREFIX) else {
            return Err(BuildError::GitOutput(line.to_string()));
        };
        refs.push(GitRef::new(RefName::from(name), CommitSha::parse(object)?));
    }
    refs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(refs)
}

/// Recursive copy preserving symlinks and file permissions.
fn copy_tree(src: &Path, dest: &Path) -> Result<(), BuildError> {
    let mut pending = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).map_err(|e| io_err(&to, e))?;
        for entry in fs::read_dir(&from).map_err(|e| io_err(&from, e))? {
            let entry = entry.map_err(|e| io_err(&from, e))?;
            let source = entry.path();
            let target = to.join(entry.file_name());
            let ty = entry.file_type().map_err(|e| io_err(&source, e))?;
            if ty.is_dir() {
                pending.push((source, target));
            } else if ty.is_symlink() {
                let link = fs::read_link(&source).map_err(|e| io_err(&source, e))?;
                std::os::unix::fs::symlink(link, &target).map_err(|e| io_err(&target, e))?;
            } else {
                fs::copy(&source, &target).map_err(|e| io_err(&target, e))?;
            }
        }
    }
    Ok(())
}
