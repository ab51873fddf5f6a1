//! Domain types for preview-bot.
//!
//! Ref names and commit ids are newtypes; the persisted build state is a
//! `BTreeMap` so the JSON state file is written in a stable order.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of an upstream ref as seen from the mirror, e.g. `origin/main`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefName(pub String);

impl RefName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Output directory for this ref under `build_root`.
    ///
    /// Every component must be a plain name: no `..`, no root, no empty
    /// segments.
    pub fn output_dir(&self, build_root: &Path) -> Result<PathBuf, TypeError> {
        let valid = self
            .0
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !valid {
            return Err(TypeError::InvalidRefName {
                name: self.0.clone(),
            });
        }
        Ok(build_root.join(&self.0))
    }

    /// Public path segment appended to the site base URL.
    pub fn public_path(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RefName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RefName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Hex object id of a commit (SHA-1 or SHA-256 repositories).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitSha(pub String);

impl CommitSha {
    /// Parse a full-length hex commit id, normalised to lowercase.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, TypeError> {
        let s = s.as_ref().trim();
        if !matches!(s.len(), 40 | 64) || hex::decode(s).is_err() {
            return Err(TypeError::InvalidCommitSha {
                value: s.to_string(),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(7)]
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for CommitSha {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Refs
// ---------------------------------------------------------------------------

/// A named upstream branch pointer and its tip commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    pub name: RefName,
    pub commit: CommitSha,
}

impl GitRef {
    pub fn new(name: impl Into<RefName>, commit: CommitSha) -> Self {
        Self {
            name: name.into(),
            commit,
        }
    }
}

// ---------------------------------------------------------------------------
// Build state
// ---------------------------------------------------------------------------

/// Lifecycle of a build state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Init,
    Built,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Init => write!(f, "init"),
            BuildStatus::Built => write!(f, "built"),
        }
    }
}

/// Persisted record for one ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStateEntry {
    /// Last commit seen for the ref.
    pub sha: CommitSha,
    pub status: BuildStatus,
    /// Commit the output directory was last built from.
    pub built: Option<CommitSha>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

impl BuildStateEntry {
    /// Entry for a ref seen for the first time.
    pub fn init(sha: CommitSha) -> Self {
        Self {
            sha,
            status: BuildStatus::Init,
            built: None,
            built_at: None,
        }
    }

    /// Record a completed build of `commit`.
    pub fn mark_built(&mut self, commit: &CommitSha) {
        self.sha = commit.clone();
        self.built = Some(commit.clone());
        self.status = BuildStatus::Built;
        self.built_at = Some(Utc::now());
    }

    /// Record `tip` as the last commit seen for the ref. Returns whether the
    /// entry changed.
    pub fn observe(&mut self, tip: &CommitSha) -> bool {
        if &self.sha == tip {
            return false;
        }
        self.sha = tip.clone();
        true
    }

    pub fn is_built_at(&self, commit: &CommitSha) -> bool {
        self.built.as_ref() == Some(commit)
    }
}

/// Ref name → entry mapping, serialized as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildState(BTreeMap<RefName, BuildStateEntry>);

impl BuildState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &RefName) -> Option<&BuildStateEntry> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &RefName) -> Option<&mut BuildStateEntry> {
        self.0.get_mut(name)
    }

    pub fn insert(&mut self, name: RefName, entry: BuildStateEntry) -> Option<BuildStateEntry> {
        self.0.insert(name, entry)
    }

    /// Look up the entry for `git_ref`, inserting an `init` entry when the
    /// ref has not been seen before. The flag is `true` on insertion.
    pub fn entry_or_init(&mut self, git_ref: &GitRef) -> (&mut BuildStateEntry, bool) {
        match self.0.entry(git_ref.name.clone()) {
            btree_map::Entry::Occupied(entry) => (entry.into_mut(), false),
            btree_map::Entry::Vacant(entry) => {
                (entry.insert(BuildStateEntry::init(git_ref.commit.clone())), true)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, RefName, BuildStateEntry> {
        self.0.iter()
    }
}

impl FromIterator<(RefName, BuildStateEntry)> for BuildState {
    fn from_iter<I: IntoIterator<Item = (RefName, BuildStateEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sha(c: char) -> CommitSha {
        CommitSha::parse(c.to_string().repeat(40)).expect("sha")
    }

    #[test]
    fn newtype_display() {
        assert_eq!(RefName::from("origin/main").to_string(), "origin/main");
        assert_eq!(sha('a').to_string(), "a".repeat(40));
    }

    #[test]
    fn commit_sha_parse_rejects_short_and_non_hex() {
        assert!(CommitSha::parse("abc123").is_err());
        assert!(CommitSha::parse("z".repeat(40)).is_err());
        assert!(CommitSha::parse("a".repeat(64)).is_ok());
    }

    #[test]
    fn commit_sha_parse_lowercases_and_trims() {
        let parsed = CommitSha::parse(format!(" {}\n", "AB".repeat(20))).expect("parse");
        assert_eq!(parsed.as_str(), "ab".repeat(20));
        assert_eq!(parsed.short(), "abababa");
    }

    #[test]
    fn output_dir_nests_ref_components() {
        let dir = RefName::from("origin/feature/x")
            .output_dir(Path::new("/srv/builds"))
            .expect("dir");
        assert_eq!(dir, PathBuf::from("/srv/builds/origin/feature/x"));
    }

    #[test]
    fn output_dir_rejects_escaping_names() {
        for name in ["../etc", "origin/../../x", "/abs", "", "origin//main", "origin/."] {
            assert!(
                RefName::from(name).output_dir(Path::new("/srv")).is_err(),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn observe_records_new_tip_without_touching_build() {
        let mut entry = BuildStateEntry::init(sha('a'));
        entry.mark_built(&sha('a'));
        assert!(!entry.observe(&sha('a')));

        assert!(entry.observe(&sha('b')));
        assert_eq!(entry.sha, sha('b'));
        assert_eq!(entry.status, BuildStatus::Built);
        assert!(entry.is_built_at(&sha('a')));
        assert!(!entry.is_built_at(&entry.sha));
    }

    #[test]
    fn entry_or_init_inserts_once() {
        let mut state = BuildState::new();
        let git_ref = GitRef::new("origin/main", sha('a'));

        let (entry, inserted) = state.entry_or_init(&git_ref);
        assert!(inserted);
        assert_eq!(entry.status, BuildStatus::Init);
        assert_eq!(entry.built, None);
        entry.mark_built(&sha('a'));

        let moved = GitRef::new("origin/main", sha('b'));
        let (entry, inserted) = state.entry_or_init(&moved);
        assert!(!inserted);
        assert!(entry.is_built_at(&sha('a')));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn state_serializes_as_flat_object() {
        let mut state = BuildState::new();
        state.insert(RefName::from("origin/main"), BuildStateEntry::init(sha('a')));
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "origin/main": {"sha": "a".repeat(40), "status": "init", "built": null}
            })
        );
    }
}
