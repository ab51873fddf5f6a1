//! Mapping a pushed commit to the branch whose tip it is.

use preview_core::{CommitSha, GitRef};

use crate::error::BuildError;

/// First ref in `refs` whose tip is `commit`.
///
/// `refs` come from the mirror in lexicographic order, so on ties the
/// smallest name wins.
pub fn resolve_branch<'a>(commit: &CommitSha, refs: &'a [GitRef]) -> Result<&'a GitRef, BuildError> {
    refs.iter()
        .find(|r| &r.commit == commit)
        .ok_or_else(|| BuildError::BranchNotFound {
            commit: commit.clone(),
        })
}
