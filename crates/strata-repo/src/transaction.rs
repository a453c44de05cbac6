//! Pull transactions.
//!
//! A transaction stages ref updates in memory and marks the repository as
//! having a pull in progress via `state/transaction`. Objects land in the
//! store as soon as they are written; what the transaction makes atomic is
//! the ref flip, and what the marker preserves is resumability: an aborted
//! or interrupted transaction leaves the marker behind, and the next
//! [`Transaction::begin`] reports `resuming = true` so the puller rescans
//! partially fetched commits.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use strata_types::ObjectId;

use crate::{RepoError, Repository};

pub const TRANSACTION_MARKER: &str = "transaction";

pub struct Transaction {
    repo: Arc<Repository>,
    resuming: bool,
    staged_refs: BTreeMap<(Option<String>, String), ObjectId>,
    finished: bool,
}

impl Transaction {
    /// Begin (or resume) the repository's pull transaction.
    pub fn begin(repo: Arc<Repository>) -> Result<Self, RepoError> {
        let marker = repo.state_dir().join(TRANSACTION_MARKER);
        let resuming = marker.exists();
        if !resuming {
            fs::create_dir_all(repo.state_dir())?;
            fs::write(&marker, b"")?;
        }
        tracing::debug!(resuming, "transaction started");
        Ok(Self {
            repo,
            resuming,
            staged_refs: BTreeMap::new(),
            finished: false,
        })
    }

    /// Whether a previous transaction was interrupted before committing.
    pub fn resuming(&self) -> bool {
        self.resuming
    }

    /// Stage a ref update. `remote = None` writes under `refs/heads/`,
    /// otherwise under `refs/remotes/<remote>/`.
    pub fn set_ref(&mut self, remote: Option<&str>, refname: &str, target: ObjectId) {
        self.staged_refs
            .insert((remote.map(str::to_string), refname.to_string()), target);
    }

    pub fn staged_ref_count(&self) -> usize {
        self.staged_refs.len()
    }

    /// Apply every staged ref update and clear the in-progress marker.
    pub fn commit(mut self) -> Result<(), RepoError> {
        for ((remote, refname), target) in &self.staged_refs {
            self.repo.write_ref(remote.as_deref(), refname, *target)?;
        }
        let marker = self.repo.state_dir().join(TRANSACTION_MARKER);
        match fs::remove_file(&marker) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.finished = true;
        Ok(())
    }

    /// Discard staged refs. The marker stays so the next pull resumes.
    pub fn abort(mut self) {
        self.staged_refs.clear();
        self.finished = true;
        tracing::debug!("transaction aborted; resume marker kept");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("transaction dropped uncommitted; resume marker kept");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RepoMode;
    use tempfile::TempDir;

    fn new_repo(dir: &TempDir) -> Arc<Repository> {
        Arc::new(Repository::init(dir.path().join("repo"), RepoMode::Bare).unwrap())
    }

    #[test]
    fn commit_applies_refs_and_clears_marker() {
        let dir = TempDir::new().unwrap();
        let repo = new_repo(&dir);
        let target = ObjectId::digest(b"commit");

        let mut txn = Transaction::begin(Arc::clone(&repo)).unwrap();
        assert!(!txn.resuming());
        txn.set_ref(None, "main", target);
        txn.set_ref(Some("origin"), "main", target);
        txn.commit().unwrap();

        assert_eq!(repo.resolve_rev("main", false).unwrap(), Some(target));
        assert_eq!(
            repo.resolve_rev("origin/main", false).unwrap(),
            Some(target)
        );
        assert!(!repo.state_dir().join(TRANSACTION_MARKER).exists());
    }

    #[test]
    fn abort_keeps_resume_marker() {
        let dir = TempDir::new().unwrap();
        let repo = new_repo(&dir);

        let mut txn = Transaction::begin(Arc::clone(&repo)).unwrap();
        txn.set_ref(None, "main", ObjectId::digest(b"x"));
        txn.abort();

        assert!(repo.resolve_rev("main", true).unwrap().is_none());
        let txn = Transaction::begin(Arc::clone(&repo)).unwrap();
        assert!(txn.resuming());
        txn.commit().unwrap();

        let txn = Transaction::begin(Arc::clone(&repo)).unwrap();
        assert!(!txn.resuming());
        txn.commit().unwrap();
    }
}
