//! The object-graph scanner.
//!
//! Scanning decides, for each metadata object reached, whether it is
//! already stored, already requested, importable from a local remote, or
//! needs a network fetch; stored commits and trees are recursed into so
//! missing children are discovered. Termination is guaranteed by the
//! scanned-object memo and the recursion bound.

use strata_repo::SignatureList;
use strata_types::{
    validate_filename, ObjectId, ObjectKind, ObjectName, MAX_RECURSION,
};

use crate::state::PullState;
use crate::PullError;

impl PullState {
    pub(crate) fn scan_object(
        &mut self,
        name: ObjectName,
        recursion_depth: u32,
    ) -> Result<(), PullError> {
        debug_assert!(name.kind.is_meta());
        if recursion_depth > MAX_RECURSION {
            return Err(PullError::RecursionExceeded);
        }
        if self.scanned_metadata.contains(&name) {
            return Ok(());
        }

        let mut is_stored = self.repo.has_object(&name);
        let mut is_requested = self.requested_metadata.contains(&name.id);

        if let Some(local) = &self.remote_repo_local {
            self.repo.import_object_from(local, &name)?;
            is_stored = true;
            is_requested = true;
        }

        if !is_stored && !is_requested {
            self.requested_metadata.insert(name.id);
            // Commits fetch their detached metadata first; the primary
            // request follows from its completion (or its 404).
            let fetch_detached = name.kind == ObjectKind::Commit;
            self.enqueue_object_request(name.id, name.kind, fetch_detached, false);
        } else if name.kind == ObjectKind::Commit && self.is_commit_only {
            return Ok(());
        } else if is_stored {
            // Detached metadata (signatures) can change without the commit
            // digest changing, so stored commits still refetch it.
            if name.kind == ObjectKind::Commit {
                self.enqueue_object_request(name.id, name.kind, true, true);
            }

            let mut do_scan =
                self.transaction_resuming || is_requested || self.commitpartial_exists;
            if !do_scan && name.kind == ObjectKind::Commit {
                let (_commit, state) = self.repo.load_commit(name.id)?;
                if state.is_partial() {
                    do_scan = true;
                    self.commitpartial_exists = true;
                } else if self.maxdepth != 0 {
                    // Scanning every input commit on a depth pull is a
                    // cheap over-approximation; the accurate bound is
                    // applied while walking parents.
                    do_scan = true;
                }
            }

            if do_scan {
                match name.kind {
                    ObjectKind::Commit => self.scan_commit(name.id, recursion_depth)?,
                    ObjectKind::DirTree => self.scan_dirtree(name.id, recursion_depth)?,
                    ObjectKind::DirMeta => {}
                    ObjectKind::File => unreachable!("files are not scanned"),
                }
            }
            self.scanned_metadata.insert(name);
            self.counters.scanned_metadata += 1;
        }
        Ok(())
    }

    fn scan_commit(&mut self, id: ObjectId, recursion_depth: u32) -> Result<(), PullError> {
        let depth = *self.commit_to_depth.entry(id).or_insert(self.maxdepth);

        if self.verify_commit {
            self.verify_commit_signature(id)?;
        }

        let (commit, _state) = self.repo.load_commit(id)?;

        if let Some(parent) = commit.parent {
            if self.maxdepth == -1 {
                self.scan_object(
                    ObjectName::new(parent, ObjectKind::Commit),
                    recursion_depth + 1,
                )?;
            } else if depth > 0 {
                // A commit reached along several chains keeps the largest
                // remaining depth.
                let parent_depth = match self.commit_to_depth.get(&parent) {
                    Some(&existing) => existing.max(depth - 1),
                    None => depth - 1,
                };
                if parent_depth >= 0 {
                    self.commit_to_depth.insert(parent, parent_depth);
                    self.scan_object(
                        ObjectName::new(parent, ObjectKind::Commit),
                        recursion_depth + 1,
                    )?;
                }
            }
        }

        self.scan_object(
            ObjectName::new(commit.root_tree, ObjectKind::DirTree),
            recursion_depth + 1,
        )?;
        self.scan_object(
            ObjectName::new(commit.root_meta, ObjectKind::DirMeta),
            recursion_depth + 1,
        )?;
        Ok(())
    }

    fn scan_dirtree(&mut self, id: ObjectId, recursion_depth: u32) -> Result<(), PullError> {
        let tree = self.repo.load_dirtree(id)?;

        // Under a subdirectory restriction, files are only pulled once the
        // requested path is fully consumed.
        if self.subdir.is_none() {
            for entry in &tree.files {
                validate_filename(&entry.name)?;
                let name = ObjectName::new(entry.id, ObjectKind::File);
                if self.repo.has_object(&name) {
                    continue;
                }
                if let Some(local) = &self.remote_repo_local {
                    self.repo.import_object_from(local, &name)?;
                } else if !self.requested_content.contains(&entry.id) {
                    self.requested_content.insert(entry.id);
                    self.enqueue_object_request(entry.id, ObjectKind::File, false, false);
                }
            }
        }

        // Consume one leading component of the restriction; the remainder
        // travels with the state and is consumed by the matching child.
        let subdir_target = match self.subdir.take() {
            Some(dir) => {
                debug_assert!(dir.starts_with('/'));
                let subpath = &dir[1..];
                match subpath.find('/') {
                    Some(slash) => {
                        let target = subpath[..slash].to_string();
                        self.subdir = Some(subpath[slash..].to_string());
                        Some(target)
                    }
                    None => Some(subpath.to_string()),
                }
            }
            None => None,
        };

        for entry in &tree.dirs {
            validate_filename(&entry.name)?;
            if let Some(target) = &subdir_target {
                if *target != entry.name {
                    continue;
                }
            }
            self.scan_object(
                ObjectName::new(entry.tree, ObjectKind::DirTree),
                recursion_depth + 1,
            )?;
            self.scan_object(
                ObjectName::new(entry.meta, ObjectKind::DirMeta),
                recursion_depth + 1,
            )?;
        }
        Ok(())
    }

    /// Require at least one signature over the commit from the remote's
    /// trusted keyring.
    fn verify_commit_signature(&self, id: ObjectId) -> Result<(), PullError> {
        let name = ObjectName::new(id, ObjectKind::Commit);
        let bytes = self.repo.load_metadata_bytes(&name)?;
        let metadata = self
            .repo
            .load_detached_metadata(id)?
            .ok_or_else(|| PullError::Trust(format!("Commit {id} is not signed")))?;
        let signatures = metadata
            .get("signatures")
            .ok_or_else(|| PullError::Trust(format!("Commit {id} is not signed")))?;
        let signatures = SignatureList::from_json(signatures).map_err(PullError::from)?;
        if signatures.is_empty() {
            return Err(PullError::Trust(format!("Commit {id} is not signed")));
        }
        if self.keyring.count_valid(&bytes, &signatures) == 0 {
            return Err(PullError::Trust(
                "Signatures found, but none are in trusted keyring".to_string(),
            ));
        }
        Ok(())
    }
}
