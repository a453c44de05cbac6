//! The fetch/write pipeline.
//!
//! Object requests queue in two priority classes, metadata ahead of
//! content, so the scanner's frontier keeps expanding even when the
//! fetcher is saturated with file downloads. Completions come back as
//! [`PipelineEvent`]s; the driver dispatches each one on its own task,
//! which keeps every counter and set single-writer.

use std::io::BufReader;
use std::sync::Arc;

use tempfile::NamedTempFile;
use url::Url;

use strata_fetch::FetchError;
use strata_repo::{content, RepoError, Repository};
use strata_types::{ObjectId, ObjectKind, ObjectName, MAX_METADATA_SIZE};

use crate::delta::DeltaPartRequest;
use crate::state::{dec, PullState};
use crate::uri::compose;
use crate::PullError;

pub(crate) struct QueuedFetch {
    pub url: Url,
    pub expected_max_size: u64,
    pub target: FetchTarget,
}

#[derive(Debug, Clone)]
pub(crate) enum FetchTarget {
    Object {
        name: ObjectName,
        detached: bool,
        /// For detached-metadata refetches of stored commits: the primary
        /// object is present and must not be re-fetched afterwards.
        object_is_stored: bool,
    },
    DeltaPart(DeltaPartRequest),
}

pub(crate) enum PipelineEvent {
    FetchDone {
        target: FetchTarget,
        result: Result<NamedTempFile, FetchError>,
    },
    MetaWritten {
        name: ObjectName,
        result: Result<ObjectId, RepoError>,
    },
    ContentWritten {
        name: ObjectName,
        result: Result<ObjectId, RepoError>,
    },
    DeltaPartWritten {
        expected: ObjectId,
        result: Result<(), PullError>,
    },
}

impl PullState {
    /// Queue a fetch for one object (or its detached metadata) and account
    /// for it. Requests become network transfers as pump() finds capacity.
    pub(crate) fn enqueue_object_request(
        &mut self,
        id: ObjectId,
        kind: ObjectKind,
        detached: bool,
        object_is_stored: bool,
    ) {
        let hex = id.to_hex();
        let url = if detached {
            compose(
                &self.base_url,
                &["objects", &hex[..2], &format!("{}.commitmeta", &hex[2..])],
            )
        } else {
            compose(
                &self.base_url,
                &[
                    "objects",
                    &hex[..2],
                    &format!("{}.{}", &hex[2..], kind.extension(true)),
                ],
            )
        };
        let url = match url {
            Ok(url) => url,
            Err(err) => return self.latch_error(err),
        };
        tracing::debug!(object = %ObjectName::new(id, kind), detached, "queuing fetch");

        let expected_max_size = if !detached && kind == ObjectKind::Commit {
            self.expected_commit_sizes
                .get(&id)
                .copied()
                .unwrap_or(MAX_METADATA_SIZE)
        } else if kind.is_meta() {
            MAX_METADATA_SIZE
        } else {
            0
        };

        let queued = QueuedFetch {
            url,
            expected_max_size,
            target: FetchTarget::Object {
                name: ObjectName::new(id, kind),
                detached,
                object_is_stored,
            },
        };
        if kind.is_meta() {
            self.counters.outstanding_metadata_fetches += 1;
            self.counters.requested_metadata += 1;
            self.meta_queue.push_back(queued);
        } else {
            self.counters.outstanding_content_fetches += 1;
            self.counters.requested_content += 1;
            self.content_queue.push_back(queued);
        }
        self.pump();
    }

    /// Start queued fetches while the fetcher has capacity, metadata
    /// first. After an error nothing new is started; the loop only drains.
    pub(crate) fn pump(&mut self) {
        if self.caught_error() {
            return;
        }
        while self.inflight_fetches < self.fetcher.concurrency() {
            let Some(request) = self
                .meta_queue
                .pop_front()
                .or_else(|| self.content_queue.pop_front())
            else {
                break;
            };
            let fetcher = Arc::clone(&self.fetcher);
            self.inflight_fetches += 1;
            self.inflight.push(Box::pin(async move {
                let result = fetcher
                    .fetch_to_temp(&request.url, request.expected_max_size)
                    .await;
                PipelineEvent::FetchDone {
                    target: request.target,
                    result,
                }
            }));
        }
    }

    pub(crate) fn dispatch(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::FetchDone { target, result } => {
                self.inflight_fetches -= 1;
                match target {
                    FetchTarget::Object {
                        name,
                        detached,
                        object_is_stored,
                    } if name.kind.is_meta() => {
                        self.meta_fetch_done(name, detached, object_is_stored, result)
                    }
                    FetchTarget::Object { name, .. } => self.content_fetch_done(name, result),
                    FetchTarget::DeltaPart(part) => self.delta_part_fetch_done(part, result),
                }
            }
            PipelineEvent::MetaWritten { name, result } => self.meta_write_done(name, result),
            PipelineEvent::ContentWritten { name, result } => {
                self.content_write_done(name, result)
            }
            PipelineEvent::DeltaPartWritten { expected, result } => {
                dec(&mut self.counters.outstanding_deltapart_writes);
                tracing::debug!(part = %expected, "static delta part executed");
                if let Err(err) = result {
                    self.latch_error(err);
                }
            }
        }
    }

    fn meta_fetch_done(
        &mut self,
        name: ObjectName,
        detached: bool,
        object_is_stored: bool,
        result: Result<NamedTempFile, FetchError>,
    ) {
        dec(&mut self.counters.outstanding_metadata_fetches);
        self.counters.fetched_metadata += 1;
        tracing::debug!(object = %name, detached, "metadata fetch complete");

        let temp = match result {
            Ok(temp) => temp,
            Err(err) if err.is_not_found() && detached => {
                // No detached metadata on the remote; fetch the primary
                // object unless it is already stored.
                if !object_is_stored {
                    self.enqueue_object_request(name.id, name.kind, false, false);
                }
                return;
            }
            Err(err) => return self.latch_error(err.into()),
        };

        let bytes = match std::fs::read(temp.path()) {
            Ok(bytes) => bytes,
            Err(err) => return self.latch_error(PullError::Storage(err.to_string())),
        };
        drop(temp);

        if detached {
            let metadata: std::collections::BTreeMap<String, serde_json::Value> =
                match serde_json::from_slice(&bytes) {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        return self.latch_error(PullError::InvalidFormat(format!(
                            "bad detached metadata for {}: {err}",
                            name.id
                        )))
                    }
                };
            if let Err(err) = self.repo.write_detached_metadata(name.id, &metadata) {
                return self.latch_error(err.into());
            }
            if !object_is_stored {
                self.enqueue_object_request(name.id, name.kind, false, false);
            }
            return;
        }

        if let Err(err) = validate_metadata_bytes(name.kind, &bytes) {
            return self.latch_error(err);
        }

        // Establish the partial marker before the commit itself lands, so
        // an interruption between the two is visible to the next pull.
        if name.kind == ObjectKind::Commit {
            if let Err(err) = self.repo.mark_commit_partial(name.id) {
                return self.latch_error(err.into());
            }
        }

        self.counters.outstanding_metadata_writes += 1;
        let repo = Arc::clone(&self.repo);
        self.inflight.push(Box::pin(async move {
            let result = repo.write_metadata(name.kind, &bytes);
            PipelineEvent::MetaWritten { name, result }
        }));
    }

    fn content_fetch_done(
        &mut self,
        name: ObjectName,
        result: Result<NamedTempFile, FetchError>,
    ) {
        dec(&mut self.counters.outstanding_content_fetches);
        tracing::debug!(object = %name, "content fetch complete");

        let temp = match result {
            Ok(temp) => temp,
            Err(err) => return self.latch_error(err.into()),
        };

        if self.is_mirror && self.repo.mode().is_archive() {
            // The fetched archive representation is the stored one: verify
            // its canonical digest, then adopt the temp file as the loose
            // object.
            if !self.repo.has_object(&name) {
                let actual = match archive_temp_digest(&temp) {
                    Ok(actual) => actual,
                    Err(err) => return self.latch_error(err),
                };
                if actual != name.id {
                    return self.latch_error(PullError::Integrity(format!(
                        "Corrupted content object; checksum expected='{}' actual='{actual}'",
                        name.id
                    )));
                }
                if let Err(err) = self.repo.adopt_archive_object(name.id, temp) {
                    return self.latch_error(err.into());
                }
            }
            self.counters.fetched_content += 1;
            return;
        }

        // Keep only the open descriptor; the path is gone whether or not
        // the write below succeeds.
        let file = match temp.reopen() {
            Ok(file) => file,
            Err(err) => return self.latch_error(PullError::Storage(err.to_string())),
        };
        drop(temp);

        self.counters.outstanding_content_writes += 1;
        let repo = Arc::clone(&self.repo);
        self.inflight.push(Box::pin(async move {
            let result = write_archive_content(&repo, file);
            PipelineEvent::ContentWritten { name, result }
        }));
    }

    fn meta_write_done(&mut self, name: ObjectName, result: Result<ObjectId, RepoError>) {
        dec(&mut self.counters.outstanding_metadata_writes);
        tracing::debug!(object = %name, "metadata write complete");
        let actual = match result {
            Ok(actual) => actual,
            Err(err) => return self.latch_error(err.into()),
        };
        if actual != name.id {
            return self.latch_error(PullError::Integrity(format!(
                "Corrupted metadata object; checksum expected='{}' actual='{actual}'",
                name.id
            )));
        }
        // Newly stored metadata drives the graph expansion.
        if let Err(err) = self.scan_object(name, 0) {
            self.latch_error(err);
        }
    }

    fn content_write_done(&mut self, name: ObjectName, result: Result<ObjectId, RepoError>) {
        dec(&mut self.counters.outstanding_content_writes);
        tracing::debug!(object = %name, "content write complete");
        let actual = match result {
            Ok(actual) => actual,
            Err(err) => return self.latch_error(err.into()),
        };
        if actual != name.id {
            return self.latch_error(PullError::Integrity(format!(
                "Corrupted content object; checksum expected='{}' actual='{actual}'",
                name.id
            )));
        }
        self.counters.fetched_content += 1;
    }
}

/// Reject fetched metadata that does not decode as its claimed kind.
fn validate_metadata_bytes(kind: ObjectKind, bytes: &[u8]) -> Result<(), PullError> {
    let result = match kind {
        ObjectKind::Commit => serde_json::from_slice::<strata_types::Commit>(bytes).map(|_| ()),
        ObjectKind::DirTree => serde_json::from_slice::<strata_types::DirTree>(bytes).map(|_| ()),
        ObjectKind::DirMeta => serde_json::from_slice::<strata_types::DirMeta>(bytes).map(|_| ()),
        ObjectKind::File => {
            return Err(PullError::InvalidFormat(
                "file objects are not metadata".to_string(),
            ))
        }
    };
    result.map_err(|err| PullError::InvalidFormat(format!("bad {kind} object: {err}")))
}

/// Canonical digest of an archive-form temp file, without storing it.
fn archive_temp_digest(temp: &NamedTempFile) -> Result<ObjectId, PullError> {
    let file = temp
        .reopen()
        .map_err(|err| PullError::Storage(err.to_string()))?;
    let mut reader = BufReader::new(file);
    let (_header, raw) = content::read_header(&mut reader)?;
    let mut decoder = flate2::read::ZlibDecoder::new(reader);
    Ok(content::digest_content(&raw, &mut decoder, &mut std::io::sink())?)
}

/// Parse an archive stream from an (already unlinked) temp descriptor and
/// store it through the digesting content write path.
fn write_archive_content(repo: &Repository, file: std::fs::File) -> Result<ObjectId, RepoError> {
    let mut reader = BufReader::new(file);
    let (_header, raw) = content::read_header(&mut reader)?;
    let mut decoder = flate2::read::ZlibDecoder::new(reader);
    repo.write_content(&raw, &mut decoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_validation_rejects_wrong_kind() {
        let tree = strata_types::DirTree::default();
        let bytes = tree.canonical_bytes().unwrap();
        assert!(validate_metadata_bytes(ObjectKind::DirTree, &bytes).is_ok());
        // A dirtree does not decode as a commit.
        assert!(validate_metadata_bytes(ObjectKind::Commit, &bytes).is_err());
        assert!(validate_metadata_bytes(ObjectKind::File, &bytes).is_err());
    }
}
