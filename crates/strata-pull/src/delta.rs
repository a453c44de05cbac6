//! Static deltas.
//!
//! A static delta replaces per-object fetches for a `(from → to)` commit
//! pair with a superblock, numbered parts, and a fallback list of objects
//! that could not be expressed inside a part. Superblocks are gated on the
//! signed summary's checksum table; each part is digest-checked before its
//! objects are written.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use strata_repo::Repository;
use strata_types::{Commit, ObjectId, ObjectKind, ObjectName, DELTA_PART_VERSION};

use crate::pipeline::{FetchTarget, PipelineEvent, QueuedFetch};
use crate::state::{dec, PullState};
use crate::uri::compose;
use crate::PullError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaSuperblock {
    #[serde(default)]
    pub from: Option<ObjectId>,
    pub to: ObjectId,
    /// The target commit object, embedded so no separate fetch is needed.
    pub commit: Commit,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub parts: Vec<DeltaPartHeader>,
    #[serde(default)]
    pub fallbacks: Vec<DeltaFallback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaPartHeader {
    pub version: u32,
    /// Digest of the part payload as fetched (compressed).
    pub digest: ObjectId,
    pub size: u64,
    pub uncompressed_size: u64,
    /// Objects this part produces; a part whose objects are all stored is
    /// skipped without a fetch.
    pub objects: Vec<ObjectName>,
}

/// An object shipped outside the parts: fetched as a loose object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaFallback {
    pub kind: ObjectKind,
    pub digest: ObjectId,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct DeltaPartRequest {
    pub expected: ObjectId,
    pub objects: Vec<ObjectName>,
    pub delta_name: String,
    pub index: usize,
}

/// Name of a delta in the summary table and on the wire.
pub fn delta_name(from: Option<ObjectId>, to: ObjectId) -> String {
    match from {
        Some(from) => format!("{from}-{to}"),
        None => to.to_hex(),
    }
}

impl PullState {
    /// Fetch and validate the superblock for `(from → to)`; `Ok(None)`
    /// means the remote offers no such delta.
    pub(crate) async fn request_delta_superblock(
        &mut self,
        from: Option<ObjectId>,
        to: ObjectId,
    ) -> Result<Option<DeltaSuperblock>, PullError> {
        let name = delta_name(from, to);
        let url = compose(
            &self.base_url,
            &["deltas", &name[..2], &name[2..], "superblock"],
        )?;
        let Some(bytes) = self.fetch_membuf_sync(url, true).await? else {
            return Ok(None);
        };

        let actual = ObjectId::digest(&bytes);
        let expected = self.summary_delta_checksums.get(&name);
        // The summary is the signed statement of which deltas exist; with
        // summary verification on, an unlisted delta is not trusted even
        // though its payload would still be digest-checked.
        if self.verify_summary && expected.is_none() {
            return Err(PullError::Trust(format!(
                "Summary verification enabled, but static delta {name} not found in summary"
            )));
        }
        if let Some(expected) = expected {
            if *expected != actual {
                return Err(PullError::Integrity(format!(
                    "Invalid checksum for static delta {name}"
                )));
            }
        }

        let superblock: DeltaSuperblock = serde_json::from_slice(&bytes)
            .map_err(|err| PullError::InvalidFormat(format!("bad delta superblock: {err}")))?;
        Ok(Some(superblock))
    }

    pub(crate) fn process_delta(&mut self, superblock: &DeltaSuperblock) -> Result<(), PullError> {
        let name = delta_name(superblock.from, superblock.to);
        tracing::debug!(delta = %name, parts = superblock.parts.len(), "processing static delta");

        for fallback in &superblock.fallbacks {
            self.process_delta_fallback(fallback);
        }

        // The target commit rides inside the superblock; write it through
        // the normal metadata path so its completion triggers a scan.
        let to_name = ObjectName::new(superblock.to, ObjectKind::Commit);
        if !self.repo.has_object(&to_name) {
            let bytes = superblock.commit.canonical_bytes()?;
            self.counters.outstanding_metadata_writes += 1;
            let repo = Arc::clone(&self.repo);
            self.inflight.push(Box::pin(async move {
                let result = repo.write_metadata(ObjectKind::Commit, &bytes);
                PipelineEvent::MetaWritten {
                    name: to_name,
                    result,
                }
            }));
        }

        self.counters.total_deltaparts += superblock.parts.len() as u32;
        for (index, header) in superblock.parts.iter().enumerate() {
            if header.version > DELTA_PART_VERSION {
                return Err(PullError::Protocol(format!(
                    "Delta part has too new version {}",
                    header.version
                )));
            }
            self.counters.total_deltapart_size += header.size;

            if header.objects.iter().all(|o| self.repo.has_object(o)) {
                tracing::debug!(delta = %name, part = index, "all objects stored; skipping part");
                self.counters.fetched_deltaparts += 1;
                continue;
            }

            let url = compose(
                &self.base_url,
                &["deltas", &name[..2], &name[2..], &index.to_string()],
            )?;
            self.counters.outstanding_deltapart_fetches += 1;
            // Parts carry mostly file data, so they queue at content
            // priority.
            self.content_queue.push_back(QueuedFetch {
                url,
                expected_max_size: header.size,
                target: FetchTarget::DeltaPart(DeltaPartRequest {
                    expected: header.digest,
                    objects: header.objects.clone(),
                    delta_name: name.clone(),
                    index,
                }),
            });
            self.pump();
        }
        Ok(())
    }

    /// Fallbacks are fetched as ordinary loose objects, through the same
    /// requested-set guards the scanner uses, so overlap with a concurrent
    /// scan stays a single request.
    fn process_delta_fallback(&mut self, fallback: &DeltaFallback) {
        self.counters.total_deltapart_size += fallback.compressed_size;
        let name = ObjectName::new(fallback.digest, fallback.kind);
        if self.repo.has_object(&name) {
            return;
        }
        if fallback.kind.is_meta() {
            if !self.requested_metadata.contains(&fallback.digest) {
                self.requested_metadata.insert(fallback.digest);
                let fetch_detached = fallback.kind == ObjectKind::Commit;
                self.enqueue_object_request(fallback.digest, fallback.kind, fetch_detached, false);
            }
        } else if !self.requested_content.contains(&fallback.digest) {
            self.requested_content.insert(fallback.digest);
            self.enqueue_object_request(fallback.digest, ObjectKind::File, false, false);
        }
    }

    pub(crate) fn delta_part_fetch_done(
        &mut self,
        part: DeltaPartRequest,
        result: Result<tempfile::NamedTempFile, strata_fetch::FetchError>,
    ) {
        dec(&mut self.counters.outstanding_deltapart_fetches);
        self.counters.fetched_deltaparts += 1;
        tracing::debug!(delta = %part.delta_name, part = part.index, "delta part fetch complete");

        let temp = match result {
            Ok(temp) => temp,
            Err(err) => return self.latch_error(err.into()),
        };
        let bytes = match std::fs::read(temp.path()) {
            Ok(bytes) => bytes,
            Err(err) => return self.latch_error(PullError::Storage(err.to_string())),
        };
        drop(temp);

        let actual = ObjectId::digest(&bytes);
        if actual != part.expected {
            return self.latch_error(PullError::Integrity(format!(
                "Corrupted static delta part; checksum expected='{}' actual='{actual}'",
                part.expected
            )));
        }

        self.counters.outstanding_deltapart_writes += 1;
        let repo = Arc::clone(&self.repo);
        self.inflight.push(Box::pin(async move {
            let result = execute_delta_part(&repo, &part.objects, &bytes);
            PipelineEvent::DeltaPartWritten {
                expected: part.expected,
                result,
            }
        }));
    }
}

/// Apply one delta part: decompress the payload and write every framed
/// object through the store's digest-verified paths. Frames must stay
/// within the object list announced by the part header.
///
/// Frame layout: `u8` kind tag, 32-byte digest, `u64` big-endian length,
/// then that many bytes of the object's canonical encoding.
pub(crate) fn execute_delta_part(
    repo: &Repository,
    objects: &[ObjectName],
    payload: &[u8],
) -> Result<(), PullError> {
    let mut decoder = flate2::read::ZlibDecoder::new(payload);
    loop {
        let mut tag = [0u8; 1];
        match decoder.read(&mut tag) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => return Err(PullError::InvalidFormat(format!("bad delta part: {err}"))),
        }
        let kind = ObjectKind::from_wire_tag(tag[0])?;

        let mut digest = [0u8; 32];
        read_frame(&mut decoder, &mut digest)?;
        let expected = ObjectId::from_bytes(digest);
        let frame_name = ObjectName::new(expected, kind);
        if !objects.contains(&frame_name) {
            return Err(PullError::InvalidFormat(format!(
                "delta part carries unlisted object {frame_name}"
            )));
        }

        let mut len_buf = [0u8; 8];
        read_frame(&mut decoder, &mut len_buf)?;
        let len = usize::try_from(u64::from_be_bytes(len_buf))
            .map_err(|_| PullError::InvalidFormat("oversized delta frame".to_string()))?;
        let mut object = vec![0u8; len];
        read_frame(&mut decoder, &mut object)?;

        let written = if kind.is_meta() {
            repo.write_metadata(kind, &object)?
        } else {
            repo.write_content_canonical(&object)?
        };
        if written != expected {
            return Err(PullError::Integrity(format!(
                "Corrupted object in static delta part; checksum expected='{expected}' actual='{written}'"
            )));
        }
    }
    Ok(())
}

fn read_frame<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), PullError> {
    reader
        .read_exact(buf)
        .map_err(|err| PullError::InvalidFormat(format!("truncated delta part: {err}")))
}
