//! Shared state of one pull.
//!
//! Everything here is owned by the driver task and mutated only between
//! its await points; fetch and write futures never touch it. They report
//! back through [`PipelineEvent`](crate::pipeline::PipelineEvent)s drained
//! by the driver loop.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use url::Url;

use strata_fetch::{CancelToken, Fetcher};
use strata_repo::{Keyring, Repository};
use strata_types::{ObjectId, ObjectName, MAX_METADATA_SIZE};

use crate::delta::DeltaSuperblock;
use crate::pipeline::{PipelineEvent, QueuedFetch};
use crate::progress::{ProgressSender, PullProgress};
use crate::summary::Summary;
use crate::PullError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullPhase {
    FetchingRefs,
    FetchingObjects,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub outstanding_metadata_fetches: u32,
    pub outstanding_metadata_writes: u32,
    pub outstanding_content_fetches: u32,
    pub outstanding_content_writes: u32,
    pub outstanding_deltapart_fetches: u32,
    pub outstanding_deltapart_writes: u32,
    pub requested_metadata: u32,
    pub requested_content: u32,
    pub fetched_metadata: u32,
    pub fetched_content: u32,
    pub fetched_deltaparts: u32,
    pub total_deltaparts: u32,
    pub total_deltapart_size: u64,
    pub scanned_metadata: u32,
}

impl Counters {
    pub fn outstanding_fetches(&self) -> u32 {
        self.outstanding_metadata_fetches
            + self.outstanding_content_fetches
            + self.outstanding_deltapart_fetches
    }

    pub fn outstanding_writes(&self) -> u32 {
        self.outstanding_metadata_writes
            + self.outstanding_content_writes
            + self.outstanding_deltapart_writes
    }

    pub fn all_idle(&self) -> bool {
        self.outstanding_fetches() == 0 && self.outstanding_writes() == 0
    }
}

pub(crate) fn dec(counter: &mut u32) {
    debug_assert!(*counter > 0, "counter underflow");
    *counter = counter.saturating_sub(1);
}

pub(crate) struct PullState {
    pub repo: Arc<Repository>,
    pub fetcher: Arc<Fetcher>,
    pub base_url: Url,
    pub remote_name: Option<String>,
    pub remote_repo_local: Option<Arc<Repository>>,
    pub phase: PullPhase,
    pub progress: Option<ProgressSender>,
    pub cancel: CancelToken,

    pub verify_commit: bool,
    pub verify_summary: bool,
    pub keyring: Keyring,

    pub summary: Option<Summary>,
    pub summary_bytes: Option<Vec<u8>>,
    pub summary_sig_bytes: Option<Vec<u8>>,
    pub summary_delta_checksums: BTreeMap<String, ObjectId>,
    pub superblocks: Vec<DeltaSuperblock>,

    pub expected_commit_sizes: HashMap<ObjectId, u64>,
    pub commit_to_depth: HashMap<ObjectId, i32>,
    pub scanned_metadata: HashSet<ObjectName>,
    pub requested_metadata: HashSet<ObjectId>,
    pub requested_content: HashSet<ObjectId>,

    pub counters: Counters,
    pub first_error: Option<PullError>,

    pub maxdepth: i32,
    pub subdir: Option<String>,
    pub is_mirror: bool,
    pub is_commit_only: bool,
    pub transaction_resuming: bool,
    pub commitpartial_exists: bool,

    pub fetching_sync_uri: Option<Url>,
    pub start_time: Instant,
    pub final_status: Option<String>,

    pub inflight: FuturesUnordered<BoxFuture<'static, PipelineEvent>>,
    pub meta_queue: VecDeque<QueuedFetch>,
    pub content_queue: VecDeque<QueuedFetch>,
    pub inflight_fetches: usize,
}

impl PullState {
    /// Latch the first error; later ones are logged and dropped. Latching
    /// also fires the cancellation token so in-flight requests unwind
    /// quickly while the driver drains to quiescence.
    pub fn latch_error(&mut self, err: PullError) {
        if self.first_error.is_none() {
            tracing::debug!(error = %err, "pull failed; draining outstanding requests");
            self.first_error = Some(err);
            self.cancel.cancel();
        } else {
            tracing::debug!(error = %err, "dropping error after first");
        }
    }

    pub fn caught_error(&self) -> bool {
        self.first_error.is_some()
    }

    /// Whether the driver loop should stop iterating.
    pub fn termination(&self) -> bool {
        if self.caught_error() {
            // Queued requests are never started after an error, so only
            // in-flight futures need to finish.
            return self.inflight.is_empty();
        }
        match self.phase {
            PullPhase::FetchingRefs => self.fetching_sync_uri.is_none(),
            PullPhase::FetchingObjects => {
                self.counters.all_idle() && self.fetching_sync_uri.is_none()
            }
        }
    }

    /// Fetch one URI into memory, driving the loop no further; the URI is
    /// exposed to the progress reporter while the request blocks.
    pub async fn fetch_membuf_sync(
        &mut self,
        url: Url,
        allow_noent: bool,
    ) -> Result<Option<Vec<u8>>, PullError> {
        self.fetching_sync_uri = Some(url.clone());
        self.publish_progress(false);
        let result = self
            .fetcher
            .fetch_membuf(&url, allow_noent, MAX_METADATA_SIZE)
            .await;
        self.fetching_sync_uri = None;
        self.publish_progress(false);
        Ok(result?)
    }

    pub async fn fetch_utf8_sync(&mut self, url: Url) -> Result<String, PullError> {
        self.fetching_sync_uri = Some(url.clone());
        self.publish_progress(false);
        let result = self.fetcher.fetch_utf8(&url).await;
        self.fetching_sync_uri = None;
        self.publish_progress(false);
        Ok(result?)
    }

    pub fn publish_progress(&self, done: bool) {
        let Some(sender) = &self.progress else { return };
        let counters = &self.counters;
        let status = self
            .final_status
            .clone()
            .or_else(|| self.fetching_sync_uri.as_ref().map(|u| format!("Requesting {u}")));
        let _ = sender.send(PullProgress {
            outstanding_fetches: counters.outstanding_fetches(),
            outstanding_writes: counters.outstanding_writes(),
            fetched: counters.fetched_metadata + counters.fetched_content,
            requested: counters.requested_metadata + counters.requested_content,
            scanned_metadata: counters.scanned_metadata,
            bytes_transferred: self.fetcher.bytes_transferred(),
            elapsed: self.start_time.elapsed(),
            fetched_delta_parts: counters.fetched_deltaparts,
            total_delta_parts: counters.total_deltaparts,
            total_delta_part_size: counters.total_deltapart_size,
            total_delta_superblocks: self.superblocks.len() as u32,
            outstanding_metadata_fetches: counters.outstanding_metadata_fetches,
            metadata_fetched: counters.fetched_metadata,
            status,
            done,
        });
    }
}
