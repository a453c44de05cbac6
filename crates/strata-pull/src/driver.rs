//! The pull driver.
//!
//! Phase 1 discovers refs: open the remote (or its metalink resolution),
//! require the archive-z2 mode, fetch and verify the summary, and resolve
//! every requested ref to a commit digest. Phase 2 transfers objects: scan
//! the requested commits, prefer static deltas where offered, and drain
//! the fetch/write pipeline to quiescence before committing the
//! transaction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt as _;
use tokio::time::MissedTickBehavior;
use url::Url;

use strata_fetch::{CancelToken, Fetcher, DEFAULT_CONCURRENT_REQUESTS};
use strata_repo::{Keyring, RepoConfig, RepoMode, Repository, SignatureList, Transaction};
use strata_types::{validate_checksum_string, validate_refname, ObjectId, ObjectKind, ObjectName};

use crate::pipeline::PipelineEvent;
use crate::progress::ProgressSender;
use crate::state::{PullPhase, PullState};
use crate::summary::Summary;
use crate::uri::compose;
use crate::PullError;

#[derive(Debug, Clone, Copy, Default)]
pub struct PullFlags {
    /// Write refs under the global namespace and persist the summary
    /// locally; used to clone a remote repository.
    pub mirror: bool,
    /// Stop after the commit object itself.
    pub commit_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Refs or commit digests to fetch. Empty in mirror mode means every
    /// ref in the summary; empty otherwise means the remote's configured
    /// branches.
    pub refs: Vec<String>,
    /// Restrict file fetches to this absolute subtree.
    pub subdir: Option<String>,
    pub flags: PullFlags,
    /// `-1` pulls all ancestors, `0` none, `n > 0` up to `n`.
    pub depth: i32,
    pub disable_static_deltas: bool,
    /// Names refs locally when the base URL is not a configured remote.
    pub override_remote_name: Option<String>,
    pub concurrency: Option<usize>,
    /// Pre-resolved metalink: where the summary was found, and its bytes.
    /// Metalink resolution itself happens outside the engine.
    pub metalink: Option<ResolvedMetalink>,
}

#[derive(Debug, Clone)]
pub struct ResolvedMetalink {
    pub summary_url: Url,
    pub summary: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PullStats {
    pub fetched_metadata: u32,
    pub fetched_content: u32,
    pub fetched_delta_parts: u32,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    /// Refs updated by this pull, under their local names.
    pub updated_refs: BTreeMap<String, ObjectId>,
}

/// Pull refs from a remote into `repo`. `remote` is either the name of a
/// configured remote or a base URL.
pub async fn pull_with_options(
    repo: &Arc<Repository>,
    remote: &str,
    options: PullOptions,
    progress: Option<ProgressSender>,
    cancel: CancelToken,
) -> Result<PullStats, PullError> {
    if options.depth < -1 {
        return Err(PullError::Config(format!(
            "depth must be -1 or greater, got {}",
            options.depth
        )));
    }
    if let Some(subdir) = &options.subdir {
        if !subdir.starts_with('/') {
            return Err(PullError::Config(format!(
                "subdir must be an absolute path, got '{subdir}'"
            )));
        }
    }
    if cancel.is_cancelled() {
        return Err(PullError::Cancelled);
    }

    let remote_cfg = repo.remote_config(remote).cloned();
    let (base_str, remote_name, mut verify_commit, mut verify_summary, configured_branches) =
        match &remote_cfg {
            Some(cfg) => (
                cfg.url.clone(),
                Some(remote.to_string()),
                cfg.verify,
                cfg.verify_summary,
                cfg.branches.clone(),
            ),
            None => (
                remote.to_string(),
                options.override_remote_name.clone(),
                false,
                false,
                Vec::new(),
            ),
        };

    let mut preset_summary = None;
    let base_url = if let Some(metalink) = &options.metalink {
        let mut url = metalink.summary_url.clone();
        url.path_segments_mut()
            .map_err(|_| PullError::Config(format!("bad metalink URL '{}'", metalink.summary_url)))?
            .pop();
        preset_summary = Some(metalink.summary.clone());
        url
    } else {
        if remote_cfg.as_ref().is_some_and(|cfg| cfg.metalink.is_some()) {
            return Err(PullError::Config(format!(
                "remote '{remote}' is configured with a metalink; resolve it and pass the result as PullOptions::metalink"
            )));
        }
        Url::parse(&base_str)
            .map_err(|_| PullError::Config(format!("Failed to parse url '{base_str}'")))?
    };

    // Local-path remotes import objects directly and skip verification,
    // matching local pull semantics.
    let mut remote_repo_local = None;
    if base_url.scheme() == "file" {
        let path = base_url
            .to_file_path()
            .map_err(|_| PullError::Config(format!("bad file URL '{base_url}'")))?;
        remote_repo_local = Some(Arc::new(Repository::open(path).map_err(PullError::from)?));
        verify_commit = false;
        verify_summary = false;
    }

    let concurrency = options.concurrency.unwrap_or(DEFAULT_CONCURRENT_REQUESTS);
    let make_fetcher = |cancel: &CancelToken| -> Result<Fetcher, PullError> {
        Ok(Fetcher::new(repo.tmp_dir(), cancel.clone())?.with_concurrency(concurrency))
    };

    let keyring = match &remote_name {
        Some(name) => repo.keyring_for_remote(name)?,
        None => Keyring::empty(),
    };

    let mut state = PullState {
        repo: Arc::clone(repo),
        fetcher: Arc::new(make_fetcher(&cancel)?),
        base_url,
        remote_name,
        remote_repo_local,
        phase: PullPhase::FetchingRefs,
        progress,
        cancel: cancel.clone(),
        verify_commit,
        verify_summary,
        keyring,
        summary: None,
        summary_bytes: None,
        summary_sig_bytes: None,
        summary_delta_checksums: BTreeMap::new(),
        superblocks: Vec::new(),
        expected_commit_sizes: Default::default(),
        commit_to_depth: Default::default(),
        scanned_metadata: Default::default(),
        requested_metadata: Default::default(),
        requested_content: Default::default(),
        counters: Default::default(),
        first_error: None,
        maxdepth: options.depth,
        subdir: options.subdir.clone(),
        is_mirror: options.flags.mirror,
        is_commit_only: options.flags.commit_only,
        transaction_resuming: false,
        commitpartial_exists: false,
        fetching_sync_uri: None,
        start_time: Instant::now(),
        final_status: None,
        inflight: FuturesUnordered::new(),
        meta_queue: Default::default(),
        content_queue: Default::default(),
        inflight_fetches: 0,
    };
    state.publish_progress(false);

    // ---- Phase 1: refs ----

    if state.remote_repo_local.is_none() {
        let url = compose(&state.base_url, &["config"])?;
        let text = state.fetch_utf8_sync(url).await?;
        let remote_config = RepoConfig::from_toml_str(&text)
            .map_err(|err| PullError::InvalidFormat(format!("bad remote config: {err}")))?;
        if remote_config.core.mode != RepoMode::ArchiveZ2 {
            return Err(PullError::Protocol(format!(
                "Can't pull from archives with mode \"{}\"",
                remote_config.core.mode
            )));
        }
    }

    let mut summary_bytes = preset_summary.take();
    if summary_bytes.is_none() {
        let url = compose(&state.base_url, &["summary"])?;
        summary_bytes = state.fetch_membuf_sync(url, true).await?;
    }
    if summary_bytes.is_none() && state.verify_summary {
        return Err(PullError::Trust(
            "Summary verification enabled, but no summary found on remote".to_string(),
        ));
    }
    let mut summary_sig_bytes = None;
    if summary_bytes.is_some() {
        let url = compose(&state.base_url, &["summary.sig"])?;
        summary_sig_bytes = state.fetch_membuf_sync(url, true).await?;
    }
    if summary_bytes.is_some() && summary_sig_bytes.is_none() && state.verify_summary {
        return Err(PullError::Trust(
            "Summary verification enabled, but no summary.sig found on remote".to_string(),
        ));
    }
    if let (Some(summary), Some(sig)) = (&summary_bytes, &summary_sig_bytes) {
        let text = std::str::from_utf8(sig)
            .map_err(|_| PullError::InvalidFormat("summary.sig is not UTF-8".to_string()))?;
        let signatures = SignatureList::from_text(text)?;
        if state.keyring.count_valid(summary, &signatures) == 0 {
            return Err(PullError::Trust(
                "Signatures found, but none are in trusted keyring".to_string(),
            ));
        }
    }
    if let Some(bytes) = &summary_bytes {
        let summary = Summary::parse(bytes)?;
        state.summary_delta_checksums = summary.delta_checksums()?;
        state.summary = Some(summary);
    }
    state.summary_bytes = summary_bytes;
    state.summary_sig_bytes = summary_sig_bytes;

    // Partition the requested refs into names and bare commit digests.
    let mut ref_names: Vec<String> = Vec::new();
    let mut commits_to_fetch: Vec<ObjectId> = Vec::new();
    if options.flags.mirror && options.refs.is_empty() && configured_branches.is_empty() {
        let Some(summary) = &state.summary else {
            return Err(PullError::Config(
                "Fetching all refs was requested in mirror mode, but remote repository does not have a summary"
                    .to_string(),
            ));
        };
        for (name, _) in &summary.refs {
            validate_refname(name)?;
            ref_names.push(name.clone());
        }
    } else if !options.refs.is_empty() {
        for branch in &options.refs {
            if validate_checksum_string(branch).is_ok() {
                commits_to_fetch.push(ObjectId::from_hex(branch)?);
            } else {
                validate_refname(branch)?;
                ref_names.push(branch.clone());
            }
        }
    } else {
        if configured_branches.is_empty() {
            return Err(PullError::Config(format!(
                "No configured branches for remote '{remote}'"
            )));
        }
        for branch in &configured_branches {
            validate_refname(branch)?;
            ref_names.push(branch.clone());
        }
    }

    let mut requested_refs: BTreeMap<String, ObjectId> = BTreeMap::new();
    for name in &ref_names {
        let target = if let Some(summary) = &state.summary {
            let (id, size) = summary.lookup(name)?;
            state.expected_commit_sizes.insert(id, size);
            id
        } else {
            let url = compose(&state.base_url, &["refs", "heads", name])?;
            let text = state.fetch_utf8_sync(url).await?;
            let trimmed = text.trim_end();
            validate_checksum_string(trimmed).map_err(|_| {
                PullError::InvalidFormat(format!(
                    "ref '{name}' does not resolve to a checksum: '{trimmed}'"
                ))
            })?;
            ObjectId::from_hex(trimmed)?
        };
        requested_refs.insert(name.clone(), target);
    }

    // May not exist in repositories created before pull state tracking.
    std::fs::create_dir_all(repo.state_dir())
        .map_err(|err| PullError::Storage(err.to_string()))?;

    // ---- Phase 2: objects ----

    state.phase = PullPhase::FetchingObjects;
    // The phase-1 fetcher served blocking requests; object transfer gets a
    // fresh one.
    state.fetcher = Arc::new(make_fetcher(&cancel)?);

    let txn = Transaction::begin(Arc::clone(repo))?;
    state.transaction_resuming = txn.resuming();

    if let Err(err) =
        run_object_phase(&mut state, &requested_refs, &commits_to_fetch, &options).await
    {
        txn.abort();
        state.publish_progress(true);
        return Err(err);
    }

    let mut txn = txn;
    let mut updated_refs = BTreeMap::new();
    for (refname, target) in &requested_refs {
        let local_name = local_ref_name(state.remote_name.as_deref(), state.is_mirror, refname);
        let previous = repo.resolve_rev(&local_name, true)?;
        if previous == Some(*target) {
            continue;
        }
        let ref_remote = if state.is_mirror {
            None
        } else {
            state.remote_name.as_deref()
        };
        txn.set_ref(ref_remote, refname, *target);
        updated_refs.insert(local_name, *target);
    }

    if state.is_mirror {
        if let Some(bytes) = &state.summary_bytes {
            repo.write_repo_file("summary", bytes)?;
            if let Some(sig) = &state.summary_sig_bytes {
                repo.write_repo_file("summary.sig", sig)?;
            }
        }
    }

    txn.commit()?;

    let bytes_transferred = state.fetcher.bytes_transferred();
    let elapsed = state.start_time.elapsed();
    state.final_status = Some(transfer_status(&state, bytes_transferred, elapsed));

    // Completed commits are whole now; drop their partial markers. A
    // subdir or commit-only pull deliberately leaves subgraphs incomplete,
    // so the markers stay.
    if options.subdir.is_none() && !options.flags.commit_only {
        for target in requested_refs.values() {
            repo.clear_commit_partial(*target)?;
        }
        for id in &commits_to_fetch {
            repo.clear_commit_partial(*id)?;
        }
    }

    state.publish_progress(true);
    tracing::info!(
        refs = requested_refs.len(),
        fetched_metadata = state.counters.fetched_metadata,
        fetched_content = state.counters.fetched_content,
        bytes_transferred,
        "pull complete"
    );

    Ok(PullStats {
        fetched_metadata: state.counters.fetched_metadata,
        fetched_content: state.counters.fetched_content,
        fetched_delta_parts: state.counters.fetched_deltaparts,
        bytes_transferred,
        elapsed,
        updated_refs,
    })
}

async fn run_object_phase(
    state: &mut PullState,
    requested_refs: &BTreeMap<String, ObjectId>,
    commits_to_fetch: &[ObjectId],
    options: &PullOptions,
) -> Result<(), PullError> {
    for id in commits_to_fetch {
        state.scan_object(ObjectName::new(*id, ObjectKind::Commit), 0)?;
    }

    for (refname, to) in requested_refs {
        let local_name = local_ref_name(state.remote_name.as_deref(), state.is_mirror, refname);
        let from = state.repo.resolve_rev(&local_name, true)?;

        let mut superblock = None;
        if !options.disable_static_deltas && from != Some(*to) {
            superblock = state.request_delta_superblock(from, *to).await?;
        }
        match superblock {
            Some(superblock) => {
                tracing::debug!(refname = %refname, "using static delta");
                state.process_delta(&superblock)?;
                state.superblocks.push(superblock);
            }
            None => {
                tracing::debug!(refname = %refname, "no static delta; scanning commit");
                state.scan_object(ObjectName::new(*to, ObjectKind::Commit), 0)?;
            }
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    state.pump();
    while !state.termination() {
        enum Step {
            Event(Option<PipelineEvent>),
            Tick,
        }
        let step = tokio::select! {
            event = state.inflight.next(), if !state.inflight.is_empty() => Step::Event(event),
            _ = ticker.tick() => Step::Tick,
        };
        match step {
            Step::Event(Some(event)) => {
                state.dispatch(event);
                state.pump();
            }
            Step::Event(None) => {}
            Step::Tick => state.publish_progress(false),
        }
    }

    if let Some(err) = state.first_error.take() {
        return Err(err);
    }
    debug_assert!(state.counters.all_idle(), "pipeline terminated with work outstanding");
    Ok(())
}

fn local_ref_name(remote_name: Option<&str>, mirror: bool, refname: &str) -> String {
    match remote_name {
        Some(remote) if !mirror => format!("{remote}/{refname}"),
        _ => refname.to_string(),
    }
}

fn transfer_status(state: &PullState, bytes: u64, elapsed: Duration) -> String {
    let counters = &state.counters;
    let mut status = if counters.fetched_deltaparts > 0 {
        format!(
            "{} delta parts, {} loose fetched",
            counters.fetched_deltaparts,
            counters.fetched_metadata + counters.fetched_content
        )
    } else {
        format!(
            "{} metadata, {} content objects fetched",
            counters.fetched_metadata, counters.fetched_content
        )
    };
    let (amount, unit) = if bytes < 1024 {
        (bytes, "B")
    } else {
        (bytes / 1024, "KiB")
    };
    status.push_str(&format!(
        "; {amount} {unit} transferred in {} seconds",
        elapsed.as_secs()
    ));
    status
}
