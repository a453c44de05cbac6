//! Pull progress snapshots.
//!
//! The driver publishes a [`PullProgress`] snapshot once per second (and at
//! phase boundaries) over a watch channel; renderers sample the receiver at
//! whatever rate suits them.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    pub outstanding_fetches: u32,
    pub outstanding_writes: u32,
    /// Completed object fetches (metadata + content).
    pub fetched: u32,
    /// Requested object fetches (metadata + content).
    pub requested: u32,
    pub scanned_metadata: u32,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    pub fetched_delta_parts: u32,
    pub total_delta_parts: u32,
    pub total_delta_part_size: u64,
    pub total_delta_superblocks: u32,
    /// Metadata is fetched ahead of content; these report that frontier.
    pub outstanding_metadata_fetches: u32,
    pub metadata_fetched: u32,
    /// Human status: the URI currently blocking a synchronous fetch, or the
    /// final transfer summary.
    pub status: Option<String>,
    pub done: bool,
}

pub type ProgressSender = watch::Sender<PullProgress>;
pub type ProgressReceiver = watch::Receiver<PullProgress>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    watch::channel(PullProgress::default())
}
