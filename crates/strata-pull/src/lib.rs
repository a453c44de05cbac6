//! The Strata pull engine.
//!
//! Transfers the transitive closure of requested commits from a remote
//! repository (HTTP or local path) into a local one, verifying every
//! object digest, preferring static deltas where the remote offers them,
//! and keeping interrupted pulls resumable through commit-partial markers
//! and the repository transaction marker.
//!
//! The entry point is [`pull_with_options`]. Scheduling is cooperative:
//! one driver task owns all pull state and drains fetch/write completions
//! from a single event stream, so no callback ever races another.

mod delta;
mod driver;
mod error;
mod pipeline;
mod progress;
mod scan;
mod state;
mod summary;
mod uri;

pub use delta::{delta_name, DeltaFallback, DeltaPartHeader, DeltaSuperblock};
pub use driver::{
    pull_with_options, PullFlags, PullOptions, PullStats, ResolvedMetalink,
};
pub use error::PullError;
pub use progress::{progress_channel, ProgressReceiver, ProgressSender, PullProgress};
pub use summary::{Summary, SummaryRef, STATIC_DELTAS_KEY};
