//! CLI command implementations.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use strata_fetch::CancelToken;
use strata_pull::{progress_channel, pull_with_options, PullFlags, PullOptions, PullProgress};
use strata_repo::{RemoteConfig, RepoMode, Repository};

pub fn init(repo_path: &Path, mode: &str) -> Result<()> {
    let mode = match mode {
        "bare" => RepoMode::Bare,
        "archive-z2" => RepoMode::ArchiveZ2,
        other => return Err(miette!("unknown repository mode '{other}'")),
    };
    Repository::init(repo_path, mode).into_diagnostic()?;
    println!(
        "{} Initialized {} repository at {}",
        style("✓").green(),
        style(mode).cyan(),
        repo_path.display()
    );
    Ok(())
}

pub struct PullArgs {
    pub refs: Vec<String>,
    pub depth: i32,
    pub subdir: Option<String>,
    pub mirror: bool,
    pub commit_only: bool,
    pub disable_static_deltas: bool,
    pub remote_name: Option<String>,
    pub jobs: Option<usize>,
    pub quiet: bool,
}

pub async fn pull(repo_path: &Path, remote: &str, args: PullArgs) -> Result<()> {
    let repo = Arc::new(Repository::open(repo_path).into_diagnostic()?);

    let options = PullOptions {
        refs: args.refs,
        subdir: args.subdir,
        flags: PullFlags {
            mirror: args.mirror,
            commit_only: args.commit_only,
        },
        depth: args.depth,
        disable_static_deltas: args.disable_static_deltas,
        override_remote_name: args.remote_name,
        concurrency: args.jobs,
        metalink: None,
    };

    let cancel = CancelToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_cancel.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = progress_channel();
    let renderer = if args.quiet {
        None
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.blue} {msg}")
                .unwrap(),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Some(tokio::spawn(async move {
            while progress_rx.changed().await.is_ok() {
                let snapshot = progress_rx.borrow().clone();
                bar.set_message(render_progress(&snapshot));
                if snapshot.done {
                    break;
                }
            }
            bar.finish_and_clear();
        }))
    };

    let result = pull_with_options(&repo, remote, options, Some(progress_tx), cancel).await;
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }
    let stats = result.into_diagnostic()?;

    println!(
        "{} Pulled {} refs: {} metadata, {} content, {} delta parts; {} bytes in {:.1?}",
        style("✓").green(),
        style(stats.updated_refs.len()).cyan(),
        stats.fetched_metadata,
        stats.fetched_content,
        stats.fetched_delta_parts,
        stats.bytes_transferred,
        stats.elapsed
    );
    for (name, target) in &stats.updated_refs {
        println!("  {} -> {}", style(name).cyan(), style(target).dim());
    }
    Ok(())
}

fn render_progress(snapshot: &PullProgress) -> String {
    if let Some(status) = &snapshot.status {
        return status.clone();
    }
    if snapshot.total_delta_parts > 0 {
        format!(
            "Receiving delta parts: {}/{} parts, {} KiB",
            snapshot.fetched_delta_parts,
            snapshot.total_delta_parts,
            snapshot.bytes_transferred / 1024
        )
    } else {
        format!(
            "Receiving objects: {}/{} fetched, {} outstanding writes, {} KiB",
            snapshot.fetched,
            snapshot.requested,
            snapshot.outstanding_writes,
            snapshot.bytes_transferred / 1024
        )
    }
}

pub fn refs(repo_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path).into_diagnostic()?;
    let refs = repo.list_refs().into_diagnostic()?;
    if refs.is_empty() {
        println!("No refs");
        return Ok(());
    }
    for (name, target) in refs {
        println!("{} {}", style(&target).dim(), name);
    }
    Ok(())
}

pub fn remote_add(
    repo_path: &Path,
    name: &str,
    url: &str,
    verify: bool,
    verify_summary: bool,
    branches: Vec<String>,
    keyring: Option<&Path>,
) -> Result<()> {
    let mut repo = Repository::open(repo_path).into_diagnostic()?;
    repo.add_remote(
        name,
        RemoteConfig {
            url: url.to_string(),
            verify,
            verify_summary,
            branches,
            metalink: None,
        },
    )
    .into_diagnostic()?;

    if let Some(keyring) = keyring {
        let text = std::fs::read_to_string(keyring).into_diagnostic()?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            repo.add_trusted_key(name, line).into_diagnostic()?;
        }
    }

    println!(
        "{} Added remote {} -> {}",
        style("✓").green(),
        style(name).cyan(),
        url
    );
    Ok(())
}

pub fn remote_list(repo_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path).into_diagnostic()?;
    let remotes = &repo.config().remotes;
    if remotes.is_empty() {
        println!("No remotes");
        return Ok(());
    }
    for (name, remote) in remotes {
        let mut flags = Vec::new();
        if remote.verify {
            flags.push("verify");
        }
        if remote.verify_summary {
            flags.push("verify-summary");
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{} {}{}", style(name).cyan(), remote.url, style(suffix).dim());
    }
    Ok(())
}
