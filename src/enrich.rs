//! The enrichment run: resolve every pending row, checkpointing as it goes

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::config::Config;
use crate::resolve::{resolve_unless_stopped, MetadataSource, Tier};
use crate::sheet;
use crate::types::TitleRecord;

/// Counts reported at the end of a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total_rows: usize,
    pub pending: usize,
    pub processed: usize,
    pub from_primary: usize,
    pub from_secondary: usize,
    pub unresolved: usize,
    pub highlighted: usize,
    pub interrupted: bool,
}

fn progress_bar(len: usize, quiet: bool) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if quiet {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} (ETA: {eta}) {wide_msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => log::debug!("Progress template rejected: {}", e),
    }
    pb
}

fn checkpoint(output: &Path, records: &[TitleRecord], processed: usize) {
    match sheet::save_table(output, records, false) {
        Ok(()) => log::debug!("Checkpoint after {} titles", processed),
        // The batch keeps going; the next checkpoint or the final save retries
        Err(e) => log::error!("Checkpoint to {} failed: {:#}", output.display(), e),
    }
}

/// Resolve all rows of `input` that still lack a link and write them to `output`.
///
/// Rows already resolved in an existing `output` are kept as they are. The table
/// is saved every `checkpoint_every` titles and once more at the end. When
/// `stop` is raised the loop ends before the next title (or before the Jikan
/// fallback of the current one), saves, and skips the highlight pass.
pub fn run_enrich<S: MetadataSource + ?Sized>(
    sources: &S,
    config: &Config,
    input: &Path,
    output: &Path,
    stop: &AtomicBool,
    quiet: bool,
) -> Result<RunSummary> {
    let mut records = sheet::open_with_resume(input, output)?;
    let todo = sheet::pending(&records);

    let mut summary = RunSummary {
        total_rows: records.len(),
        pending: todo.len(),
        ..Default::default()
    };
    log::info!(
        "{} titles loaded, {} need resolving",
        summary.total_rows,
        summary.pending
    );

    let pb = progress_bar(todo.len(), quiet);
    for (n, &idx) in todo.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            summary.interrupted = true;
            break;
        }

        let title = records[idx].title.clone();
        pb.set_message(title.clone());

        let Some((resolution, tier)) = resolve_unless_stopped(sources, &title, stop) else {
            // Stopped between tiers; the title stays pending for the next run
            summary.interrupted = true;
            break;
        };
        pb.println(format!("  {} -> {} [{}]", title, resolution.link, tier.as_str()));
        records[idx].apply(resolution);

        match tier {
            Tier::Primary => summary.from_primary += 1,
            Tier::Secondary => summary.from_secondary += 1,
            Tier::Unresolved => summary.unresolved += 1,
        }
        summary.processed = n + 1;
        pb.inc(1);

        if summary.processed % config.checkpoint_every == 0 {
            checkpoint(output, &records, summary.processed);
        }

        if summary.processed < todo.len() && !stop.load(Ordering::SeqCst) {
            thread::sleep(config.pause_after(summary.processed));
        }
    }
    pb.finish_and_clear();

    sheet::save_table(output, &records, false)?;
    if summary.interrupted {
        log::warn!(
            "Interrupted after {} of {} titles; progress saved to {}",
            summary.processed,
            summary.pending,
            output.display()
        );
        return Ok(summary);
    }

    summary.highlighted = sheet::highlight_unresolved(output)?;
    Ok(summary)
}
