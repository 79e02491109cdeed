//! Channel Pipeline (spec §4.9): for one channel's one URL, discovers
//! candidates, diffs against known state, and drives a bounded worker pool
//! through JSON -> Filter -> Video -> Post-process -> mark-complete.

use crate::botdetect::BlockState;
use crate::error::PipelineError;
use crate::filter;
use crate::json_phase::{self, JsonPhaseRules};
use crate::models::{Channel, ChannelUrl, Download, DownloadStatus, Filter, FilteredOpSet, MoveOp};
use crate::postprocess;
use crate::resolver;
use crate::scraper::Scraper;
use crate::store::Store;
use crate::tracker::{RetryPolicy, Tracker};
use crate::video_phase;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

pub(crate) struct PipelineRules {
    pub(crate) filters: Vec<Filter>,
    pub(crate) move_ops: Vec<MoveOp>,
    /// File- and database-declared meta/filename-op sets are kept apart
    /// here (rather than pre-merged) so `run_one_job` can apply the
    /// file-overrides-database rule (spec §4.8 step 2) to the *matched*
    /// ops rather than the op-set declarations themselves.
    pub(crate) file_meta_ops: Vec<FilteredOpSet>,
    pub(crate) db_meta_ops: Vec<FilteredOpSet>,
    pub(crate) file_filename_ops: Vec<FilteredOpSet>,
    pub(crate) db_filename_ops: Vec<FilteredOpSet>,
}

#[derive(Default)]
pub(crate) struct PipelineOutcome {
    pub(crate) succeeded: usize,
    pub(crate) downloaded: usize,
    pub(crate) errors: Vec<String>,
}

struct JobResult {
    downloaded: bool,
    error: Option<String>,
    /// Shutdown/bot-trip fallout: excluded from both the success and error
    /// tallies in `run_channel_url`'s aggregation.
    cancelled: bool,
}

#[allow(clippy::too_many_arguments)]
async fn run_one_job(
    store: &Store,
    tracker: &Tracker,
    downloader_bin: &str,
    postprocessor_bin: &str,
    channel: &Channel,
    channel_url: &ChannelUrl,
    candidate_url: String,
    json_output_dir: &str,
    video_output_dir: &str,
    policy: &RetryPolicy,
    rules: &PipelineRules,
    token: &CancellationToken,
) -> Result<bool, PipelineError> {
    if token.is_cancelled() {
        return Err(PipelineError::Cancelled(candidate_url));
    }

    let json_rules = JsonPhaseRules {
        filters: &rules.filters,
        move_ops: &rules.move_ops,
    };

    let outcome = json_phase::run(
        store,
        tracker,
        downloader_bin,
        channel,
        channel_url,
        candidate_url,
        json_output_dir,
        policy,
        &json_rules,
        token,
    )
    .await?;

    if !outcome.proceed {
        return Ok(false);
    }

    let mut video = outcome.video;
    video_phase::run(tracker, downloader_bin, channel_url, &mut video, video_output_dir, policy, token).await?;

    // File entries win over database entries on conflicting (field, op_type)
    // keys; non-conflicting op types coexist (spec §4.8 step 2).
    let meta_ops = postprocess::merge_ops(
        &filter::matched_ops(&rules.file_meta_ops, &video.metadata, &channel_url.url),
        &filter::matched_ops(&rules.db_meta_ops, &video.metadata, &channel_url.url),
    );
    let filename_ops = postprocess::merge_ops(
        &filter::matched_ops(&rules.file_filename_ops, &video.metadata, &channel_url.url),
        &filter::matched_ops(&rules.db_filename_ops, &video.metadata, &channel_url.url),
    );

    let post_result = postprocess::run(
        postprocessor_bin,
        channel,
        channel_url,
        &video,
        &meta_ops,
        &filename_ops,
        None,
        token,
    )
    .await
    .map_err(PipelineError::Configuration)?;

    if post_result.ran && let Some(renamed) = post_result.renamed_paths.last() {
        video.video_path = Some(renamed.clone());
    }

    video.finished = true;
    video.was_skipped = false;

    store
        .update_video(
            &video,
            &Download {
                video_id: video.id,
                status: DownloadStatus::Completed,
                pct: 100.0,
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .map_err(PipelineError::Store)?;

    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    job_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    result_tx: mpsc::Sender<JobResult>,
    store: Store,
    tracker: Arc<Tracker>,
    block_state: Arc<BlockState>,
    downloader_bin: String,
    postprocessor_bin: String,
    channel: Channel,
    channel_url: ChannelUrl,
    json_output_dir: String,
    video_output_dir: String,
    rules: Arc<PipelineRules>,
    policy: Arc<RetryPolicy>,
    token: CancellationToken,
) {
    loop {
        let candidate_url = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(candidate_url) = candidate_url else {
            break;
        };

        let result = run_one_job(
            &store,
            &tracker,
            &downloader_bin,
            &postprocessor_bin,
            &channel,
            &channel_url,
            candidate_url.clone(),
            &json_output_dir,
            &video_output_dir,
            &policy,
            &rules,
            &token,
        )
        .await;

        let job_result = match result {
            Ok(downloaded) => JobResult {
                downloaded,
                error: None,
                cancelled: false,
            },
            Err(e) => {
                if e.bot_pause_channel() {
                    event!(Level::WARN, "Bot-block tripped on {}, cancelling sibling workers", channel_url.url);
                    store.set_paused(channel.id, true).await.ok();
                    block_state.clear(&channel_url.url);
                    token.cancel();
                }
                // A cancelled job is shutdown/bot-trip fallout, not a
                // reportable failure: don't let it count against the
                // channel URL's error tally.
                if e.is_cancelled() {
                    event!(Level::DEBUG, "Skipping {candidate_url}: {e}");
                    JobResult {
                        downloaded: false,
                        error: None,
                        cancelled: true,
                    }
                } else {
                    JobResult {
                        downloaded: false,
                        error: Some(format!("{candidate_url}: {e}")),
                        cancelled: false,
                    }
                }
            }
        };

        if result_tx.send(job_result).await.is_err() {
            break;
        }
    }
}

/// Run the full pipeline for one channel URL. Returns the aggregated result
/// counts (spec §4.9 step 7).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_channel_url(
    store: &Store,
    tracker: &Arc<Tracker>,
    block_state: &Arc<BlockState>,
    scraper: &dyn Scraper,
    downloader_bin: &str,
    postprocessor_bin: &str,
    default_tmp_dir: &str,
    channel: &Channel,
    channel_url: &ChannelUrl,
    rules: Arc<PipelineRules>,
    policy: Arc<RetryPolicy>,
    run_token: CancellationToken,
) -> anyhow::Result<PipelineOutcome> {
    let merged_settings = channel.settings.merged_with(&channel_url.settings);

    let json_output_dir = resolver::resolve(
        merged_settings
            .json_dir
            .as_deref()
            .unwrap_or(&format!("{default_tmp_dir}/json/{{{{channel_name}}}}")),
        channel,
        None,
        postprocessor_bin,
    )?;
    let video_output_dir = resolver::resolve(
        merged_settings
            .output_dir
            .as_deref()
            .unwrap_or(&format!("{default_tmp_dir}/video/{{{{channel_name}}}}")),
        channel,
        None,
        postprocessor_bin,
    )?;

    let candidates = scraper.candidate_urls(channel_url).await?;
    let grabbed = store.load_grabbed_urls(channel.id).await?;
    let fresh: Vec<String> = candidates.into_iter().filter(|c| !grabbed.contains(c)).collect();

    event!(
        Level::INFO,
        "Channel '{}' URL {}: {} fresh candidates, {} already known",
        channel.name,
        channel_url.url,
        fresh.len(),
        grabbed.len(),
    );

    if fresh.is_empty() {
        return Ok(PipelineOutcome::default());
    }

    let concurrency = merged_settings.concurrency.unwrap_or(1).max(1);
    let (job_tx, job_rx) = mpsc::channel::<String>(fresh.len());
    let (result_tx, mut result_rx) = mpsc::channel::<JobResult>(fresh.len());
    let job_rx = Arc::new(Mutex::new(job_rx));

    for url in fresh {
        job_tx.send(url).await.ok();
    }
    drop(job_tx);

    let mut worker_handles = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        worker_handles.push(tokio::spawn(worker_loop(
            Arc::clone(&job_rx),
            result_tx.clone(),
            store.clone(),
            Arc::clone(tracker),
            Arc::clone(block_state),
            downloader_bin.to_string(),
            postprocessor_bin.to_string(),
            channel.clone(),
            channel_url.clone(),
            json_output_dir.clone(),
            video_output_dir.clone(),
            Arc::clone(&rules),
            Arc::clone(&policy),
            run_token.clone(),
        )));
    }
    drop(result_tx);

    let watcher = tokio::spawn(async move {
        for h in worker_handles {
            let _ = h.await;
        }
    });

    let mut outcome = PipelineOutcome::default();
    while let Some(result) = result_rx.recv().await {
        if result.cancelled {
            continue;
        }
        match result.error {
            Some(err) => outcome.errors.push(err),
            None => {
                outcome.succeeded += 1;
                if result.downloaded {
                    outcome.downloaded += 1;
                }
            }
        }
    }
    let _ = watcher.await;

    if outcome.errors.is_empty() {
        store.update_last_scan(channel.id).await?;
    }

    Ok(outcome)
}
