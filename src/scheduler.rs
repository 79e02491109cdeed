//! Scheduler (spec §4.10): wakes channels whose `last_scan + crawl_freq` has
//! elapsed, serializes the URLs within one channel, and runs channels in
//! parallel up to a process-wide semaphore. Manual invocations bypass the
//! wake predicate but still acquire the same semaphore.

use crate::botdetect::BlockState;
use crate::models::Channel;
use crate::pipeline::{self, PipelineRules};
use crate::rules;
use crate::scraper::{Scraper, YtDlpChannelScraper};
use crate::store::Store;
use crate::tracker::{RetryPolicy, Tracker};
use rand::distr::Distribution;
use rand::prelude::SliceRandom;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

#[derive(Clone)]
pub(crate) struct Scheduler {
    store: Store,
    tracker: Arc<Tracker>,
    block_state: Arc<BlockState>,
    downloader_bin: String,
    postprocessor_bin: String,
    tmp_dir: String,
    rules_dir: String,
    semaphore: Arc<Semaphore>,
    max_retries: u8,
    retry_interval_secs: u64,
    root_token: CancellationToken,
}

impl Scheduler {
    pub(crate) fn new(
        store: Store,
        tracker: Arc<Tracker>,
        block_state: Arc<BlockState>,
        downloader_bin: String,
        postprocessor_bin: String,
        tmp_dir: String,
        rules_dir: String,
        max_concurrent_channels: usize,
        max_retries: u8,
        retry_interval_secs: u64,
        root_token: CancellationToken,
    ) -> Scheduler {
        Scheduler {
            store,
            tracker,
            block_state,
            downloader_bin,
            postprocessor_bin,
            tmp_dir,
            rules_dir,
            semaphore: Arc::new(Semaphore::new(max_concurrent_channels.max(1))),
            max_retries,
            retry_interval_secs,
            root_token,
        }
    }

    async fn load_rules(&self) -> anyhow::Result<Arc<PipelineRules>> {
        let file_rules = rules::load(&self.rules_dir)?;
        let db_filters = self.store.list_filters().await?;
        let db_move_ops = self.store.list_move_ops().await?;
        let db_meta_ops = self.store.list_filtered_meta_ops().await?;
        let db_filename_ops = self.store.list_filtered_filename_ops().await?;

        Ok(Arc::new(PipelineRules {
            filters: rules::merge_filters(&db_filters, &file_rules.filters),
            move_ops: db_move_ops.into_iter().chain(file_rules.move_ops).collect(),
            file_meta_ops: file_rules.meta_ops,
            db_meta_ops,
            file_filename_ops: file_rules.filename_ops,
            db_filename_ops,
        }))
    }

    /// Run a slice of a channel's URLs, serially, against a freshly loaded
    /// rule set and retry policy. Shared by `run_channel` (all URLs) and
    /// `run_channel_url_now` (a single URL, for the on-demand endpoint).
    async fn run_urls(&self, channel: &Channel, channel_urls: &[crate::models::ChannelUrl]) -> (bool, bool) {
        let rules = match self.load_rules().await {
            Ok(r) => r,
            Err(e) => {
                event!(Level::WARN, "Loading rules failed for channel '{}': {e}", channel.name);
                return (false, true);
            }
        };
        let policy = Arc::new(RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: std::time::Duration::from_secs(self.retry_interval_secs),
        });
        let scraper: Box<dyn Scraper> = Box::new(YtDlpChannelScraper {
            downloader_bin: self.downloader_bin.clone(),
        });

        let mut any_downloaded = false;
        let mut any_error = false;
        for channel_url in channel_urls {
            let run_token = self.root_token.child_token();
            let result = pipeline::run_channel_url(
                &self.store,
                &self.tracker,
                &self.block_state,
                scraper.as_ref(),
                &self.downloader_bin,
                &self.postprocessor_bin,
                &self.tmp_dir,
                channel,
                channel_url,
                Arc::clone(&rules),
                Arc::clone(&policy),
                run_token,
            )
            .await;

            match result {
                Ok(outcome) => {
                    if outcome.downloaded > 0 {
                        any_downloaded = true;
                    }
                    if !outcome.errors.is_empty() {
                        any_error = true;
                        for e in &outcome.errors {
                            event!(Level::WARN, "Channel '{}' URL {}: {e}", channel.name, channel_url.url);
                        }
                    }
                }
                Err(e) => {
                    any_error = true;
                    event!(Level::WARN, "Channel '{}' URL {} failed: {e}", channel.name, channel_url.url);
                }
            }
        }

        (any_downloaded, any_error)
    }

    /// Run one channel (all of its URLs, serially) under the semaphore.
    /// Shared by the wake loop and the manual-trigger endpoints (spec
    /// §4.10: "Manual invocations ... bypass the wake predicate but share
    /// the semaphore").
    pub(crate) async fn run_channel(&self, channel: Channel) -> anyhow::Result<()> {
        let _permit = self.semaphore.acquire().await?;
        let (any_downloaded, any_error) = self.run_urls(&channel, &channel.urls).await;

        if any_downloaded && !any_error {
            if let Err(e) = crate::notifier::notify_channel(&self.store, channel.id).await {
                event!(Level::WARN, "Notifier dispatch failed for channel '{}': {e}", channel.name);
            }
        }

        Ok(())
    }

    /// Run a single already-registered channel URL immediately, outside the
    /// wake loop (the `/downloads/ondemand` handler).
    pub(crate) async fn run_channel_url_now(&self, channel_id: i64, channel_url_id: i64) -> anyhow::Result<()> {
        let _permit = self.semaphore.acquire().await?;
        let Some(channel) = self.store.load_channel_by_id(channel_id).await? else {
            anyhow::bail!("channel {channel_id} no longer exists");
        };
        let Some(channel_url) = channel.urls.iter().find(|u| u.id == channel_url_id).cloned() else {
            anyhow::bail!("channel URL {channel_url_id} no longer exists on channel {channel_id}");
        };

        let (any_downloaded, any_error) = self.run_urls(&channel, std::slice::from_ref(&channel_url)).await;

        if any_downloaded && !any_error {
            if let Err(e) = crate::notifier::notify_channel(&self.store, channel.id).await {
                event!(Level::WARN, "Notifier dispatch failed for channel '{}': {e}", channel.name);
            }
        }

        Ok(())
    }

    /// Drive the wake loop until the root token is cancelled.
    pub(crate) async fn run(&self, tick: std::time::Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                () = self.root_token.cancelled() => {
                    event!(Level::INFO, "Scheduler shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.tick(tick).await;
                }
            }
        }
    }

    // Spreads this tick's due channels across (roughly) the first half of the
    // tick interval with random jitter, so outbound requests don't all land
    // on the wire in the same instant (ported from the teacher's
    // `shuf_channels_gen_sleeps`).
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn shuffle_and_jitter(mut due: Vec<Channel>, tick: std::time::Duration) -> Vec<(Channel, u64)> {
        if due.is_empty() {
            return Vec::new();
        }
        let mut rng = rand::rng();
        due.shuffle(&mut rng);

        let dur_secs = tick.as_secs_f64();
        let step_secs = dur_secs / (2.0 * due.len() as f64);
        let jitter_end = step_secs / 2.0;
        let sleeps: Vec<u64> = match rand::distr::Uniform::new_inclusive(-jitter_end, jitter_end) {
            Ok(range) => range
                .sample_iter(&mut rng)
                .take(due.len())
                .map(|j: f64| (step_secs + j).max(0.0).floor() as u64)
                .collect(),
            Err(_) => vec![0; due.len()],
        };

        due.into_iter().zip(sleeps).collect()
    }

    async fn tick(&self, tick: std::time::Duration) {
        let due = match self.store.list_due_channels().await {
            Ok(d) => d,
            Err(e) => {
                event!(Level::WARN, "Scheduler failed to list due channels: {e}");
                return;
            }
        };

        for (channel, delay_secs) in Self::shuffle_and_jitter(due, tick) {
            let name = channel.name.clone();
            let scheduler = self.clone();
            tokio::spawn(async move {
                if delay_secs > 0 {
                    tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
                }
                if let Err(e) = scheduler.run_channel(channel).await {
                    event!(Level::WARN, "Scheduled run for channel '{name}' failed: {e}");
                }
            });
        }
    }
}
