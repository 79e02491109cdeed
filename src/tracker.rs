//! Download Tracker (spec §4.4): schedules, rate-limits, and reports
//! progress for the two subprocess-backed download kinds, and classifies
//! provider blocks in their stderr (spec §4.7). Line-streaming technique
//! follows `examples/other_examples/.../Szpadel-LocalTube/src/ytdlp.rs`.

use crate::botdetect::{stderr_has_bot_sentinel, BlockState, Transition};
use crate::error::PipelineError;
use crate::models::{AuthContext, ChannelUrl, CookieSource, Download, DownloadStatus};
use crate::store::Store;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

pub(crate) const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "flv", "m4v"];

#[derive(Clone, Copy, Debug)]
pub(crate) enum DownloadKind {
    Json,
    Video,
}

pub(crate) struct RetryPolicy {
    pub(crate) max_retries: u8,
    pub(crate) retry_interval: std::time::Duration,
}

struct TrackerEntry {
    status: DownloadStatus,
    pct: f64,
    last_flush: std::time::Instant,
}

/// Process-wide registry keyed by video id (spec §4.4). Flushes batched
/// status updates to the Store at most once per second per video.
pub(crate) struct Tracker {
    store: Store,
    registry: Mutex<HashMap<i64, TrackerEntry>>,
    block_state: Arc<BlockState>,
}

impl Tracker {
    pub(crate) fn new(store: Store, block_state: Arc<BlockState>) -> Tracker {
        Tracker {
            store,
            registry: Mutex::new(HashMap::new()),
            block_state,
        }
    }

    fn record_progress(&self, video_id: i64, status: DownloadStatus, pct: f64) -> bool {
        let mut registry = match self.registry.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let entry = registry.entry(video_id).or_insert_with(|| TrackerEntry {
            status: DownloadStatus::Pending,
            pct: 0.0,
            last_flush: std::time::Instant::now() - std::time::Duration::from_secs(2),
        });
        entry.status = status;
        entry.pct = pct;

        let should_flush = entry.last_flush.elapsed() >= std::time::Duration::from_secs(1);
        if should_flush {
            entry.last_flush = std::time::Instant::now();
        }
        should_flush
    }

    async fn flush(&self, video_id: i64, status: DownloadStatus, pct: f64) {
        let download = Download {
            video_id,
            status,
            pct,
            updated_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.set_download_status(&download).await {
            event!(Level::WARN, "Tracker failed to flush download status for video {video_id}: {e}");
        }
    }

    /// Parse a rough `[download]  NN.N%` progress line from yt-dlp stdout.
    fn parse_progress_pct(line: &str) -> Option<f64> {
        let marker = line.find('%')?;
        let prefix = &line[..marker];
        let token = prefix.rsplit(char::is_whitespace).next()?;
        token.parse::<f64>().ok()
    }

    fn build_auth_args(args: &mut Vec<String>, channel_url: &ChannelUrl) {
        if let (Some(user), Some(pass)) = (&channel_url.username, &channel_url.password) {
            args.push("--username".to_string());
            args.push(user.clone());
            args.push("--password".to_string());
            args.push(pass.clone());
        } else {
            match channel_url.settings.cookie_source {
                Some(CookieSource::Browser) => {
                    if let Some(browser) = &channel_url.settings.cookie_value {
                        args.push("--cookies-from-browser".to_string());
                        args.push(browser.clone());
                    }
                }
                Some(CookieSource::File) => {
                    if let Some(path) = &channel_url.settings.cookie_value {
                        args.push("--cookies".to_string());
                        args.push(path.clone());
                    }
                }
                None => {}
            }
        }
        if let Some(ext) = &channel_url.settings.external_downloader {
            args.push("--external-downloader".to_string());
            args.push(ext.clone());
            if let Some(ext_args) = &channel_url.settings.external_downloader_args {
                args.push("--external-downloader-args".to_string());
                args.push(ext_args.clone());
            }
        }
    }

    fn build_json_args(channel_url: &ChannelUrl, output_dir: &str, retries: u8) -> Vec<String> {
        let mut args = vec![
            "--skip-download".to_string(),
            "--write-info-json".to_string(),
            "-P".to_string(),
            output_dir.to_string(),
            "--restrict-filenames".to_string(),
            "-o".to_string(),
            "%(title)s.%(ext)s".to_string(),
        ];
        Self::build_auth_args(&mut args, channel_url);
        if let Some(max_filesize) = &channel_url.settings.max_filesize {
            args.push("--max-filesize".to_string());
            args.push(max_filesize.clone());
        }
        args.push("--retries".to_string());
        args.push(retries.to_string());
        args.push(channel_url.url.clone());
        args
    }

    fn build_video_args(channel_url: &ChannelUrl, output_dir: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("{output_dir}/%(title)s.%(ext)s"),
            "--restrict-filenames".to_string(),
            "--retries".to_string(),
            "5".to_string(),
            "--fragment-retries".to_string(),
            "10".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
            "--extractor-retries".to_string(),
            "3".to_string(),
            "--print".to_string(),
            "after_move:%(filepath)s".to_string(),
        ];
        Self::build_auth_args(&mut args, channel_url);
        if let Some(sleep) = channel_url.settings.sleep_requests_secs {
            args.push("--sleep-requests".to_string());
            args.push(sleep.to_string());
        }
        args.push(channel_url.url.clone());
        args
    }

    /// Run one subprocess attempt, streaming stdout/stderr concurrently.
    /// Returns `(exit_success, stdout_lines, stderr_text)`.
    async fn run_once(
        &self,
        video_id: i64,
        downloader_bin: &str,
        args: &[String],
        token: &CancellationToken,
    ) -> anyhow::Result<(bool, Vec<String>, String)> {
        let mut child = Command::new(downloader_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no stdout handle"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow::anyhow!("no stderr handle"))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut collected_stdout = Vec::new();
        let mut collected_stderr = String::new();
        let mut stdout_done = false;
        let mut stderr_done = false;

        loop {
            if stdout_done && stderr_done {
                break;
            }
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    child.start_kill().ok();
                    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
                    anyhow::bail!("cancelled");
                }
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line? {
                        Some(l) => {
                            event!(Level::DEBUG, "{downloader_bin} stdout: {l}");
                            if let Some(pct) = Self::parse_progress_pct(&l)
                                && self.record_progress(video_id, DownloadStatus::InProgress, pct)
                            {
                                self.flush(video_id, DownloadStatus::InProgress, pct).await;
                            }
                            collected_stdout.push(l);
                        }
                        None => stdout_done = true,
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line? {
                        Some(l) => {
                            event!(Level::DEBUG, "{downloader_bin} stderr: {l}");
                            collected_stderr.push_str(&l);
                            collected_stderr.push('\n');
                        }
                        None => stderr_done = true,
                    }
                }
            }
        }

        let status = child.wait().await?;
        Ok((status.success(), collected_stdout, collected_stderr))
    }

    /// Execute a metadata-only download. Returns the JSON artifact path on
    /// success.
    pub(crate) async fn execute_json_download(
        &self,
        video_id: i64,
        downloader_bin: &str,
        channel_url: &ChannelUrl,
        output_dir: &str,
        policy: &RetryPolicy,
        token: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let auth_context = channel_url.auth_context();
        if self.block_state.is_hard_blocked(&channel_url.url, auth_context) {
            return Err(PipelineError::ProviderBlock {
                bot_pause_channel: true,
                source: anyhow::anyhow!("channel URL is hard-blocked"),
            });
        }

        let args = Self::build_json_args(channel_url, output_dir, policy.max_retries);
        self.run_with_retries(video_id, downloader_bin, &args, channel_url, policy, token, |stdout, _| {
            stdout
                .iter()
                .rev()
                .find_map(|line| line.rsplit_once(": ").map(|(_, path)| path.trim().to_string()))
                .ok_or_else(|| anyhow::anyhow!("no JSON path found in downloader output"))
        })
        .await
    }

    /// Execute a media download. Returns the captured output video path on
    /// success.
    pub(crate) async fn execute_video_download(
        &self,
        video_id: i64,
        downloader_bin: &str,
        channel_url: &ChannelUrl,
        output_dir: &str,
        policy: &RetryPolicy,
        token: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let auth_context = channel_url.auth_context();
        if self.block_state.is_hard_blocked(&channel_url.url, auth_context) {
            return Err(PipelineError::ProviderBlock {
                bot_pause_channel: true,
                source: anyhow::anyhow!("channel URL is hard-blocked"),
            });
        }

        let args = Self::build_video_args(channel_url, output_dir);
        self.run_with_retries(video_id, downloader_bin, &args, channel_url, policy, token, |stdout, _| {
            stdout
                .iter()
                .find(|line| {
                    VIDEO_EXTENSIONS
                        .iter()
                        .any(|ext| line.to_lowercase().ends_with(&format!(".{ext}")))
                })
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("downloader completed without emitting a video path"))
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_with_retries(
        &self,
        video_id: i64,
        downloader_bin: &str,
        args: &[String],
        channel_url: &ChannelUrl,
        policy: &RetryPolicy,
        token: &CancellationToken,
        extract: impl Fn(&[String], &str) -> anyhow::Result<String>,
    ) -> Result<String, PipelineError> {
        let auth_context = channel_url.auth_context();
        let mut attempt = 0u8;

        loop {
            attempt += 1;
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled(channel_url.url.clone()));
            }

            let should_flush = self.record_progress(video_id, DownloadStatus::InProgress, 0.0);
            if should_flush {
                self.flush(video_id, DownloadStatus::InProgress, 0.0).await;
            }

            let run = self.run_once(video_id, downloader_bin, args, token).await;

            match run {
                Ok((true, stdout, stderr)) => {
                    if stderr_has_bot_sentinel(&stderr) {
                        let transition = self.block_state.record_sentinel(
                            &channel_url.url,
                            auth_context,
                            chrono::Utc::now().timestamp(),
                        );
                        if matches!(transition, Transition::NowHardBlocked) {
                            return Err(PipelineError::ProviderBlock {
                                bot_pause_channel: true,
                                source: anyhow::anyhow!("provider block sentinel observed"),
                            });
                        }
                    }

                    return match extract(&stdout, &stderr) {
                        Ok(path) => {
                            self.flush(video_id, DownloadStatus::Completed, 100.0).await;
                            Ok(path)
                        }
                        Err(e) => Err(PipelineError::Verification(e)),
                    };
                }
                Ok((false, _stdout, stderr)) => {
                    if stderr_has_bot_sentinel(&stderr) {
                        let transition = self.block_state.record_sentinel(
                            &channel_url.url,
                            auth_context,
                            chrono::Utc::now().timestamp(),
                        );
                        if matches!(transition, Transition::NowHardBlocked) {
                            return Err(PipelineError::ProviderBlock {
                                bot_pause_channel: true,
                                source: anyhow::anyhow!("provider block sentinel observed"),
                            });
                        }
                    }

                    if attempt >= policy.max_retries {
                        self.block_state.escalate_on_retry_exhaustion(&channel_url.url, auth_context);
                        self.flush(video_id, DownloadStatus::Failed, 0.0).await;
                        return Err(PipelineError::NetworkTransient(anyhow::anyhow!(
                            "downloader exited non-zero after {attempt} attempts: {stderr}"
                        )));
                    }

                    event!(
                        Level::WARN,
                        "Download attempt {attempt}/{} for video {video_id} failed, retrying in {:?}",
                        policy.max_retries,
                        policy.retry_interval,
                    );

                    tokio::select! {
                        () = tokio::time::sleep(policy.retry_interval) => {}
                        () = token.cancelled() => {
                            return Err(PipelineError::Cancelled(channel_url.url.clone()));
                        }
                    }
                }
                Err(e) if e.to_string() == "cancelled" => {
                    return Err(PipelineError::Cancelled(channel_url.url.clone()));
                }
                Err(e) => {
                    if attempt >= policy.max_retries {
                        self.flush(video_id, DownloadStatus::Failed, 0.0).await;
                        return Err(PipelineError::NetworkTransient(e));
                    }
                    tokio::select! {
                        () = tokio::time::sleep(policy.retry_interval) => {}
                        () = token.cancelled() => {
                            return Err(PipelineError::Cancelled(channel_url.url.clone()));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_parsing() {
        assert_eq!(Tracker::parse_progress_pct("[download]  42.5% of 10.00MiB"), Some(42.5));
        assert_eq!(Tracker::parse_progress_pct("no percent here"), None);
    }
}
