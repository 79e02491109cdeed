//! Post-Process Invoker (spec §4.8): builds the `metarr` argument vector
//! from channel + video settings, merges file- and database-declared op
//! lists, runs the subprocess, and recovers renamed/relocated filenames
//! from its stdout.

use crate::models::{Channel, ChannelUrl, Video};
use crate::resolver;
use std::process::Stdio;
use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// Op types allowed to coexist between file- and database-declared lists on
/// the same `(field, op_type)` tuple (spec §4.8).
const NON_CONFLICTING_OP_TYPES: &[&str] = &["append", "copy-to", "prefix", "replace"];

pub(crate) struct PostProcessResult {
    pub(crate) ran: bool,
    pub(crate) renamed_paths: Vec<String>,
}

fn op_key(op: &str) -> (String, String) {
    let mut parts = op.splitn(3, ':');
    let field = parts.next().unwrap_or_default().to_string();
    let op_type = parts.next().unwrap_or_default().to_string();
    (field, op_type)
}

/// Merge file-loaded and database-declared op lists: file entries override
/// database entries on the same `(field, op_type)` unless that op_type is
/// non-conflicting, then both survive. Final result is deduplicated by the
/// full op string.
pub(crate) fn merge_ops(file_ops: &[String], db_ops: &[String]) -> Vec<String> {
    let file_keys: std::collections::HashSet<(String, String)> = file_ops.iter().map(|o| op_key(o)).collect();

    let mut merged: Vec<String> = file_ops.to_vec();
    for op in db_ops {
        let key = op_key(op);
        if NON_CONFLICTING_OP_TYPES.contains(&key.1.as_str()) || !file_keys.contains(&key) {
            merged.push(op.clone());
        }
    }

    let mut seen = std::collections::HashSet::new();
    merged.retain(|op| seen.insert(op.clone()));
    merged
}

fn quote_if_comma(s: &str) -> String {
    if s.contains(',') {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

fn resolve_output_dir(
    process_override: Option<&str>,
    metarr_args: &crate::models::MetarrArgs,
    video: &Video,
    channel_url: &ChannelUrl,
    channel: &Channel,
) -> String {
    process_override
        .map(str::to_string)
        .or_else(|| metarr_args.output_dir_override.clone())
        .or_else(|| video.move_op_output_dir.clone())
        .or_else(|| channel_url.settings.output_dir.clone())
        .or_else(|| channel.settings.output_dir.clone())
        .unwrap_or_else(|| ".".to_string())
}

fn build_args(
    postprocessor_bin: &str,
    channel: &Channel,
    channel_url: &ChannelUrl,
    video: &Video,
    meta_ops: &[String],
    filename_ops: &[String],
    process_output_override: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let metarr_args = channel.metarr_args.merged_with(&channel_url.metarr_args).merged_with(&video.metarr_args);
    let video_path = video
        .video_path
        .clone()
        .ok_or_else(|| anyhow::anyhow!("post-process invoked without a video path"))?;
    let meta_path = video
        .json_path
        .clone()
        .ok_or_else(|| anyhow::anyhow!("post-process invoked without a metadata path"))?;

    let output_dir = resolver::resolve(
        &resolve_output_dir(process_output_override, &metarr_args, video, channel_url, channel),
        channel,
        Some(video),
        postprocessor_bin,
    )?;

    let mut args = vec!["--video-file".to_string(), quote_if_comma(&video_path)];
    args.push("--meta-file".to_string());
    args.push(quote_if_comma(&meta_path));
    args.push("--output-directory".to_string());
    args.push(quote_if_comma(&output_dir));

    if !meta_ops.is_empty() {
        args.push("--meta-ops".to_string());
        args.push(meta_ops.iter().map(|s| quote_if_comma(s)).collect::<Vec<_>>().join(","));
    }
    if !filename_ops.is_empty() {
        args.push("--filename-ops".to_string());
        args.push(
            filename_ops
                .iter()
                .map(|s| quote_if_comma(s))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    if metarr_args.meta_overwrite {
        args.push("--meta-overwrite".to_string());
    }
    if let Some(min_free_mem) = &metarr_args.min_free_mem {
        args.push("--min-free-mem".to_string());
        args.push(min_free_mem.clone());
    }
    if let Some(max_cpu) = &metarr_args.max_cpu {
        args.push("--max-cpu".to_string());
        args.push(max_cpu.clone());
    }
    if let Some(rename_style) = &metarr_args.rename_style {
        args.push("--rename-style".to_string());
        args.push(rename_style.clone());
    }
    if let Some(output_ext) = &metarr_args.output_ext {
        args.push("--output-ext".to_string());
        args.push(output_ext.clone());
    }
    if metarr_args.purge_metafile {
        args.push("--purge-metafile".to_string());
    }
    if let Some(gpu) = &metarr_args.transcode_gpu {
        args.push("--transcode-gpu".to_string());
        args.push(gpu.clone());
    }
    if let Some(vc) = &metarr_args.transcode_video_codec {
        args.push("--transcode-video-codecs".to_string());
        args.push(vc.clone());
    }
    if let Some(ac) = &metarr_args.transcode_audio_codec {
        args.push("--transcode-audio-codecs".to_string());
        args.push(ac.clone());
    }
    if let Some(q) = &metarr_args.transcode_quality {
        args.push("--transcode-quality".to_string());
        args.push(q.clone());
    }
    if let Some(vf) = &metarr_args.transcode_video_filter {
        args.push("--transcode-video-filter".to_string());
        args.push(vf.clone());
    }
    if let Some(extra) = &metarr_args.extra_ffmpeg_args {
        args.push("--extra-ffmpeg-args".to_string());
        args.push(extra.clone());
    }
    if metarr_args.debug {
        args.push("--debug".to_string());
    }

    Ok(args)
}

/// Spawn the post-processor and recover renamed/relocated filenames from
/// its stdout. Returns `ran: false` (no error) if the binary is not on the
/// search path (spec §4.8 final paragraph).
pub(crate) async fn run(
    postprocessor_bin: &str,
    channel: &Channel,
    channel_url: &ChannelUrl,
    video: &Video,
    meta_ops: &[String],
    filename_ops: &[String],
    process_output_override: Option<&str>,
    token: &CancellationToken,
) -> anyhow::Result<PostProcessResult> {
    if !resolver::postprocessor_on_path(postprocessor_bin) {
        event!(
            Level::DEBUG,
            "Post-processor '{postprocessor_bin}' not found on search path, skipping for video {}",
            video.id
        );
        return Ok(PostProcessResult {
            ran: false,
            renamed_paths: vec![],
        });
    }

    let args = build_args(
        postprocessor_bin,
        channel,
        channel_url,
        video,
        meta_ops,
        filename_ops,
        process_output_override,
    )?;

    event!(Level::DEBUG, "Running post-processor for video {}: {} {}", video.id, postprocessor_bin, args.join(" "));

    let mut child = Command::new(postprocessor_bin)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no stdout handle"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow::anyhow!("no stderr handle"))?;
    let mut stdout_lines = tokio::io::BufReader::new(stdout).lines();
    let mut stderr_lines = tokio::io::BufReader::new(stderr).lines();

    let mut renamed_paths = Vec::new();
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
                anyhow::bail!("post-process cancelled for video {}", video.id);
            }
            line = stdout_lines.next_line(), if !stdout_done => {
                match line? {
                    Some(l) => {
                        event!(Level::DEBUG, "metarr stdout: {l}");
                        renamed_paths.push(l);
                    }
                    None => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line? {
                    Some(l) => event!(Level::INFO, "metarr: {l}"),
                    None => stderr_done = true,
                }
            }
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        anyhow::bail!("post-processor exited with failure for video {}", video.id);
    }

    Ok(PostProcessResult {
        ran: true,
        renamed_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_file_entry_over_conflicting_db_entry() {
        let file_ops = vec!["title:replace-all:old:new".to_string()];
        let db_ops = vec!["title:replace-all:old:different".to_string()];
        let merged = merge_ops(&file_ops, &db_ops);
        assert_eq!(merged, vec!["title:replace-all:old:new".to_string()]);
    }

    #[test]
    fn merge_keeps_both_for_nonconflicting_op_type() {
        let file_ops = vec!["title:append:-hd".to_string()];
        let db_ops = vec!["title:append:-4k".to_string()];
        let merged = merge_ops(&file_ops, &db_ops);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_dedupes_identical_entries() {
        let file_ops = vec!["title:prefix:X".to_string()];
        let db_ops = vec!["title:prefix:X".to_string()];
        assert_eq!(merge_ops(&file_ops, &db_ops).len(), 1);
    }

    #[test]
    fn quoting_wraps_commas() {
        assert_eq!(quote_if_comma("a,b"), "\"a,b\"");
        assert_eq!(quote_if_comma("ab"), "ab");
    }
}
