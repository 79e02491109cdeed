//! JSON Phase (spec §4.5): runs the metadata-only subprocess, decodes the
//! emitted JSON, invokes the Filter Engine, and either commits the video as
//! skipped (deleting the JSON artifact) or persists it for the Video Phase.

use crate::error::PipelineError;
use crate::filter::{self, Decision};
use crate::models::{Channel, ChannelUrl, Download, DownloadStatus, Filter, MoveOp, Video};
use crate::store::Store;
use crate::tracker::{RetryPolicy, Tracker};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

pub(crate) struct JsonPhaseOutcome {
    pub(crate) video: Video,
    pub(crate) proceed: bool,
}

pub(crate) struct JsonPhaseRules<'a> {
    pub(crate) filters: &'a [Filter],
    pub(crate) move_ops: &'a [MoveOp],
}

fn extract_canonical_fields(video: &mut Video, metadata: &BTreeMap<String, serde_json::Value>) {
    video.title = metadata
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    video.description = metadata
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let raw_upload_date = metadata.get("upload_date").and_then(|v| v.as_str()).unwrap_or_default();
    video.upload_date = if raw_upload_date.len() == 8 && raw_upload_date.chars().all(|c| c.is_ascii_digit()) {
        raw_upload_date.to_string()
    } else {
        String::new()
    };
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn run(
    store: &Store,
    tracker: &Tracker,
    downloader_bin: &str,
    channel: &Channel,
    channel_url: &ChannelUrl,
    candidate_url: String,
    json_output_dir: &str,
    policy: &RetryPolicy,
    rules: &JsonPhaseRules<'_>,
    token: &CancellationToken,
) -> Result<JsonPhaseOutcome, PipelineError> {
    let mut video = Video::new(channel.id, channel_url.id, candidate_url);
    video.settings = channel.settings.merged_with(&channel_url.settings);
    video.metarr_args = channel.metarr_args.merged_with(&channel_url.metarr_args);

    let json_path_str = tracker
        .execute_json_download(0, downloader_bin, channel_url, json_output_dir, policy, token)
        .await?;

    let json_path = std::path::PathBuf::from(&json_path_str);
    let contents = std::fs::read_to_string(&json_path)
        .map_err(|e| PipelineError::Verification(anyhow::anyhow!("failed to read JSON artifact {json_path:?}: {e}")))?;
    let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)
        .map_err(|e| PipelineError::Verification(anyhow::anyhow!("invalid JSON in {json_path:?}: {e}")))?;

    if metadata.is_empty() {
        return Err(PipelineError::Verification(anyhow::anyhow!(
            "JSON artifact {json_path:?} decoded to an empty map"
        )));
    }

    extract_canonical_fields(&mut video, &metadata);
    video.metadata = metadata.clone();
    video.json_path = Some(json_path_str.clone());

    let merged_filters = rules
        .filters
        .iter()
        .filter(|f| f.channel_url.is_empty() || f.channel_url.eq_ignore_ascii_case(&channel_url.url))
        .cloned()
        .collect::<Vec<_>>();

    let decision: Decision = filter::decide(&metadata, &merged_filters, &channel_url.url);
    let from_date = video.settings.from_date.as_deref().and_then(|s| s.parse().ok());
    let to_date = video.settings.to_date.as_deref().and_then(|s| s.parse().ok());
    let in_window = filter::in_date_window(video.upload_date_int(), from_date, to_date);

    if !decision.admitted || !in_window {
        if decision.fail_hard {
            event!(Level::DEBUG, "Video {} failed a must-filter hard, removing JSON artifact", video.url);
        }
        let _ = std::fs::remove_file(&json_path);
        video.json_path = None;
        video.finished = true;
        video.was_skipped = true;

        let id = store
            .add_video(&video)
            .await
            .map_err(PipelineError::Store)?;
        video.id = id;
        store
            .update_video(
                &video,
                &Download {
                    video_id: id,
                    status: DownloadStatus::Completed,
                    pct: 100.0,
                    updated_at: chrono::Utc::now(),
                },
            )
            .await
            .map_err(PipelineError::Store)?;

        return Ok(JsonPhaseOutcome { video, proceed: false });
    }

    video.move_op_output_dir = filter::resolve_move_op(rules.move_ops, &metadata, &channel_url.url);

    let id = store.add_video(&video).await.map_err(PipelineError::Store)?;
    video.id = id;

    Ok(JsonPhaseOutcome { video, proceed: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_upload_date_only_when_well_formed() {
        let mut video = Video::new(1, 1, "u".to_string());
        let mut m = BTreeMap::new();
        m.insert("upload_date".to_string(), serde_json::Value::String("20240115".to_string()));
        extract_canonical_fields(&mut video, &m);
        assert_eq!(video.upload_date, "20240115");

        let mut video2 = Video::new(1, 1, "u".to_string());
        let mut m2 = BTreeMap::new();
        m2.insert("upload_date".to_string(), serde_json::Value::String("bad".to_string()));
        extract_canonical_fields(&mut video2, &m2);
        assert_eq!(video2.upload_date, "");
    }
}
