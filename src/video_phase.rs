//! Video Phase (spec §4.6): runs the media subprocess, captures the
//! produced path, and verifies on-disk artifacts before flipping the video
//! to "media present".

use crate::error::PipelineError;
use crate::models::{ChannelUrl, Video};
use crate::tracker::{RetryPolicy, Tracker};
use tokio_util::sync::CancellationToken;

/// Filesystem barrier: brief sleep before verifying artifacts, matching
/// spec §4.6 step 4 ("sleep briefly, then verify").
const FS_BARRIER: std::time::Duration = std::time::Duration::from_millis(250);

fn verify_artifact(path: &str) -> anyhow::Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| anyhow::anyhow!("missing artifact {path}: {e}"))?;
    if !meta.is_file() {
        anyhow::bail!("artifact {path} is not a regular file");
    }
    if meta.len() == 0 {
        anyhow::bail!("artifact {path} is empty");
    }
    Ok(())
}

/// Run the media download for `video`, writing `video.video_path` on
/// success. Caller is responsible for persisting the result.
pub(crate) async fn run(
    tracker: &Tracker,
    downloader_bin: &str,
    channel_url: &ChannelUrl,
    video: &mut Video,
    video_output_dir: &str,
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    let video_path = tracker
        .execute_video_download(video.id, downloader_bin, channel_url, video_output_dir, policy, token)
        .await?;

    tokio::time::sleep(FS_BARRIER).await;

    verify_artifact(&video_path).map_err(PipelineError::Verification)?;
    if let Some(json_path) = &video.json_path {
        verify_artifact(json_path).map_err(PipelineError::Verification)?;
        let contents = std::fs::read_to_string(json_path)
            .map_err(|e| PipelineError::Verification(anyhow::anyhow!("failed to re-read JSON artifact: {e}")))?;
        let _: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| PipelineError::Verification(anyhow::anyhow!("JSON artifact no longer valid: {e}")))?;
    }

    video.video_path = Some(video_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn verify_rejects_missing_file() {
        assert!(verify_artifact("/nonexistent/path/xyz.mp4").is_err());
    }

    #[test]
    fn verify_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        std::fs::File::create(&path).unwrap();
        assert!(verify_artifact(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn verify_accepts_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"data").unwrap();
        assert!(verify_artifact(path.to_str().unwrap()).is_ok());
    }
}
