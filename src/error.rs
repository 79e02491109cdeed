/// Distinguished error kinds the Channel Pipeline needs to inspect when
/// aggregating job results (spec §7). Everywhere else in the crate plain
/// `anyhow::Result` is used and propagated with `?`, matching the teacher's
/// near-universal use of `anyhow` for errors nobody downstream branches on.
#[derive(Debug)]
pub(crate) enum PipelineError {
    /// Bad template, unknown tag, bad file path. Fails fast per-video; the
    /// pipeline continues with other jobs.
    Configuration(anyhow::Error),
    /// Non-zero exit or partial output after retries exhausted.
    NetworkTransient(anyhow::Error),
    /// Provider-block sentinel observed. `bot_pause_channel` tells the
    /// pipeline whether to cancel sibling workers.
    ProviderBlock {
        bot_pause_channel: bool,
        source: anyhow::Error,
    },
    /// Missing/empty/invalid on-disk artifacts after a download claimed
    /// success. Fatal for the video, retryable only on next scheduler tick.
    Verification(anyhow::Error),
    /// Unique-constraint violation or I/O error from the Store.
    Store(anyhow::Error),
    /// The run's cancellation token fired before or during this job.
    Cancelled(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Configuration(e) => write!(f, "configuration error: {e}"),
            PipelineError::NetworkTransient(e) => write!(f, "transient network error: {e}"),
            PipelineError::ProviderBlock { source, .. } => {
                write!(f, "provider block: {source}")
            }
            PipelineError::Verification(e) => write!(f, "verification failed: {e}"),
            PipelineError::Store(e) => write!(f, "store error: {e}"),
            PipelineError::Cancelled(cause) => write!(f, "skipped: {cause}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    pub(crate) const fn bot_pause_channel(&self) -> bool {
        matches!(
            self,
            PipelineError::ProviderBlock {
                bot_pause_channel: true,
                ..
            }
        )
    }

    pub(crate) const fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled(_))
    }
}
