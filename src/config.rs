use clap::Parser;

#[derive(Debug, Parser)]
#[command(about, author, version, next_line_help = true)]
/// Process-wide configuration. Subcommand parsing and the config-file schema
/// are external collaborators; this struct only carries the flags the core
/// pipeline needs to boot.
pub(crate) struct Args {
    #[arg(long, env, default_value = "127.0.0.1")]
    /// The IP address the HTTP control surface will bind to.
    pub(crate) listen_ip: String,

    #[arg(long, env, default_value = "22408")]
    /// The port number the HTTP control surface will bind to.
    pub(crate) listen_port: String,

    #[arg(long, env, default_value = "channelrider.db")]
    /// File system path to the embedded SQLite database file.
    pub(crate) db_path: String,

    #[arg(long, env, default_value = "channelrider-tmp")]
    /// File system path to a directory holding per-channel working state
    /// (JSON/video output subdirectories when a channel doesn't override one).
    pub(crate) tmp_dir: String,

    #[arg(long, env, default_value = "filters")]
    /// Directory re-read each run for file-based filter, move-op, and
    /// filtered-op definitions (one JSON document per channel URL).
    pub(crate) rules_dir: String,

    #[arg(long, env, default_value = "4")]
    /// Maximum number of channels processed concurrently across the process.
    pub(crate) max_concurrent_channels: usize,

    #[arg(long, env, default_value = "yt-dlp")]
    /// Name or path of the external downloader executable.
    pub(crate) downloader_bin: String,

    #[arg(long, env, default_value = "metarr")]
    /// Name or path of the external post-processor executable.
    pub(crate) postprocessor_bin: String,

    #[arg(long, env, default_value = "3")]
    /// Maximum retry attempts for a single subprocess invocation.
    pub(crate) max_retries: u8,

    #[arg(long, env, default_value = "30")]
    /// Seconds to wait between retry attempts.
    pub(crate) retry_interval_secs: u64,

    #[arg(long, env, default_value = "60")]
    /// Scheduler wake interval, in seconds.
    pub(crate) scheduler_tick_secs: u64,

    #[arg(long, env)]
    /// Bearer token required on every HTTP control-surface request. Unset
    /// leaves the control surface unauthenticated.
    pub(crate) auth_token: Option<String>,
}
