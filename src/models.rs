use std::collections::BTreeMap;

/// Per-channel knobs, overridable at the channel-URL and per-video level.
/// Stored as a serialized JSON blob (spec §4.1): opaque to the schema,
/// mutated via read-modify-write.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct Settings {
    pub(crate) output_dir: Option<String>,
    pub(crate) json_dir: Option<String>,
    pub(crate) cookie_source: Option<CookieSource>,
    pub(crate) cookie_value: Option<String>,
    pub(crate) max_filesize: Option<String>,
    pub(crate) external_downloader: Option<String>,
    pub(crate) external_downloader_args: Option<String>,
    pub(crate) concurrency: Option<usize>,
    pub(crate) crawl_freq_secs: Option<i64>,
    pub(crate) from_date: Option<String>,
    pub(crate) to_date: Option<String>,
    pub(crate) sleep_requests_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) enum CookieSource {
    Browser,
    File,
}

impl Settings {
    /// Merge `self` (less specific) with `other` (more specific); any field
    /// set in `other` wins. Used to layer channel -> channel-URL -> video.
    pub(crate) fn merged_with(&self, other: &Settings) -> Settings {
        Settings {
            output_dir: other.output_dir.clone().or_else(|| self.output_dir.clone()),
            json_dir: other.json_dir.clone().or_else(|| self.json_dir.clone()),
            cookie_source: other.cookie_source.or(self.cookie_source),
            cookie_value: other.cookie_value.clone().or_else(|| self.cookie_value.clone()),
            max_filesize: other.max_filesize.clone().or_else(|| self.max_filesize.clone()),
            external_downloader: other
                .external_downloader
                .clone()
                .or_else(|| self.external_downloader.clone()),
            external_downloader_args: other
                .external_downloader_args
                .clone()
                .or_else(|| self.external_downloader_args.clone()),
            concurrency: other.concurrency.or(self.concurrency),
            crawl_freq_secs: other.crawl_freq_secs.or(self.crawl_freq_secs),
            from_date: other.from_date.clone().or_else(|| self.from_date.clone()),
            to_date: other.to_date.clone().or_else(|| self.to_date.clone()),
            sleep_requests_secs: other.sleep_requests_secs.or(self.sleep_requests_secs),
        }
    }
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct MetarrArgs {
    pub(crate) output_dir_override: Option<String>,
    pub(crate) output_ext: Option<String>,
    pub(crate) rename_style: Option<String>,
    pub(crate) transcode_gpu: Option<String>,
    pub(crate) transcode_video_codec: Option<String>,
    pub(crate) transcode_audio_codec: Option<String>,
    pub(crate) transcode_quality: Option<String>,
    pub(crate) transcode_video_filter: Option<String>,
    pub(crate) extra_ffmpeg_args: Option<String>,
    pub(crate) min_free_mem: Option<String>,
    pub(crate) max_cpu: Option<String>,
    pub(crate) purge_metafile: bool,
    pub(crate) meta_overwrite: bool,
    pub(crate) debug: bool,
}

impl MetarrArgs {
    pub(crate) fn merged_with(&self, other: &MetarrArgs) -> MetarrArgs {
        MetarrArgs {
            output_dir_override: other
                .output_dir_override
                .clone()
                .or_else(|| self.output_dir_override.clone()),
            output_ext: other.output_ext.clone().or_else(|| self.output_ext.clone()),
            rename_style: other.rename_style.clone().or_else(|| self.rename_style.clone()),
            transcode_gpu: other.transcode_gpu.clone().or_else(|| self.transcode_gpu.clone()),
            transcode_video_codec: other
                .transcode_video_codec
                .clone()
                .or_else(|| self.transcode_video_codec.clone()),
            transcode_audio_codec: other
                .transcode_audio_codec
                .clone()
                .or_else(|| self.transcode_audio_codec.clone()),
            transcode_quality: other
                .transcode_quality
                .clone()
                .or_else(|| self.transcode_quality.clone()),
            transcode_video_filter: other
                .transcode_video_filter
                .clone()
                .or_else(|| self.transcode_video_filter.clone()),
            extra_ffmpeg_args: other
                .extra_ffmpeg_args
                .clone()
                .or_else(|| self.extra_ffmpeg_args.clone()),
            min_free_mem: other.min_free_mem.clone().or_else(|| self.min_free_mem.clone()),
            max_cpu: other.max_cpu.clone().or_else(|| self.max_cpu.clone()),
            purge_metafile: other.purge_metafile || self.purge_metafile,
            meta_overwrite: other.meta_overwrite || self.meta_overwrite,
            debug: other.debug || self.debug,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Channel {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) settings: Settings,
    pub(crate) metarr_args: MetarrArgs,
    pub(crate) crawl_freq_secs: i64,
    pub(crate) paused: bool,
    pub(crate) last_scan: Option<chrono::DateTime<chrono::Utc>>,
    pub(crate) urls: Vec<ChannelUrl>,
}

#[derive(Clone, Debug)]
pub(crate) struct ChannelUrl {
    pub(crate) id: i64,
    pub(crate) channel_id: i64,
    pub(crate) url: String,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) login_url: Option<String>,
    pub(crate) settings: Settings,
    pub(crate) metarr_args: MetarrArgs,
}

/// The class of credentials used when contacting a host. A single hostname
/// can be blocked under one context while remaining reachable under another
/// (spec §3 `BlockState`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum AuthContext {
    Unauthenticated,
    CookiesOnly,
    Credentialed,
}

impl ChannelUrl {
    pub(crate) fn auth_context(&self) -> AuthContext {
        if self.username.is_some() && self.password.is_some() {
            AuthContext::Credentialed
        } else if self.settings.cookie_source.is_some() {
            AuthContext::CookiesOnly
        } else {
            AuthContext::Unauthenticated
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DownloadStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Paused,
}

impl DownloadStatus {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::InProgress => "in-progress",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Paused => "paused",
        }
    }

    pub(crate) fn parse(s: &str) -> anyhow::Result<DownloadStatus> {
        Ok(match s {
            "pending" => DownloadStatus::Pending,
            "in-progress" => DownloadStatus::InProgress,
            "completed" => DownloadStatus::Completed,
            "failed" => DownloadStatus::Failed,
            "paused" => DownloadStatus::Paused,
            other => anyhow::bail!("unknown download status '{other}'"),
        })
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Download {
    pub(crate) video_id: i64,
    pub(crate) status: DownloadStatus,
    pub(crate) pct: f64,
    pub(crate) updated_at: chrono::DateTime<chrono::Utc>,
}

impl Download {
    /// Normalization rule (spec §3): `pct >= 100 <=> status=completed,
    /// pct=100`; `pct < 0` becomes `0`.
    pub(crate) fn normalized(mut self) -> Download {
        if self.pct >= 100.0 {
            self.pct = 100.0;
            self.status = DownloadStatus::Completed;
        } else if self.pct < 0.0 {
            self.pct = 0.0;
        }
        self
    }

    pub(crate) fn pending(video_id: i64) -> Download {
        Download {
            video_id,
            status: DownloadStatus::Pending,
            pct: 0.0,
            updated_at: chrono::Utc::now(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Video {
    pub(crate) id: i64,
    pub(crate) channel_id: i64,
    pub(crate) channel_url_id: i64,
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) description: String,
    /// `YYYYMMDD`, empty when unparseable.
    pub(crate) upload_date: String,
    pub(crate) json_path: Option<String>,
    pub(crate) video_path: Option<String>,
    pub(crate) finished: bool,
    pub(crate) was_skipped: bool,
    pub(crate) metadata: BTreeMap<String, serde_json::Value>,
    pub(crate) settings: Settings,
    pub(crate) metarr_args: MetarrArgs,
    pub(crate) move_op_output_dir: Option<String>,
}

impl Video {
    pub(crate) fn new(channel_id: i64, channel_url_id: i64, url: String) -> Video {
        Video {
            id: 0,
            channel_id,
            channel_url_id,
            url,
            title: String::new(),
            description: String::new(),
            upload_date: String::new(),
            json_path: None,
            video_path: None,
            finished: false,
            was_skipped: false,
            metadata: BTreeMap::new(),
            settings: Settings::default(),
            metarr_args: MetarrArgs::default(),
            move_op_output_dir: None,
        }
    }

    /// Parse `upload_date` (`YYYYMMDD`) to an integer for date-window
    /// comparisons (spec §4.3). Zero means "unset / unparseable".
    pub(crate) fn upload_date_int(&self) -> i64 {
        if self.upload_date.len() == 8 {
            self.upload_date.parse().unwrap_or(0)
        } else {
            0
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Notification {
    pub(crate) id: i64,
    pub(crate) channel_id: i64,
    pub(crate) channel_url_id: Option<i64>,
    pub(crate) notify_name: String,
    pub(crate) notify_url: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) enum FilterOp {
    Contains,
    Omits,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) enum FilterMode {
    Must,
    Any,
}

/// Serializable so a `FilteredOpSet`'s filter list can round-trip through
/// the `filtered_meta_ops`/`filtered_filename_ops` tables' `filters_json`
/// column (spec §3).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct Filter {
    /// Empty string means "applies to every channel URL".
    pub(crate) channel_url: String,
    pub(crate) field: String,
    pub(crate) op: FilterOp,
    pub(crate) value: String,
    pub(crate) mode: FilterMode,
}

#[derive(Clone, Debug)]
pub(crate) struct MoveOp {
    pub(crate) channel_url: String,
    pub(crate) field: String,
    pub(crate) value: String,
    pub(crate) output_dir: String,
}

#[derive(Clone, Debug)]
pub(crate) struct FilteredOpSet {
    pub(crate) channel_url: String,
    pub(crate) filters: Vec<Filter>,
    pub(crate) ops: Vec<String>,
}
