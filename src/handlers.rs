//! Minimal HTTP control surface (spec §4.12 / SPEC_FULL "HTTP control
//! surface"): manual-trigger endpoints that bypass the Scheduler's wake
//! predicate but still acquire its semaphore, generalized from the teacher's
//! `handlers.rs` single-channel/single-video model to channels-with-many-URLs.

use crate::models::{MetarrArgs, Settings};
use crate::scheduler::Scheduler;
use crate::store::Store;
use std::sync::Arc;
use tracing::{event, Level};

#[derive(Clone)]
pub(crate) struct HTTPHandlerState {
    store: Store,
    scheduler: Arc<Scheduler>,
}

impl HTTPHandlerState {
    pub(crate) fn new(store: Store, scheduler: Arc<Scheduler>) -> Self {
        HTTPHandlerState { store, scheduler }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ChannelFollowReq {
    name: String,
    url: String,
    crawl_freq_secs: i64,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct ChannelFollowResp {
    status: String,
}

/// Register a new channel (or attach another URL to an existing one by
/// name) and trigger an initial crawl in the background.
pub(crate) async fn post_channels_follow(
    axum::extract::State(state): axum::extract::State<HTTPHandlerState>,
    axum::Json(payload): axum::Json<ChannelFollowReq>,
) -> (axum::http::StatusCode, axum::Json<ChannelFollowResp>) {
    if payload.url.is_empty() || payload.name.is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            axum::Json(ChannelFollowResp {
                status: "Fields 'name' and 'url' are required".to_string(),
            }),
        );
    }
    if payload.crawl_freq_secs <= 0 {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            axum::Json(ChannelFollowResp {
                status: "Field 'crawl_freq_secs' must be positive".to_string(),
            }),
        );
    }

    let existing = match state.store.load_channel_by_name(&payload.name).await {
        Ok(c) => c,
        Err(e) => {
            event!(Level::WARN, "Looking up channel '{}' failed: {e}", payload.name);
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(ChannelFollowResp {
                    status: "Looking up channel failed".to_string(),
                }),
            );
        }
    };

    let channel_id = match existing {
        Some(c) => c.id,
        None => {
            match state
                .store
                .create_channel(&payload.name, payload.crawl_freq_secs, &Settings::default(), &MetarrArgs::default())
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    event!(Level::WARN, "Creating channel '{}' failed: {e}", payload.name);
                    return (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        axum::Json(ChannelFollowResp {
                            status: "Creating channel failed".to_string(),
                        }),
                    );
                }
            }
        }
    };

    if let Err(e) = state.store.add_channel_url(channel_id, &payload.url).await {
        event!(Level::WARN, "Adding URL {} to channel '{}' failed: {e}", payload.url, payload.name);
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(ChannelFollowResp {
                status: "Adding URL to channel failed".to_string(),
            }),
        );
    }

    let scheduler = Arc::clone(&state.scheduler);
    let name = payload.name.clone();
    tokio::spawn(async move {
        match state.store.load_channel_by_id(channel_id).await {
            Ok(Some(channel)) => {
                if let Err(e) = scheduler.run_channel(channel).await {
                    event!(Level::WARN, "Initial crawl of channel '{name}' failed: {e}");
                }
            }
            Ok(None) => event!(Level::WARN, "Channel '{name}' vanished before initial crawl could run"),
            Err(e) => event!(Level::WARN, "Reloading channel '{name}' for initial crawl failed: {e}"),
        }
    });

    event!(Level::DEBUG, "Following channel '{}' with URL {}", payload.name, payload.url);
    (
        axum::http::StatusCode::CREATED,
        axum::Json(ChannelFollowResp {
            status: format!("Started following channel '{}'", payload.name),
        }),
    )
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ChannelCrawlReq {
    name: String,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct ChannelCrawlResp {
    status: String,
}

/// Manually trigger a crawl of an already-followed channel, bypassing its
/// `crawl_freq_secs` wake predicate.
pub(crate) async fn post_channels_crawl(
    axum::extract::State(state): axum::extract::State<HTTPHandlerState>,
    axum::Json(payload): axum::Json<ChannelCrawlReq>,
) -> (axum::http::StatusCode, axum::Json<ChannelCrawlResp>) {
    let channel = match state.store.load_channel_by_name(&payload.name).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return (
                axum::http::StatusCode::NOT_FOUND,
                axum::Json(ChannelCrawlResp {
                    status: format!("No channel named '{}' is being followed", payload.name),
                }),
            );
        }
        Err(e) => {
            event!(Level::WARN, "Looking up channel '{}' failed: {e}", payload.name);
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(ChannelCrawlResp {
                    status: "Looking up channel failed".to_string(),
                }),
            );
        }
    };

    let scheduler = Arc::clone(&state.scheduler);
    let name = payload.name.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler.run_channel(channel).await {
            event!(Level::WARN, "Manual crawl of channel '{name}' failed: {e}");
        }
    });

    (
        axum::http::StatusCode::ACCEPTED,
        axum::Json(ChannelCrawlResp {
            status: format!("Crawl of channel '{}' queued", payload.name),
        }),
    )
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct DownloadsOnDemandReq {
    channel_name: String,
    url: String,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct DownloadsOnDemandResp {
    status: String,
}

/// Register a one-off URL under an already-followed channel and run it
/// immediately, without waiting for the channel's next scheduled crawl.
pub(crate) async fn post_downloads_ondemand(
    axum::extract::State(state): axum::extract::State<HTTPHandlerState>,
    axum::Json(payload): axum::Json<DownloadsOnDemandReq>,
) -> (axum::http::StatusCode, axum::Json<DownloadsOnDemandResp>) {
    if payload.url.is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            axum::Json(DownloadsOnDemandResp {
                status: "Field 'url' is required".to_string(),
            }),
        );
    }

    let channel = match state.store.load_channel_by_name(&payload.channel_name).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return (
                axum::http::StatusCode::NOT_FOUND,
                axum::Json(DownloadsOnDemandResp {
                    status: format!("No channel named '{}' is being followed", payload.channel_name),
                }),
            );
        }
        Err(e) => {
            event!(Level::WARN, "Looking up channel '{}' failed: {e}", payload.channel_name);
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(DownloadsOnDemandResp {
                    status: "Looking up channel failed".to_string(),
                }),
            );
        }
    };

    let channel_url_id = match channel.urls.iter().find(|u| u.url == payload.url) {
        Some(u) => u.id,
        None => match state.store.add_channel_url(channel.id, &payload.url).await {
            Ok(id) => id,
            Err(e) => {
                event!(Level::WARN, "Adding on-demand URL {} failed: {e}", payload.url);
                return (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(DownloadsOnDemandResp {
                        status: "Adding on-demand URL failed".to_string(),
                    }),
                );
            }
        },
    };

    let scheduler = Arc::clone(&state.scheduler);
    let url = payload.url.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler.run_channel_url_now(channel.id, channel_url_id).await {
            event!(Level::WARN, "On-demand download of {url} failed: {e}");
        }
    });

    event!(Level::DEBUG, "Queued on-demand download of {}", payload.url);
    (
        axum::http::StatusCode::CREATED,
        axum::Json(DownloadsOnDemandResp {
            status: "URL submitted for immediate download".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_state(dir: &tempfile::TempDir) -> HTTPHandlerState {
        let db_path = dir.path().join("test.db");
        let store = Store::open(db_path.to_str().unwrap()).await.unwrap();
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            Arc::new(crate::tracker::Tracker::new(store.clone(), Arc::new(crate::botdetect::BlockState::new()))),
            Arc::new(crate::botdetect::BlockState::new()),
            "yt-dlp".to_string(),
            "metarr".to_string(),
            dir.path().join("tmp").to_str().unwrap().to_string(),
            dir.path().join("rules").to_str().unwrap().to_string(),
            1,
            0,
            0,
            tokio_util::sync::CancellationToken::new(),
        ));
        HTTPHandlerState::new(store, scheduler)
    }

    #[tokio::test]
    async fn follow_rejects_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let (status, resp) = post_channels_follow(
            axum::extract::State(state),
            axum::Json(ChannelFollowReq {
                name: String::new(),
                url: String::new(),
                crawl_freq_secs: 60,
            }),
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
        assert!(resp.0.status.contains("required"));
    }

    #[tokio::test]
    async fn crawl_reports_unknown_channel() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let (status, resp) = post_channels_crawl(
            axum::extract::State(state),
            axum::Json(ChannelCrawlReq {
                name: "does-not-exist".to_string(),
            }),
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
        assert!(resp.0.status.contains("does-not-exist"));
    }
}
