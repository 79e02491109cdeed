use crate::handlers::{HTTPHandlerState, post_channels_crawl, post_channels_follow, post_downloads_ondemand};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};
use tracing_subscriber::prelude::*;

mod botdetect;
mod config;
mod error;
mod filter;
mod handlers;
mod json_phase;
mod models;
mod notifier;
mod pipeline;
mod postprocess;
mod resolver;
mod rules;
mod scheduler;
mod scraper;
mod store;
mod tracker;
mod video_phase;

use config::Args;
use store::Store;
use tracker::Tracker;

// Wait to observe a termination signal, then cancel the root token so every
// in-flight subprocess and worker loop winds down.
async fn shutdown_upon_signal(root_token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        sig.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    event!(Level::INFO, "Received signal to shut down gracefully");
    root_token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format_layer = tracing_subscriber::fmt::layer().with_file(true).with_line_number(true).compact();
    let filter_layer =
        tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    tracing_subscriber::registry().with(filter_layer).with(format_layer).init();
    event!(Level::DEBUG, "Launching...");

    if std::process::Command::new(&args.downloader_bin).arg("--version").output().is_err() {
        return Err(anyhow::anyhow!(
            "No '{}' executable found, make sure it is installed",
            args.downloader_bin
        ));
    }
    if !resolver::postprocessor_on_path(&args.postprocessor_bin) {
        event!(
            Level::WARN,
            "No '{}' executable found on PATH; post-processing will be skipped for every video",
            args.postprocessor_bin
        );
    }

    let store = Store::open(&args.db_path).await?;

    let block_state = Arc::new(botdetect::BlockState::new());
    let tracker = Arc::new(Tracker::new(store.clone(), Arc::clone(&block_state)));

    let root_token = CancellationToken::new();
    let scheduler = Arc::new(scheduler::Scheduler::new(
        store.clone(),
        Arc::clone(&tracker),
        Arc::clone(&block_state),
        args.downloader_bin.clone(),
        args.postprocessor_bin.clone(),
        args.tmp_dir.clone(),
        args.rules_dir.clone(),
        args.max_concurrent_channels,
        args.max_retries,
        args.retry_interval_secs,
        root_token.clone(),
    ));

    let scheduler_loop = Arc::clone(&scheduler);
    let tick = std::time::Duration::from_secs(args.scheduler_tick_secs);
    let scheduler_handle = tokio::task::spawn(async move { scheduler_loop.run(tick).await });

    let handler_state = HTTPHandlerState::new(store.clone(), Arc::clone(&scheduler));
    let mut router = axum::Router::new()
        .route("/downloads/ondemand", axum::routing::post(post_downloads_ondemand))
        .route("/channels/follow", axum::routing::post(post_channels_follow))
        .route("/channels/crawl", axum::routing::post(post_channels_crawl))
        .with_state(handler_state);

    if let Some(token) = &args.auth_token {
        router = router.layer(tower_http::validate_request::ValidateRequestHeaderLayer::bearer(token));
    } else {
        event!(Level::WARN, "No --auth-token configured; the HTTP control surface is unauthenticated");
    }

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", args.listen_ip, args.listen_port)).await?;
    event!(Level::INFO, "Listening for HTTP requests on {}:{}...", args.listen_ip, args.listen_port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_upon_signal(root_token.clone()))
        .await?;

    root_token.cancel();
    let _ = scheduler_handle.await;
    store.close().await;

    Ok(())
}
