//! Notifier dispatch (spec §4.11 / §6): fires an HTTP GET at each
//! channel-declared notify URL after a run completed with ≥1 newly
//! downloaded item. Any 2xx is success; per-URL failures are logged and
//! never fail the run.

use crate::store::Store;
use tracing::{event, Level};

pub(crate) async fn notify_channel(store: &Store, channel_id: i64) -> anyhow::Result<()> {
    let notifications = store.list_notifications(channel_id).await?;
    if notifications.is_empty() {
        return Ok(());
    }

    let client = reqwest::Client::new();
    for notification in notifications {
        match client.get(&notification.notify_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                event!(Level::DEBUG, "Notified '{}' at {}", notification.notify_name, notification.notify_url);
            }
            Ok(resp) => {
                event!(
                    Level::WARN,
                    "Notification '{}' at {} returned status {}",
                    notification.notify_name,
                    notification.notify_url,
                    resp.status()
                );
            }
            Err(e) => {
                event!(Level::WARN, "Notification '{}' at {} failed: {e}", notification.notify_name, notification.notify_url);
            }
        }
    }
    Ok(())
}
