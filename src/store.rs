//! Persistence (spec §4.1). SQLite via `sqlx`, following the teacher's
//! `db.rs` connection setup. Unlike the teacher, the schema here is large
//! enough that compile-time checked `sqlx::query!` macros would require a
//! committed `.sqlx` offline cache or a live `DATABASE_URL` at build time;
//! neither is available in this exercise, so the runtime-checked
//! `sqlx::query`/`query_as` API is used throughout instead (same crate,
//! same transactional discipline, noted in DESIGN.md).

use crate::models::{
    Channel, ChannelUrl, Download, DownloadStatus, Filter, FilterMode, FilterOp, FilteredOpSet, MetarrArgs, MoveOp,
    Notification, Settings, Video,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug)]
pub(crate) struct AlreadyRunning;

impl std::fmt::Display for AlreadyRunning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failure: another instance is already running")
    }
}

impl std::error::Error for AlreadyRunning {}

#[derive(Clone)]
pub(crate) struct Store {
    pool: SqlitePool,
}

fn now_str() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

impl Store {
    /// Open (creating if missing) the SQLite database at `path`, create all
    /// tables, and take the process-wide lock row. A second process racing
    /// to open the same database fails with `AlreadyRunning` per spec §6.
    pub(crate) async fn open(path: &str) -> anyhow::Result<Store> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(opts).await?;

        Self::migrate(&pool).await?;
        Self::acquire_lock(&pool).await?;

        Ok(Store { pool })
    }

    async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS prog_control (
                singleton INTEGER PRIMARY KEY CHECK (singleton = 0),
                pid INTEGER NOT NULL,
                started_at TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                settings_json TEXT NOT NULL,
                metarr_args_json TEXT NOT NULL,
                crawl_freq_secs INTEGER NOT NULL,
                paused INTEGER NOT NULL DEFAULT 0,
                last_scan TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channel_urls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL REFERENCES channels(id),
                url TEXT NOT NULL,
                username TEXT,
                password TEXT,
                login_url TEXT,
                settings_json TEXT NOT NULL,
                metarr_args_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(channel_id, url)
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL REFERENCES channels(id),
                channel_url_id INTEGER NOT NULL REFERENCES channel_urls(id),
                url TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                upload_date TEXT NOT NULL DEFAULT '',
                json_path TEXT,
                video_path TEXT,
                finished INTEGER NOT NULL DEFAULT 0,
                was_skipped INTEGER NOT NULL DEFAULT 0,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                settings_json TEXT NOT NULL DEFAULT '{}',
                metarr_args_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(channel_id, url)
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS downloads (
                video_id INTEGER PRIMARY KEY REFERENCES videos(id),
                status TEXT NOT NULL,
                pct REAL NOT NULL,
                updated_at TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL REFERENCES channels(id),
                channel_url_id INTEGER,
                notify_name TEXT NOT NULL,
                notify_url TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(channel_id, notify_url)
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS filters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_url TEXT NOT NULL DEFAULT '',
                field TEXT NOT NULL,
                op TEXT NOT NULL,
                value TEXT NOT NULL DEFAULT '',
                mode TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS move_ops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_url TEXT NOT NULL DEFAULT '',
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                output_dir TEXT NOT NULL,
                position INTEGER NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS filtered_meta_ops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_url TEXT NOT NULL DEFAULT '',
                filters_json TEXT NOT NULL,
                ops_json TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS filtered_filename_ops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_url TEXT NOT NULL DEFAULT '',
                filters_json TEXT NOT NULL,
                ops_json TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn acquire_lock(pool: &SqlitePool) -> anyhow::Result<()> {
        let pid = i64::from(std::process::id());
        let existing = sqlx::query("SELECT pid FROM prog_control WHERE singleton = 0;")
            .fetch_optional(pool)
            .await?;

        if let Some(row) = existing {
            let existing_pid: i64 = row.try_get("pid")?;
            if process_is_alive(existing_pid) {
                return Err(AlreadyRunning.into());
            }
            // Stale lock from a crashed process: reclaim it.
            sqlx::query("UPDATE prog_control SET pid = $1, started_at = $2 WHERE singleton = 0;")
                .bind(pid)
                .bind(now_str())
                .execute(pool)
                .await?;
            return Ok(());
        }

        sqlx::query("INSERT INTO prog_control (singleton, pid, started_at) VALUES (0, $1, $2);")
            .bind(pid)
            .bind(now_str())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }

    // ---- Channels -----------------------------------------------------

    pub(crate) async fn create_channel(
        &self,
        name: &str,
        crawl_freq_secs: i64,
        settings: &Settings,
        metarr_args: &MetarrArgs,
    ) -> anyhow::Result<i64> {
        let now = now_str();
        let rec = sqlx::query(
            "INSERT INTO channels (name, settings_json, metarr_args_json, crawl_freq_secs, paused, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 0, $5, $5) RETURNING id;",
        )
        .bind(name)
        .bind(serde_json::to_string(settings)?)
        .bind(serde_json::to_string(metarr_args)?)
        .bind(crawl_freq_secs)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.try_get("id")?)
    }

    pub(crate) async fn add_channel_url(&self, channel_id: i64, url: &str) -> anyhow::Result<i64> {
        let now = now_str();
        let rec = sqlx::query(
            "INSERT INTO channel_urls (channel_id, url, settings_json, metarr_args_json, created_at)
             VALUES ($1, $2, '{}', '{}', $3) RETURNING id;",
        )
        .bind(channel_id)
        .bind(url)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.try_get("id")?)
    }

    fn row_to_channel_url(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<ChannelUrl> {
        Ok(ChannelUrl {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            url: row.try_get("url")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            login_url: row.try_get("login_url")?,
            settings: serde_json::from_str(row.try_get::<String, _>("settings_json")?.as_str())?,
            metarr_args: serde_json::from_str(row.try_get::<String, _>("metarr_args_json")?.as_str())?,
        })
    }

    pub(crate) async fn load_channel_by_name(&self, name: &str) -> anyhow::Result<Option<Channel>> {
        let Some(row) = sqlx::query("SELECT * FROM channels WHERE name = $1;")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        self.hydrate_channel(row).await.map(Some)
    }

    pub(crate) async fn load_channel_by_id(&self, id: i64) -> anyhow::Result<Option<Channel>> {
        let Some(row) = sqlx::query("SELECT * FROM channels WHERE id = $1;")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        self.hydrate_channel(row).await.map(Some)
    }

    async fn hydrate_channel(&self, row: sqlx::sqlite::SqliteRow) -> anyhow::Result<Channel> {
        let id: i64 = row.try_get("id")?;
        let url_rows = sqlx::query("SELECT * FROM channel_urls WHERE channel_id = $1 ORDER BY id;")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        let urls = url_rows
            .iter()
            .map(Self::row_to_channel_url)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Channel {
            id,
            name: row.try_get("name")?,
            settings: serde_json::from_str(row.try_get::<String, _>("settings_json")?.as_str())?,
            metarr_args: serde_json::from_str(row.try_get::<String, _>("metarr_args_json")?.as_str())?,
            crawl_freq_secs: row.try_get("crawl_freq_secs")?,
            paused: row.try_get::<i64, _>("paused")? != 0,
            last_scan: row
                .try_get::<Option<String>, _>("last_scan")?
                .map(|s| parse_ts(&s)),
            urls,
        })
    }

    /// Channels due for a scan: not paused, and `now - last_scan >=
    /// crawl_freq_secs` (or never scanned). Used by the Scheduler (spec
    /// §4.10).
    pub(crate) async fn list_due_channels(&self) -> anyhow::Result<Vec<Channel>> {
        let rows = sqlx::query("SELECT * FROM channels WHERE paused = 0;")
            .fetch_all(&self.pool)
            .await?;

        let now = chrono::Utc::now();
        let mut due = Vec::new();
        for row in rows {
            let channel = self.hydrate_channel(row).await?;
            let is_due = match channel.last_scan {
                None => true,
                Some(last) => (now - last).num_seconds() >= channel.crawl_freq_secs,
            };
            if is_due {
                due.push(channel);
            }
        }
        Ok(due)
    }

    pub(crate) async fn update_last_scan(&self, channel_id: i64) -> anyhow::Result<()> {
        let now = now_str();
        sqlx::query("UPDATE channels SET last_scan = $1, updated_at = $1 WHERE id = $2;")
            .bind(&now)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn set_paused(&self, channel_id: i64, paused: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE channels SET paused = $1, updated_at = $2 WHERE id = $3;")
            .bind(i64::from(paused))
            .bind(now_str())
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Optimistic read-modify-write of the `Settings` blob (spec §4.1).
    pub(crate) async fn update_channel_settings(
        &self,
        channel_id: i64,
        mutate: impl FnOnce(&mut Settings),
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT settings_json FROM channels WHERE id = $1;")
            .bind(channel_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut settings: Settings = serde_json::from_str(row.try_get::<String, _>("settings_json")?.as_str())?;
        mutate(&mut settings);
        sqlx::query("UPDATE channels SET settings_json = $1, updated_at = $2 WHERE id = $3;")
            .bind(serde_json::to_string(&settings)?)
            .bind(now_str())
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn update_channel_metarr_args(
        &self,
        channel_id: i64,
        mutate: impl FnOnce(&mut MetarrArgs),
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT metarr_args_json FROM channels WHERE id = $1;")
            .bind(channel_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut args: MetarrArgs = serde_json::from_str(row.try_get::<String, _>("metarr_args_json")?.as_str())?;
        mutate(&mut args);
        sqlx::query("UPDATE channels SET metarr_args_json = $1, updated_at = $2 WHERE id = $3;")
            .bind(serde_json::to_string(&args)?)
            .bind(now_str())
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---- Videos / Downloads --------------------------------------------

    fn row_to_video(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Video> {
        let metadata: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(row.try_get::<String, _>("metadata_json")?.as_str())?;
        Ok(Video {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            channel_url_id: row.try_get("channel_url_id")?,
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            upload_date: row.try_get("upload_date")?,
            json_path: row.try_get("json_path")?,
            video_path: row.try_get("video_path")?,
            finished: row.try_get::<i64, _>("finished")? != 0,
            was_skipped: row.try_get::<i64, _>("was_skipped")? != 0,
            metadata,
            settings: serde_json::from_str(row.try_get::<String, _>("settings_json")?.as_str())?,
            metarr_args: serde_json::from_str(row.try_get::<String, _>("metarr_args_json")?.as_str())?,
            move_op_output_dir: None,
        })
    }

    /// Insert-or-upsert by `(channel_id, url)` (spec §4.1 `AddVideo`). On
    /// conflict, updates `finished` only. Always atomically inserts/keeps a
    /// matching `downloads` row.
    pub(crate) async fn add_video(&self, video: &Video) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;
        let now = now_str();

        let existing = sqlx::query("SELECT id FROM videos WHERE channel_id = $1 AND url = $2;")
            .bind(video.channel_id)
            .bind(&video.url)
            .fetch_optional(&mut *tx)
            .await?;

        let id = if let Some(row) = existing {
            let id: i64 = row.try_get("id")?;
            sqlx::query("UPDATE videos SET finished = $1, updated_at = $2 WHERE id = $3;")
                .bind(i64::from(video.finished))
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            id
        } else {
            let rec = sqlx::query(
                "INSERT INTO videos (
                    channel_id, channel_url_id, url, title, description, upload_date,
                    json_path, video_path, finished, was_skipped, metadata_json,
                    settings_json, metarr_args_json, created_at, updated_at
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$14) RETURNING id;",
            )
            .bind(video.channel_id)
            .bind(video.channel_url_id)
            .bind(&video.url)
            .bind(&video.title)
            .bind(&video.description)
            .bind(&video.upload_date)
            .bind(&video.json_path)
            .bind(&video.video_path)
            .bind(i64::from(video.finished))
            .bind(i64::from(video.was_skipped))
            .bind(serde_json::to_string(&video.metadata)?)
            .bind(serde_json::to_string(&video.settings)?)
            .bind(serde_json::to_string(&video.metarr_args)?)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;
            rec.try_get("id")?
        };

        let download_exists = sqlx::query("SELECT 1 AS present FROM downloads WHERE video_id = $1;")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if download_exists.is_none() {
            let d = Download::pending(id);
            sqlx::query("INSERT INTO downloads (video_id, status, pct, updated_at) VALUES ($1,$2,$3,$4);")
                .bind(d.video_id)
                .bind(d.status.as_str())
                .bind(d.pct)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Transactional full update of a video row plus its download row.
    /// Fails with an error if no row matches (spec §4.1 `UpdateVideo`).
    pub(crate) async fn update_video(&self, video: &Video, download: &Download) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = now_str();

        let result = sqlx::query(
            "UPDATE videos SET
                title = $1, description = $2, upload_date = $3, json_path = $4,
                video_path = $5, finished = $6, was_skipped = $7, metadata_json = $8,
                settings_json = $9, metarr_args_json = $10, updated_at = $11
             WHERE id = $12;",
        )
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.upload_date)
        .bind(&video.json_path)
        .bind(&video.video_path)
        .bind(i64::from(video.finished))
        .bind(i64::from(video.was_skipped))
        .bind(serde_json::to_string(&video.metadata)?)
        .bind(serde_json::to_string(&video.settings)?)
        .bind(serde_json::to_string(&video.metarr_args)?)
        .bind(&now)
        .bind(video.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("NotFound: no video row with id {}", video.id);
        }

        let normalized = download.clone().normalized();
        sqlx::query("UPDATE downloads SET status = $1, pct = $2, updated_at = $3 WHERE video_id = $4;")
            .bind(normalized.status.as_str())
            .bind(normalized.pct)
            .bind(&now)
            .bind(video.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn set_download_status(&self, download: &Download) -> anyhow::Result<()> {
        self.update_download_statuses(std::slice::from_ref(download)).await
    }

    /// Batched, transactional status update for many videos at once. Used
    /// by the Download Tracker's periodic flush (spec §4.4).
    pub(crate) async fn update_download_statuses(&self, updates: &[Download]) -> anyhow::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let now = now_str();
        for d in updates {
            let normalized = d.clone().normalized();
            sqlx::query("UPDATE downloads SET status = $1, pct = $2, updated_at = $3 WHERE video_id = $4;")
                .bind(normalized.status.as_str())
                .bind(normalized.pct)
                .bind(&now)
                .bind(normalized.video_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn get_download(&self, video_id: i64) -> anyhow::Result<Option<Download>> {
        let Some(row) = sqlx::query("SELECT * FROM downloads WHERE video_id = $1;")
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(Download {
            video_id: row.try_get("video_id")?,
            status: DownloadStatus::parse(&row.try_get::<String, _>("status")?)?,
            pct: row.try_get("pct")?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?),
        }))
    }

    /// URLs already `finished=true` for the channel (spec §4.1
    /// `LoadGrabbedURLs`, spec §8 testable property).
    pub(crate) async fn load_grabbed_urls(&self, channel_id: i64) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT url FROM videos WHERE channel_id = $1 AND finished = 1;")
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(r.try_get("url")?)).collect()
    }

    pub(crate) async fn find_video_by_url(&self, channel_id: i64, url: &str) -> anyhow::Result<Option<Video>> {
        let Some(row) = sqlx::query("SELECT * FROM videos WHERE channel_id = $1 AND url = $2;")
            .bind(channel_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        Self::row_to_video(&row).map(Some)
    }

    /// Materialize a candidate URL as an ignored video: `finished=true`, no
    /// media/json paths (spec §3 `IgnoredURL`).
    pub(crate) async fn add_ignored_url(&self, channel_id: i64, channel_url_id: i64, url: &str) -> anyhow::Result<i64> {
        let mut video = Video::new(channel_id, channel_url_id, url.to_string());
        video.finished = true;
        video.was_skipped = true;
        self.add_video(&video).await
    }

    // ---- Notifications --------------------------------------------------

    pub(crate) async fn upsert_notification(
        &self,
        channel_id: i64,
        channel_url_id: Option<i64>,
        notify_name: &str,
        notify_url: &str,
    ) -> anyhow::Result<()> {
        let now = now_str();
        sqlx::query(
            "INSERT INTO notifications (channel_id, channel_url_id, notify_name, notify_url, updated_at)
             VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT(channel_id, notify_url) DO UPDATE SET notify_name = excluded.notify_name, updated_at = excluded.updated_at;",
        )
        .bind(channel_id)
        .bind(channel_url_id)
        .bind(notify_name)
        .bind(notify_url)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) async fn list_notifications(&self, channel_id: i64) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query("SELECT * FROM notifications WHERE channel_id = $1;")
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Notification {
                    id: row.try_get("id")?,
                    channel_id: row.try_get("channel_id")?,
                    channel_url_id: row.try_get("channel_url_id")?,
                    notify_name: row.try_get("notify_name")?,
                    notify_url: row.try_get("notify_url")?,
                })
            })
            .collect()
    }

    // ---- Filters / move-ops (database-declared half) ---------------------

    pub(crate) async fn list_filters(&self) -> anyhow::Result<Vec<Filter>> {
        let rows = sqlx::query("SELECT * FROM filters;").fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let op_str: String = row.try_get("op")?;
                let mode_str: String = row.try_get("mode")?;
                Ok(Filter {
                    channel_url: row.try_get("channel_url")?,
                    field: row.try_get("field")?,
                    op: if op_str == "contains" {
                        FilterOp::Contains
                    } else {
                        FilterOp::Omits
                    },
                    value: row.try_get("value")?,
                    mode: if mode_str == "must" {
                        FilterMode::Must
                    } else {
                        FilterMode::Any
                    },
                })
            })
            .collect()
    }

    pub(crate) async fn add_filter(&self, filter: &Filter) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO filters (channel_url, field, op, value, mode) VALUES ($1,$2,$3,$4,$5);")
            .bind(&filter.channel_url)
            .bind(&filter.field)
            .bind(match filter.op {
                FilterOp::Contains => "contains",
                FilterOp::Omits => "omits",
            })
            .bind(&filter.value)
            .bind(match filter.mode {
                FilterMode::Must => "must",
                FilterMode::Any => "any",
            })
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn list_move_ops(&self) -> anyhow::Result<Vec<MoveOp>> {
        let rows = sqlx::query("SELECT * FROM move_ops ORDER BY position;")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(MoveOp {
                    channel_url: row.try_get("channel_url")?,
                    field: row.try_get("field")?,
                    value: row.try_get("value")?,
                    output_dir: row.try_get("output_dir")?,
                })
            })
            .collect()
    }

    /// Database-declared meta-ops (spec §3 `FilteredMetaOp`), merged with
    /// the file-declared half by the caller (`scheduler::load_rules`).
    pub(crate) async fn list_filtered_meta_ops(&self) -> anyhow::Result<Vec<FilteredOpSet>> {
        let rows = sqlx::query("SELECT * FROM filtered_meta_ops;").fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(FilteredOpSet {
                    channel_url: row.try_get("channel_url")?,
                    filters: serde_json::from_str(row.try_get::<String, _>("filters_json")?.as_str())?,
                    ops: serde_json::from_str(row.try_get::<String, _>("ops_json")?.as_str())?,
                })
            })
            .collect()
    }

    /// Database-declared filename-ops (spec §3 `FilteredFilenameOp`),
    /// merged with the file-declared half by the caller.
    pub(crate) async fn list_filtered_filename_ops(&self) -> anyhow::Result<Vec<FilteredOpSet>> {
        let rows = sqlx::query("SELECT * FROM filtered_filename_ops;").fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(FilteredOpSet {
                    channel_url: row.try_get("channel_url")?,
                    filters: serde_json::from_str(row.try_get::<String, _>("filters_json")?.as_str())?,
                    ops: serde_json::from_str(row.try_get::<String, _>("ops_json")?.as_str())?,
                })
            })
            .collect()
    }
}

fn process_is_alive(pid: i64) -> bool {
    // Signal 0 performs no-op existence/permission checks without actually
    // sending a signal (the well-known Unix idiom for "is this PID alive").
    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}
