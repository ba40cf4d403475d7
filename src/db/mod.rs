//! Datastore for persistent server state.
//!
//! Provides async SQLite access using SQLx for:
//! - D-lines and K-lines
//! - Registered accounts
//! - Registered channels
//! - Always-on clients saved at shutdown
//!
//! The datastore is opened once, on the first configuration application.
//! Its path cannot change on rehash.

use crate::history::HistoryStatus;
use crate::security::bans::{BanKind, BanRecord, StoredBan};
use crate::state::RegisteredChannel;
use crate::state::managers::AccountRecord;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid stored value in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

/// An always-on client as saved at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredClient {
    pub account: String,
    pub nick: String,
    pub username: String,
    pub realname: String,
    pub hostname: String,
    pub modes: String,
    pub last_seen: DateTime<Utc>,
}

/// Datastore handle with connection pool.
#[derive(Debug, Clone)]
pub struct Datastore {
    pool: SqlitePool,
}

impl Datastore {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open the datastore, creating the file and schema if absent.
    pub async fn open(path: &str) -> Result<Self, DbError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(path = %parent.display(), error = %e, "Failed to create datastore directory");
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(Some(Self::IDLE_TIMEOUT))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;

        info!(path = %path, "Datastore opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn load_bans(&self) -> Result<Vec<StoredBan>, DbError> {
        let rows = sqlx::query(
            "SELECT kind, subject, reason, oper_reason, source, created_at, duration_secs FROM bans",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut bans = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let Some(kind) = BanKind::parse(&kind) else {
                warn!(kind = %kind, "Skipping ban of unknown kind");
                continue;
            };
            let duration: Option<i64> = row.try_get("duration_secs")?;
            bans.push(StoredBan {
                kind,
                subject: row.try_get("subject")?,
                record: BanRecord {
                    reason: row.try_get("reason")?,
                    oper_reason: row.try_get("oper_reason")?,
                    source: row.try_get("source")?,
                    created_at: timestamp(&row, "bans", "created_at")?,
                    duration: duration.map(|secs| Duration::from_secs(secs.max(0) as u64)),
                },
            });
        }
        Ok(bans)
    }

    pub async fn insert_ban(&self, ban: &StoredBan) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO bans (kind, subject, reason, oper_reason, source, created_at, duration_secs)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ban.kind.as_str())
        .bind(&ban.subject)
        .bind(&ban.record.reason)
        .bind(&ban.record.oper_reason)
        .bind(&ban.record.source)
        .bind(ban.record.created_at.timestamp())
        .bind(ban.record.duration.map(|d| d.as_secs() as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write bans received on the returned channel in the background.
    pub fn spawn_ban_writer(&self) -> mpsc::UnboundedSender<StoredBan> {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoredBan>();
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(ban) = rx.recv().await {
                if let Err(e) = store.insert_ban(&ban).await {
                    warn!(subject = %ban.subject, error = %e, "Failed to persist ban");
                }
            }
        });
        tx
    }

    pub async fn load_accounts(&self) -> Result<Vec<AccountRecord>, DbError> {
        let rows = sqlx::query(
            "SELECT name, registered_at, password_hash, certfp, vhost, vhost_requested,
                    require_secure, always_on, multiclient, history
             FROM accounts",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AccountRecord {
                    name: row.try_get("name")?,
                    registered_at: timestamp(row, "accounts", "registered_at")?,
                    password_hash: row.try_get("password_hash")?,
                    certfp: row.try_get("certfp")?,
                    vhost: row.try_get("vhost")?,
                    vhost_requested: row.try_get("vhost_requested")?,
                    require_secure: row.try_get("require_secure")?,
                    always_on: row.try_get("always_on")?,
                    multiclient: row.try_get("multiclient")?,
                    history: history_status(row, "accounts")?,
                })
            })
            .collect()
    }

    pub async fn insert_account(&self, account: &AccountRecord) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO accounts (name, registered_at, password_hash, certfp, vhost,
                                   vhost_requested, require_secure, always_on, multiclient, history)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.name)
        .bind(account.registered_at.timestamp())
        .bind(&account.password_hash)
        .bind(&account.certfp)
        .bind(&account.vhost)
        .bind(&account.vhost_requested)
        .bind(account.require_secure)
        .bind(account.always_on)
        .bind(account.multiclient)
        .bind(account.history.map(HistoryStatus::as_str))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_channels(&self) -> Result<Vec<RegisteredChannel>, DbError> {
        let rows = sqlx::query("SELECT name, registered_at, history FROM channels")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(RegisteredChannel {
                    name: row.try_get("name")?,
                    registered_at: timestamp(row, "channels", "registered_at")?,
                    history: history_status(row, "channels")?,
                })
            })
            .collect()
    }

    pub async fn insert_channel(&self, channel: &RegisteredChannel) -> Result<(), DbError> {
        sqlx::query("INSERT INTO channels (name, registered_at, history) VALUES (?, ?, ?)")
            .bind(&channel.name)
            .bind(channel.registered_at.timestamp())
            .bind(channel.history.map(HistoryStatus::as_str))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace the saved always-on clients.
    pub async fn save_always_on(&self, clients: &[StoredClient]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM always_on_clients")
            .execute(&mut *tx)
            .await?;
        for client in clients {
            sqlx::query(
                "INSERT INTO always_on_clients
                     (account, nick, username, realname, hostname, modes, last_seen)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&client.account)
            .bind(&client.nick)
            .bind(&client.username)
            .bind(&client.realname)
            .bind(&client.hostname)
            .bind(&client.modes)
            .bind(client.last_seen.timestamp())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_always_on(&self) -> Result<Vec<StoredClient>, DbError> {
        let rows = sqlx::query(
            "SELECT account, nick, username, realname, hostname, modes, last_seen
             FROM always_on_clients",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(StoredClient {
                    account: row.try_get("account")?,
                    nick: row.try_get("nick")?,
                    username: row.try_get("username")?,
                    realname: row.try_get("realname")?,
                    hostname: row.try_get("hostname")?,
                    modes: row.try_get("modes")?,
                    last_seen: timestamp(row, "always_on_clients", "last_seen")?,
                })
            })
            .collect()
    }
}

fn timestamp(row: &SqliteRow, table: &'static str, column: &str) -> Result<DateTime<Utc>, DbError> {
    let secs: i64 = row.try_get(column)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| DbError::Corrupt {
        table,
        detail: format!("{column} = {secs}"),
    })
}

fn history_status(row: &SqliteRow, table: &'static str) -> Result<Option<HistoryStatus>, DbError> {
    let raw: Option<String> = row.try_get("history")?;
    raw.map(|s| {
        HistoryStatus::parse(&s).ok_or_else(|| DbError::Corrupt {
            table,
            detail: format!("history = {s}"),
        })
    })
    .transpose()
}
