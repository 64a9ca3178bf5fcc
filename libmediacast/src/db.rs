//! SQLite storage for accounts, credentials and the job journal

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::store::{AccountStore, JobJournal};
use crate::types::{Credential, PlatformAccount, PlatformKind, TokenKind};
use crate::workflow::PublishJob;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        // The file holds access tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(DbError::IoError)?;
        }

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        DbError::Corrupt(format!("Invalid timestamp {} in column {}", millis, column)).into()
    })
}

fn account_from_row(row: &SqliteRow) -> Result<PlatformAccount> {
    let platform: String = row.get("platform");
    let kind = platform
        .parse::<PlatformKind>()
        .map_err(DbError::Corrupt)?;

    Ok(PlatformAccount {
        id: row.get("id"),
        kind,
        platform_account_id: row.get("platform_account_id"),
        display_name: row.get("display_name"),
        credential_ref: row.get("credential_ref"),
    })
}

fn credential_from_row(row: &SqliteRow) -> Result<Credential> {
    let kind = row
        .get::<String, _>("token_kind")
        .parse::<TokenKind>()
        .map_err(DbError::Corrupt)?;
    let scopes: String = row.get("scopes");

    let mut credential = Credential::new(
        row.get::<String, _>("access_token"),
        kind,
        from_millis(row.get("issued_at"), "issued_at")?,
        from_millis(row.get("expires_at"), "expires_at")?,
    )
    .with_scopes(
        scopes
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    );
    if let Some(refresh_token) = row.get::<Option<String>, _>("refresh_token") {
        credential = credential.with_refresh_token(refresh_token);
    }
    Ok(credential)
}

fn job_from_row(row: &SqliteRow) -> Result<PublishJob> {
    let payload: String = row.get("payload");
    serde_json::from_str(&payload).map_err(|e| {
        let id: String = row.get("id");
        DbError::Corrupt(format!("Journal entry {} is unreadable: {}", id, e)).into()
    })
}

#[async_trait]
impl AccountStore for Database {
    async fn get_account(&self, account_id: &str) -> Result<Option<PlatformAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, platform, platform_account_id, display_name, credential_ref
            FROM accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<PlatformAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, platform, platform_account_id, display_name, credential_ref
            FROM accounts ORDER BY platform, display_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    async fn put_account(&self, account: &PlatformAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, platform, platform_account_id, display_name, credential_ref, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                platform = excluded.platform,
                platform_account_id = excluded.platform_account_id,
                display_name = excluded.display_name,
                credential_ref = excluded.credential_ref
            "#,
        )
        .bind(&account.id)
        .bind(account.kind.as_str())
        .bind(&account.platform_account_id)
        .bind(&account.display_name)
        .bind(&account.credential_ref)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn remove_account(&self, account_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let credential_ref: Option<String> =
            sqlx::query_scalar("SELECT credential_ref FROM accounts WHERE id = ?")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;

        let Some(credential_ref) = credential_ref else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM credentials WHERE credential_ref = ?")
            .bind(&credential_ref)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    async fn get_credential(&self, credential_ref: &str) -> Result<Option<Credential>> {
        let row = sqlx::query(
            r#"
            SELECT access_token, token_kind, issued_at, expires_at, refresh_token, scopes
            FROM credentials WHERE credential_ref = ?
            "#,
        )
        .bind(credential_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(credential_from_row).transpose()
    }

    async fn put_credential(&self, credential_ref: &str, credential: &Credential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO credentials
                (credential_ref, access_token, token_kind, issued_at, expires_at, refresh_token, scopes)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(credential_ref)
        .bind(credential.token())
        .bind(credential.kind.as_str())
        .bind(to_millis(credential.issued_at))
        .bind(to_millis(credential.expires_at))
        .bind(credential.refresh_token())
        .bind(credential.scopes.join(" "))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }
}

#[async_trait]
impl JobJournal for Database {
    async fn record(&self, job: &PublishJob) -> Result<()> {
        let payload = serde_json::to_string(job)
            .map_err(|e| DbError::Corrupt(format!("Cannot serialize job {}: {}", job.id, e)))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO publish_jobs
                (id, account_id, state, container_id, create_attempts, finalize_attempts,
                 poll_attempts, started_at, deadline, updated_at, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.account_id)
        .bind(job.state.as_str())
        .bind(job.container.as_ref().map(|c| c.container_id.as_str()))
        .bind(job.attempts.create as i64)
        .bind(job.attempts.finalize as i64)
        .bind(job.attempts.polls as i64)
        .bind(to_millis(job.started_at))
        .bind(to_millis(job.deadline))
        .bind(to_millis(job.updated_at))
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<PublishJob>> {
        let row = sqlx::query("SELECT id, payload FROM publish_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn unfinished(&self) -> Result<Vec<PublishJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload FROM publish_jobs
            WHERE state NOT IN ('published', 'failed', 'timed_out')
            ORDER BY started_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PublishJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload FROM publish_jobs
            ORDER BY updated_at DESC, started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(job_from_row).collect()
    }
}
