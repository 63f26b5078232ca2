//! SQLite backend for the snapshot store.
//!
//! Every save replaces the whole snapshot inside one transaction, so storage
//! only ever holds a complete snapshot.

use super::pool::DbPool;
use super::DbError;
use crate::error::PersistError;
use crate::models::category::PullRequestCategory;
use crate::models::pull_request::{AppData, Author, PullRequestItem, PullRequestsData};
use crate::services::snapshot_store::SnapshotPersistence;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::FromRow;
use std::path::Path;

#[derive(Debug, FromRow)]
struct SourceRow {
    source_key: String,
    last_updated: i64,
    last_error: Option<String>,
}

#[derive(Debug, FromRow)]
struct PullRequestRow {
    source_key: String,
    id: i64,
    title: String,
    repository_url: String,
    author_login: String,
    author_avatar_url: String,
    url: String,
    html_url: String,
    created_at: String,
    updated_at: String,
    category: String,
    is_new: bool,
}

impl PullRequestRow {
    fn into_item(self) -> Result<PullRequestItem, PersistError> {
        let id = u64::try_from(self.id)
            .map_err(|_| PersistError::Corrupt(format!("negative pull request id {}", self.id)))?;
        let category: PullRequestCategory = self
            .category
            .parse()
            .map_err(|e: String| PersistError::Corrupt(format!("pull request {}: {}", id, e)))?;

        Ok(PullRequestItem {
            id,
            title: self.title,
            repository_url: self.repository_url,
            author: Author {
                login: self.author_login,
                avatar_url: self.author_avatar_url,
            },
            url: self.url,
            html_url: self.html_url,
            created_at: parse_timestamp(id, &self.created_at)?,
            updated_at: parse_timestamp(id, &self.updated_at)?,
            category,
            is_new: self.is_new,
        })
    }
}

fn parse_timestamp(id: u64, value: &str) -> Result<DateTime<Utc>, PersistError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| PersistError::Corrupt(format!("pull request {}: bad timestamp {}: {}", id, value, e)))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Snapshot persistence in the application database.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: DbPool,
}

impl SqlitePersistence {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open (creating and migrating if needed) the database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, DbError> {
        Ok(Self::new(super::initialize(db_path).await?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl SnapshotPersistence for SqlitePersistence {
    async fn load_data(&self) -> Result<AppData, PersistError> {
        let sources: Vec<SourceRow> = sqlx::query_as(
            "SELECT source_key, last_updated, last_error FROM source_snapshots",
        )
        .fetch_all(&self.pool)
        .await?;

        let rows: Vec<PullRequestRow> = sqlx::query_as(
            r#"
            SELECT source_key, id, title, repository_url, author_login, author_avatar_url,
                   url, html_url, created_at, updated_at, category, is_new
            FROM pull_requests
            ORDER BY source_key, position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut data = AppData::default();
        for source in sources {
            data.pull_requests.insert(
                source.source_key,
                PullRequestsData {
                    last_updated: source.last_updated,
                    pull_requests: Vec::new(),
                    last_error: source.last_error,
                },
            );
        }

        for row in rows {
            let source_key = row.source_key.clone();
            let item = row.into_item()?;
            match data.pull_requests.get_mut(&source_key) {
                Some(source) => source.pull_requests.push(item),
                None => {
                    return Err(PersistError::Corrupt(format!(
                        "pull request {} belongs to unknown source {}",
                        item.id, source_key
                    )))
                }
            }
        }

        Ok(data)
    }

    async fn save_data(&self, data: &AppData) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pull_requests")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM source_snapshots")
            .execute(&mut *tx)
            .await?;

        for (source_key, source) in &data.pull_requests {
            sqlx::query(
                "INSERT INTO source_snapshots (source_key, last_updated, last_error) VALUES (?, ?, ?)",
            )
            .bind(source_key)
            .bind(source.last_updated)
            .bind(&source.last_error)
            .execute(&mut *tx)
            .await?;

            for (position, pr) in source.pull_requests.iter().enumerate() {
                let id = i64::try_from(pr.id).map_err(|_| {
                    PersistError::Corrupt(format!("pull request id {} out of range", pr.id))
                })?;

                sqlx::query(
                    r#"
                    INSERT INTO pull_requests (
                        source_key, id, position, title, repository_url, author_login,
                        author_avatar_url, url, html_url, created_at, updated_at, category, is_new
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(source_key)
                .bind(id)
                .bind(position as i64)
                .bind(&pr.title)
                .bind(&pr.repository_url)
                .bind(&pr.author.login)
                .bind(&pr.author.avatar_url)
                .bind(&pr.url)
                .bind(&pr.html_url)
                .bind(format_timestamp(&pr.created_at))
                .bind(format_timestamp(&pr.updated_at))
                .bind(pr.category.to_string())
                .bind(pr.is_new)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        log::debug!("Saved snapshot with {} source(s)", data.pull_requests.len());
        Ok(())
    }
}
