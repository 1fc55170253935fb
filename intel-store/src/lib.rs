//! Intel Guard Store - SQLite persistence for findings
//!
//! One row per classified sample. Rows with a source URL are unique per URL
//! (latest classification wins); rows without one always insert.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use intel_core::{label_name, Finding, IocMap};

/// Bound parameters per `IN (...)` lookup
const SEEN_CHUNK: usize = 500;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed findings store
#[derive(Debug, Clone)]
pub struct FindingStore {
    pool: SqlitePool,
}

impl FindingStore {
    /// Open (creating if needed) the database at `database_url`.
    ///
    /// In-memory URLs get a single long-lived connection so every caller
    /// sees the same database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Finding store ready at {}", database_url);
        Ok(store)
    }

    /// Ephemeral store for tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                source_url TEXT,
                label INTEGER NOT NULL,
                probs TEXT NOT NULL,
                iocs TEXT NOT NULL,
                risk REAL NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_findings_source_url
                ON findings(source_url) WHERE source_url IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_findings_ts ON findings(ts);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert `finding`, replacing any row with the same source URL.
    /// Returns the row id.
    pub async fn upsert_by_url(&self, finding: &Finding) -> Result<i64> {
        let probs = serde_json::to_string(&finding.probabilities)?;
        let iocs = serde_json::to_string(&finding.iocs)?;

        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO findings (ts, source_url, label, probs, iocs, risk)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_url) WHERE source_url IS NOT NULL DO UPDATE SET
                ts = excluded.ts,
                label = excluded.label,
                probs = excluded.probs,
                iocs = excluded.iocs,
                risk = excluded.risk
            RETURNING id
            "#,
        )
        .bind(finding.timestamp)
        .bind(finding.source_url.as_deref())
        .bind(finding.label as i64)
        .bind(&probs)
        .bind(&iocs)
        .bind(finding.risk)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(
            "Stored finding {} for {}",
            id,
            finding.source_url.as_deref().unwrap_or("<text>")
        );
        Ok(id)
    }

    /// Most recent findings first
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Finding>> {
        let rows = sqlx::query_as::<_, FindingRow>(
            r#"
            SELECT id, ts, source_url, label, probs, iocs, risk
            FROM findings
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FindingRow::into_finding).collect()
    }

    /// The subset of `candidates` already stored as some row's URL
    pub async fn seen_urls(&self, candidates: &[String]) -> Result<HashSet<String>> {
        let mut seen = HashSet::new();

        for chunk in candidates.chunks(SEEN_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT source_url FROM findings WHERE source_url IN (");
            let mut separated = builder.separated(", ");
            for url in chunk {
                separated.push_bind(url);
            }
            separated.push_unseparated(")");

            let urls: Vec<String> = builder
                .build_query_scalar::<String>()
                .fetch_all(&self.pool)
                .await?;
            seen.extend(urls);
        }

        Ok(seen)
    }

    /// Total stored findings
    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM findings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[derive(Debug, FromRow)]
struct FindingRow {
    id: i64,
    ts: i64,
    source_url: Option<String>,
    label: i64,
    probs: String,
    iocs: String,
    risk: f64,
}

impl FindingRow {
    fn into_finding(self) -> Result<Finding> {
        let probabilities: Vec<f64> = serde_json::from_str(&self.probs)?;
        let iocs: IocMap = serde_json::from_str(&self.iocs)?;
        let label = self.label as u32;

        Ok(Finding {
            id: Some(self.id),
            timestamp: self.ts,
            source_url: self.source_url,
            label,
            label_name: label_name(label).to_string(),
            probabilities,
            iocs,
            risk: self.risk,
        })
    }
}
