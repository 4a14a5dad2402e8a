//! SQLite-backed persistence
//!
//! One `Repository` trait covers everything the loop reads and writes:
//! resolved markets with their scored posts and probability snapshots on the
//! way in, labeled training posts and model registry rows on the way out.
//! Structured fields (probability maps, scores, metrics, importances) are
//! stored as JSON text columns; timestamps are RFC 3339 text.

#[cfg(test)]
mod tests;

use crate::error::{Error, Result};
use crate::types::{
    LabeledPost, Market, MarketStatus, ModelKind, ModelRecord, Post, ProbabilitySnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;

/// Persistence seam for the feedback loop
#[async_trait]
pub trait Repository: Send + Sync {
    /// All resolved markets, for dataset construction and training gates
    async fn resolved_markets(&self) -> Result<Vec<Market>>;

    /// One market by id, for serving-time feature extraction
    async fn market(&self, market_id: &str) -> Result<Option<Market>>;

    /// Scored posts for a market, newest first
    async fn posts_for_market(&self, market_id: &str) -> Result<Vec<Post>>;

    /// Probability snapshots for a market, unordered (labeling sorts them)
    async fn snapshots_for_market(&self, market_id: &str) -> Result<Vec<ProbabilitySnapshot>>;

    /// Replace-insert labeled rows produced by the ETL pass
    async fn upsert_labeled_posts(&self, labeled: &[LabeledPost]) -> Result<usize>;

    /// All labeled rows, for classifier training
    async fn labeled_posts(&self) -> Result<Vec<LabeledPost>>;

    /// Count of labeled rows with a usable label
    async fn labeled_post_count(&self) -> Result<usize>;

    /// Register a trained model artifact
    async fn insert_model_record(&self, record: &ModelRecord) -> Result<()>;

    /// The deployed record for a model name, if any
    async fn deployed_model(&self, name: &str) -> Result<Option<ModelRecord>>;

    /// Registry rows, newest first, optionally filtered by name
    async fn model_records(&self, name: Option<&str>) -> Result<Vec<ModelRecord>>;
}

/// SQLite implementation over a connection pool
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connect and ensure the schema exists. `url` accepts the usual sqlx
    /// forms, e.g. `sqlite://data/market_ml.db?mode=rwc` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let repo = Self { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    /// In-memory database on a single connection, for tests
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                status TEXT NOT NULL,
                outcomes TEXT NOT NULL,
                created_at TEXT,
                resolved_at TEXT,
                resolved_outcome_id TEXT,
                final_probabilities TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                author_followers INTEGER NOT NULL DEFAULT 0,
                author_verified INTEGER NOT NULL DEFAULT 0,
                text TEXT NOT NULL DEFAULT '',
                metrics TEXT NOT NULL DEFAULT '{}',
                scores TEXT NOT NULL DEFAULT '{}',
                flags TEXT NOT NULL DEFAULT '{}',
                scored_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_posts_market ON posts(market_id);
            CREATE TABLE IF NOT EXISTS probability_snapshots (
                market_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                probabilities TEXT NOT NULL,
                PRIMARY KEY (market_id, timestamp)
            );
            CREATE TABLE IF NOT EXISTS training_posts (
                post_id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                post TEXT NOT NULL,
                prob_before REAL NOT NULL,
                prob_after REAL NOT NULL,
                delta_prob REAL NOT NULL,
                label INTEGER,
                hours_before_resolution REAL NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS model_registry (
                model_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                kind TEXT NOT NULL,
                path TEXT NOT NULL,
                train_size INTEGER NOT NULL,
                metrics TEXT NOT NULL,
                feature_importances TEXT NOT NULL,
                hyperparameters TEXT NOT NULL,
                approved INTEGER NOT NULL DEFAULT 0,
                deployed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_registry_name ON model_registry(name);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a market row. Used by ingestion and tests.
    pub async fn upsert_market(&self, market: &Market) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO markets \
             (id, question, status, outcomes, created_at, resolved_at, resolved_outcome_id, final_probabilities) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&market.id)
        .bind(&market.question)
        .bind(status_str(market.status))
        .bind(serde_json::to_string(&market.outcomes)?)
        .bind(market.created_at.map(|t| t.to_rfc3339()))
        .bind(market.resolved_at.map(|t| t.to_rfc3339()))
        .bind(&market.resolved_outcome_id)
        .bind(serde_json::to_string(&market.final_probabilities)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO posts \
             (id, market_id, author_id, author_followers, author_verified, text, metrics, scores, flags, scored_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&post.id)
        .bind(&post.market_id)
        .bind(&post.author_id)
        .bind(post.author_followers as i64)
        .bind(post.author_verified)
        .bind(&post.text)
        .bind(serde_json::to_string(&post.metrics)?)
        .bind(serde_json::to_string(&post.scores)?)
        .bind(serde_json::to_string(&post.flags)?)
        .bind(post.scored_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_snapshot(&self, snapshot: &ProbabilitySnapshot) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO probability_snapshots (market_id, timestamp, probabilities) \
             VALUES (?, ?, ?)",
        )
        .bind(&snapshot.market_id)
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(serde_json::to_string(&snapshot.probabilities)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip the `deployed` flag on one registry row, clearing it on any other
    /// row with the same name.
    pub async fn set_deployed(&self, model_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE model_registry SET deployed = 0 \
             WHERE name = (SELECT name FROM model_registry WHERE model_id = ?)",
        )
        .bind(model_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE model_registry SET deployed = 1, approved = 1 WHERE model_id = ?")
            .bind(model_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn resolved_market_count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM markets WHERE status = 'resolved'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as usize)
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn resolved_markets(&self) -> Result<Vec<Market>> {
        let rows = sqlx::query("SELECT * FROM markets WHERE status = 'resolved'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(market_from_row).collect()
    }

    async fn market(&self, market_id: &str) -> Result<Option<Market>> {
        let row = sqlx::query("SELECT * FROM markets WHERE id = ?")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(market_from_row).transpose()
    }

    async fn posts_for_market(&self, market_id: &str) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT * FROM posts WHERE market_id = ? ORDER BY scored_at DESC",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(post_from_row).collect()
    }

    async fn snapshots_for_market(&self, market_id: &str) -> Result<Vec<ProbabilitySnapshot>> {
        let rows = sqlx::query("SELECT * FROM probability_snapshots WHERE market_id = ?")
            .bind(market_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn upsert_labeled_posts(&self, labeled: &[LabeledPost]) -> Result<usize> {
        let mut written = 0;
        for lp in labeled {
            sqlx::query(
                "INSERT OR REPLACE INTO training_posts \
                 (post_id, market_id, post, prob_before, prob_after, delta_prob, label, hours_before_resolution) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&lp.post.id)
            .bind(&lp.post.market_id)
            .bind(serde_json::to_string(&lp.post)?)
            .bind(lp.prob_before)
            .bind(lp.prob_after)
            .bind(lp.delta_prob)
            .bind(lp.label)
            .bind(lp.hours_before_resolution)
            .execute(&self.pool)
            .await?;
            written += 1;
        }
        Ok(written)
    }

    async fn labeled_posts(&self) -> Result<Vec<LabeledPost>> {
        let rows = sqlx::query("SELECT * FROM training_posts")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(labeled_from_row).collect()
    }

    async fn labeled_post_count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM training_posts WHERE label IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as usize)
    }

    async fn insert_model_record(&self, record: &ModelRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO model_registry \
             (model_id, name, version, kind, path, train_size, metrics, feature_importances, \
              hyperparameters, approved, deployed, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.model_id)
        .bind(&record.name)
        .bind(&record.version)
        .bind(kind_str(record.kind))
        .bind(&record.path)
        .bind(record.train_size as i64)
        .bind(serde_json::to_string(&record.metrics)?)
        .bind(serde_json::to_string(&record.feature_importances)?)
        .bind(serde_json::to_string(&record.hyperparameters)?)
        .bind(record.approved)
        .bind(record.deployed)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deployed_model(&self, name: &str) -> Result<Option<ModelRecord>> {
        let row = sqlx::query(
            "SELECT * FROM model_registry WHERE name = ? AND deployed = 1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn model_records(&self, name: Option<&str>) -> Result<Vec<ModelRecord>> {
        let rows = match name {
            Some(name) => {
                sqlx::query(
                    "SELECT * FROM model_registry WHERE name = ? ORDER BY created_at DESC",
                )
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM model_registry ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(record_from_row).collect()
    }
}

fn status_str(status: MarketStatus) -> &'static str {
    match status {
        MarketStatus::Open => "open",
        MarketStatus::Closed => "closed",
        MarketStatus::Resolved => "resolved",
    }
}

fn parse_status(s: &str) -> Result<MarketStatus> {
    match s {
        "open" => Ok(MarketStatus::Open),
        "closed" => Ok(MarketStatus::Closed),
        "resolved" => Ok(MarketStatus::Resolved),
        other => Err(Error::InvalidTrainingData(format!(
            "unknown market status '{other}'"
        ))),
    }
}

fn kind_str(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::Regression => "regression",
        ModelKind::Classification => "classification",
    }
}

fn parse_kind(s: &str) -> Result<ModelKind> {
    match s {
        "regression" => Ok(ModelKind::Regression),
        "classification" => Ok(ModelKind::Classification),
        other => Err(Error::InvalidTrainingData(format!(
            "unknown model kind '{other}'"
        ))),
    }
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::InvalidTrainingData(format!("bad timestamp '{s}': {e}")))
        })
        .transpose()
}

fn market_from_row(row: &SqliteRow) -> Result<Market> {
    let status: String = row.try_get("status")?;
    let outcomes: String = row.try_get("outcomes")?;
    let final_probabilities: String = row.try_get("final_probabilities")?;
    Ok(Market {
        id: row.try_get("id")?,
        question: row.try_get("question")?,
        status: parse_status(&status)?,
        outcomes: serde_json::from_str(&outcomes)?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        resolved_at: parse_timestamp(row.try_get("resolved_at")?)?,
        resolved_outcome_id: row.try_get("resolved_outcome_id")?,
        final_probabilities: serde_json::from_str::<HashMap<String, f64>>(&final_probabilities)?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let metrics: String = row.try_get("metrics")?;
    let scores: String = row.try_get("scores")?;
    let flags: String = row.try_get("flags")?;
    Ok(Post {
        id: row.try_get("id")?,
        market_id: row.try_get("market_id")?,
        author_id: row.try_get("author_id")?,
        author_followers: row.try_get::<i64, _>("author_followers")? as u64,
        author_verified: row.try_get("author_verified")?,
        text: row.try_get("text")?,
        metrics: serde_json::from_str(&metrics)?,
        scores: serde_json::from_str(&scores)?,
        flags: serde_json::from_str(&flags)?,
        scored_at: parse_timestamp(row.try_get("scored_at")?)?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<ProbabilitySnapshot> {
    let timestamp: String = row.try_get("timestamp")?;
    let probabilities: String = row.try_get("probabilities")?;
    Ok(ProbabilitySnapshot {
        market_id: row.try_get("market_id")?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| Error::InvalidTrainingData(format!("bad timestamp '{timestamp}': {e}")))?
            .with_timezone(&Utc),
        probabilities: serde_json::from_str(&probabilities)?,
    })
}

fn labeled_from_row(row: &SqliteRow) -> Result<LabeledPost> {
    let post: String = row.try_get("post")?;
    Ok(LabeledPost {
        post: serde_json::from_str(&post)?,
        prob_before: row.try_get("prob_before")?,
        prob_after: row.try_get("prob_after")?,
        delta_prob: row.try_get("delta_prob")?,
        label: row.try_get("label")?,
        hours_before_resolution: row.try_get("hours_before_resolution")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<ModelRecord> {
    let kind: String = row.try_get("kind")?;
    let metrics: String = row.try_get("metrics")?;
    let importances: String = row.try_get("feature_importances")?;
    let hyperparameters: String = row.try_get("hyperparameters")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(ModelRecord {
        model_id: row.try_get("model_id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        kind: parse_kind(&kind)?,
        path: row.try_get("path")?,
        train_size: row.try_get::<i64, _>("train_size")? as usize,
        metrics: serde_json::from_str(&metrics)?,
        feature_importances: serde_json::from_str(&importances)?,
        hyperparameters: serde_json::from_str(&hyperparameters)?,
        approved: row.try_get("approved")?,
        deployed: row.try_get("deployed")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::InvalidTrainingData(format!("bad timestamp '{created_at}': {e}")))?
            .with_timezone(&Utc),
    })
}
