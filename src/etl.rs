//! ETL pass: turn resolved markets into labeled training data
//!
//! For every resolved market this labels its scored posts against the
//! probability time series, stamps each row with hours-to-resolution, writes
//! the rows back to `training_posts`, and can export both datasets as JSON
//! files for offline training runs.

use crate::error::{Error, Result};
use crate::labels;
use crate::storage::Repository;
use crate::types::{LabeledPost, Market};
use std::fs;
use std::path::{Path, PathBuf};

const MARKETS_FILE: &str = "resolved_markets.json";
const POSTS_FILE: &str = "training_posts.json";

/// What one ETL pass touched
#[derive(Debug, Clone, Default)]
pub struct EtlSummary {
    pub markets_processed: usize,
    pub markets_skipped: usize,
    pub posts_labeled: usize,
}

/// Label every resolved market's posts and upsert them into
/// `training_posts`. Markets without a winning outcome are skipped; reruns
/// overwrite earlier rows.
pub async fn run(repo: &dyn Repository) -> Result<EtlSummary> {
    let markets = repo.resolved_markets().await?;
    tracing::info!("labeling posts for {} resolved markets", markets.len());

    let mut summary = EtlSummary::default();
    for market in &markets {
        let Some(winner) = market.resolved_outcome_id.as_deref() else {
            tracing::warn!("market {} resolved without an outcome id, skipping", market.id);
            summary.markets_skipped += 1;
            continue;
        };

        let posts = repo.posts_for_market(&market.id).await?;
        if posts.is_empty() {
            summary.markets_skipped += 1;
            continue;
        }
        let snapshots = repo.snapshots_for_market(&market.id).await?;

        let mut labeled = labels::label_posts(&posts, winner, &snapshots);
        for lp in &mut labeled {
            lp.hours_before_resolution = hours_before_resolution(market, lp);
        }

        summary.posts_labeled += repo.upsert_labeled_posts(&labeled).await?;
        summary.markets_processed += 1;
    }

    tracing::info!(
        "etl complete: {} markets, {} posts labeled, {} skipped",
        summary.markets_processed,
        summary.posts_labeled,
        summary.markets_skipped
    );
    Ok(summary)
}

fn hours_before_resolution(market: &Market, lp: &LabeledPost) -> f64 {
    match (market.resolved_at, lp.post.scored_at) {
        (Some(resolved), Some(scored)) => {
            ((resolved - scored).num_seconds() as f64 / 3600.0).max(0.0)
        }
        _ => 0.0,
    }
}

/// Paths produced by an export
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub markets: PathBuf,
    pub posts: PathBuf,
}

/// Snapshot the training tables to JSON files under `data_dir`
pub async fn export(repo: &dyn Repository, data_dir: &Path) -> Result<ExportPaths> {
    fs::create_dir_all(data_dir)?;

    let markets = repo.resolved_markets().await?;
    let markets_path = data_dir.join(MARKETS_FILE);
    fs::write(&markets_path, serde_json::to_vec_pretty(&markets)?)?;
    tracing::info!("exported {} markets to {}", markets.len(), markets_path.display());

    let labeled = repo.labeled_posts().await?;
    let posts_path = data_dir.join(POSTS_FILE);
    fs::write(&posts_path, serde_json::to_vec_pretty(&labeled)?)?;
    tracing::info!("exported {} training posts to {}", labeled.len(), posts_path.display());

    Ok(ExportPaths { markets: markets_path, posts: posts_path })
}

/// Load a previous export. A missing file is a `TrainingDataMissing` error
/// telling the operator to run the export first.
pub fn load_training_data(data_dir: &Path) -> Result<(Vec<Market>, Vec<LabeledPost>)> {
    let markets = read_json(&data_dir.join(MARKETS_FILE))?;
    let posts = read_json(&data_dir.join(POSTS_FILE))?;
    Ok((markets, posts))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(Error::TrainingDataMissing(format!(
            "{} not found, run the export first",
            path.display()
        )));
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteRepository;
    use crate::types::{
        EngagementCounts, EvidenceScores, MarketStatus, Post, PostFlags, ProbabilitySnapshot,
    };
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()
    }

    fn resolved_market(id: &str, winner: Option<&str>) -> Market {
        Market {
            id: id.to_string(),
            question: "q".to_string(),
            status: MarketStatus::Resolved,
            outcomes: vec!["yes".to_string(), "no".to_string()],
            created_at: Some(t0() - Duration::days(10)),
            resolved_at: Some(t0()),
            resolved_outcome_id: winner.map(|w| w.to_string()),
            final_probabilities: HashMap::from([("yes".to_string(), 0.9), ("no".to_string(), 0.1)]),
        }
    }

    fn post(id: &str, market_id: &str, hours_before: i64) -> Post {
        Post {
            id: id.to_string(),
            market_id: market_id.to_string(),
            author_id: "a1".to_string(),
            author_followers: 10,
            author_verified: false,
            text: "evidence".to_string(),
            metrics: EngagementCounts::default(),
            scores: EvidenceScores::default(),
            flags: PostFlags::default(),
            scored_at: Some(t0() - Duration::hours(hours_before)),
        }
    }

    fn snapshot(market_id: &str, hours_before: i64, yes: f64) -> ProbabilitySnapshot {
        ProbabilitySnapshot {
            market_id: market_id.to_string(),
            timestamp: t0() - Duration::hours(hours_before),
            probabilities: HashMap::from([
                ("yes".to_string(), yes),
                ("no".to_string(), 1.0 - yes),
            ]),
        }
    }

    async fn seeded_repo() -> SqliteRepository {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.upsert_market(&resolved_market("m1", Some("yes"))).await.unwrap();
        repo.upsert_post(&post("p1", "m1", 48)).await.unwrap();
        repo.upsert_post(&post("p2", "m1", 12)).await.unwrap();
        repo.insert_snapshot(&snapshot("m1", 72, 0.4)).await.unwrap();
        repo.insert_snapshot(&snapshot("m1", 24, 0.6)).await.unwrap();
        repo.insert_snapshot(&snapshot("m1", 1, 0.8)).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_run_labels_and_stamps_hours() {
        let repo = seeded_repo().await;
        let summary = run(&repo).await.unwrap();

        assert_eq!(summary.markets_processed, 1);
        assert_eq!(summary.posts_labeled, 2);
        assert_eq!(summary.markets_skipped, 0);

        let rows = repo.labeled_posts().await.unwrap();
        assert_eq!(rows.len(), 2);

        // p1 at 48h out: before=0.4 (72h snap), after=0.6 (24h snap)
        let p1 = rows.iter().find(|r| r.post.id == "p1").unwrap();
        assert_eq!(p1.prob_before, 0.4);
        assert_eq!(p1.prob_after, 0.6);
        assert_eq!(p1.label, Some(true));
        assert!((p1.hours_before_resolution - 48.0).abs() < 1e-9);

        // p2 at 12h out: before=0.6, after=0.8
        let p2 = rows.iter().find(|r| r.post.id == "p2").unwrap();
        assert_eq!(p2.prob_before, 0.6);
        assert_eq!(p2.prob_after, 0.8);
        assert!((p2.hours_before_resolution - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_run_skips_market_without_winner() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.upsert_market(&resolved_market("m1", None)).await.unwrap();
        repo.upsert_post(&post("p1", "m1", 5)).await.unwrap();

        let summary = run(&repo).await.unwrap();
        assert_eq!(summary.markets_processed, 0);
        assert_eq!(summary.markets_skipped, 1);
        assert!(repo.labeled_posts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_is_rerunnable() {
        let repo = seeded_repo().await;
        run(&repo).await.unwrap();
        let summary = run(&repo).await.unwrap();

        assert_eq!(summary.posts_labeled, 2);
        assert_eq!(repo.labeled_posts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_export_then_load_round_trip() {
        let repo = seeded_repo().await;
        run(&repo).await.unwrap();

        let dir = TempDir::new().unwrap();
        let paths = export(&repo, dir.path()).await.unwrap();
        assert!(paths.markets.exists());
        assert!(paths.posts.exists());

        let (markets, posts) = load_training_data(dir.path()).unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].id, "m1");
        assert_eq!(posts.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_export_is_a_clear_error() {
        let dir = TempDir::new().unwrap();
        let err = load_training_data(dir.path()).unwrap_err();
        assert!(matches!(err, Error::TrainingDataMissing(_)));
        assert!(err.to_string().contains("resolved_markets.json"));
    }
}
