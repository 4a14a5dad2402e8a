//! Storage round-trip tests against an in-memory database

use super::*;
use crate::types::{EngagementCounts, EvidenceScores, PostFlags};
use chrono::TimeZone;

fn market(id: &str, status: MarketStatus) -> Market {
    Market {
        id: id.to_string(),
        question: format!("Question for {id}"),
        status,
        outcomes: vec!["yes".to_string(), "no".to_string()],
        created_at: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        resolved_at: Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()),
        resolved_outcome_id: Some("yes".to_string()),
        final_probabilities: HashMap::from([("yes".to_string(), 0.85), ("no".to_string(), 0.15)]),
    }
}

fn post(id: &str, market_id: &str) -> Post {
    Post {
        id: id.to_string(),
        market_id: market_id.to_string(),
        author_id: "author-1".to_string(),
        author_followers: 1200,
        author_verified: true,
        text: "looks likely to me $YES".to_string(),
        metrics: EngagementCounts {
            like_count: 10,
            repost_count: 2,
            reply_count: 1,
            quote_count: 0,
        },
        scores: EvidenceScores {
            relevance: 0.9,
            stance: 0.5,
            strength: 0.7,
            credibility: 0.8,
            confidence: 0.6,
        },
        flags: PostFlags {
            is_sarcasm: false,
            is_question: false,
            is_rumor: true,
        },
        scored_at: Some(Utc.with_ymd_and_hms(2025, 1, 5, 12, 0, 0).unwrap()),
    }
}

fn record(model_id: &str, name: &str, version: &str, deployed: bool) -> ModelRecord {
    ModelRecord {
        model_id: model_id.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        kind: ModelKind::Regression,
        path: format!("models/{name}/{version}.json"),
        train_size: 60,
        metrics: serde_json::json!({"best_rmse": 0.12}),
        feature_importances: vec![("K".to_string(), 1.5)],
        hyperparameters: serde_json::json!({"num_rounds": 100}),
        approved: deployed,
        deployed,
        created_at: Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn test_market_round_trip() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    let m = market("m1", MarketStatus::Resolved);
    repo.upsert_market(&m).await.unwrap();
    repo.upsert_market(&market("m2", MarketStatus::Open))
        .await
        .unwrap();

    let resolved = repo.resolved_markets().await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, "m1");
    assert_eq!(resolved[0].status, MarketStatus::Resolved);
    assert_eq!(resolved[0].final_prob_of_winner(), Some(0.85));
    assert_eq!(resolved[0].resolved_at, m.resolved_at);

    let fetched = repo.market("m2").await.unwrap().unwrap();
    assert_eq!(fetched.status, MarketStatus::Open);
    assert!(repo.market("missing").await.unwrap().is_none());

    assert_eq!(repo.resolved_market_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_post_round_trip_preserves_scores_and_flags() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    repo.upsert_post(&post("p1", "m1")).await.unwrap();
    repo.upsert_post(&post("p2", "other")).await.unwrap();

    let posts = repo.posts_for_market("m1").await.unwrap();
    assert_eq!(posts.len(), 1);
    let p = &posts[0];
    assert_eq!(p.author_followers, 1200);
    assert!(p.author_verified);
    assert_eq!(p.scores.relevance, 0.9);
    assert_eq!(p.scores.stance, 0.5);
    assert!(p.flags.is_rumor);
    assert_eq!(p.metrics.like_count, 10);
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    let snap = ProbabilitySnapshot {
        market_id: "m1".to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap(),
        probabilities: HashMap::from([("yes".to_string(), 0.6), ("no".to_string(), 0.4)]),
    };
    repo.insert_snapshot(&snap).await.unwrap();

    let snaps = repo.snapshots_for_market("m1").await.unwrap();
    assert_eq!(snaps.len(), 1);
    assert_eq!(snaps[0].timestamp, snap.timestamp);
    assert_eq!(snaps[0].probabilities["yes"], 0.6);

    assert!(repo.snapshots_for_market("m2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_labeled_posts_upsert_is_idempotent() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    let labeled = vec![
        LabeledPost {
            post: post("p1", "m1"),
            prob_before: 0.4,
            prob_after: 0.6,
            delta_prob: 0.2,
            label: Some(true),
            hours_before_resolution: 30.0,
        },
        LabeledPost {
            post: post("p2", "m1"),
            prob_before: 0.5,
            prob_after: 0.5,
            delta_prob: 0.0,
            label: None,
            hours_before_resolution: 0.0,
        },
    ];

    assert_eq!(repo.upsert_labeled_posts(&labeled).await.unwrap(), 2);
    // Re-running the ETL overwrites rather than duplicating
    assert_eq!(repo.upsert_labeled_posts(&labeled).await.unwrap(), 2);

    let rows = repo.labeled_posts().await.unwrap();
    assert_eq!(rows.len(), 2);
    let p1 = rows.iter().find(|r| r.post.id == "p1").unwrap();
    assert_eq!(p1.label, Some(true));
    assert_eq!(p1.hours_before_resolution, 30.0);
    let p2 = rows.iter().find(|r| r.post.id == "p2").unwrap();
    assert_eq!(p2.label, None);

    // The gate count excludes unlabeled rows
    assert_eq!(repo.labeled_post_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_registry_insert_and_lookup() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    repo.insert_model_record(&record("id1", "market_correction", "v1", false))
        .await
        .unwrap();
    let mut v2 = record("id2", "market_correction", "v2", false);
    v2.created_at = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
    repo.insert_model_record(&v2).await.unwrap();
    repo.insert_model_record(&record("id3", "post_usefulness", "v1", false))
        .await
        .unwrap();

    assert!(repo.deployed_model("market_correction").await.unwrap().is_none());

    let all = repo.model_records(None).await.unwrap();
    assert_eq!(all.len(), 3);
    // Newest first
    assert_eq!(all[0].model_id, "id2");

    let by_name = repo.model_records(Some("market_correction")).await.unwrap();
    assert_eq!(by_name.len(), 2);
    assert!(by_name.iter().all(|r| r.name == "market_correction"));
}

#[tokio::test]
async fn test_set_deployed_is_exclusive_per_name() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    repo.insert_model_record(&record("id1", "market_correction", "v1", true))
        .await
        .unwrap();
    repo.insert_model_record(&record("id2", "market_correction", "v2", false))
        .await
        .unwrap();
    repo.insert_model_record(&record("id3", "post_usefulness", "v1", true))
        .await
        .unwrap();

    repo.set_deployed("id2").await.unwrap();

    let deployed = repo.deployed_model("market_correction").await.unwrap().unwrap();
    assert_eq!(deployed.model_id, "id2");
    assert!(deployed.approved);

    // The other name's deployment is untouched
    let other = repo.deployed_model("post_usefulness").await.unwrap().unwrap();
    assert_eq!(other.model_id, "id3");

    let rows = repo.model_records(Some("market_correction")).await.unwrap();
    assert_eq!(rows.iter().filter(|r| r.deployed).count(), 1);
}

#[tokio::test]
async fn test_model_record_json_fields_round_trip() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    repo.insert_model_record(&record("id1", "market_correction", "v1", false))
        .await
        .unwrap();

    let rows = repo.model_records(Some("market_correction")).await.unwrap();
    assert_eq!(rows[0].metrics["best_rmse"], 0.12);
    assert_eq!(rows[0].feature_importances, vec![("K".to_string(), 1.5)]);
    assert_eq!(rows[0].hyperparameters["num_rounds"], 100);
    assert_eq!(rows[0].train_size, 60);
}
