//! Serving-path tests: correction math, degradation, heuristic fallback

use super::*;
use crate::boost::{Dataset, Gbdt, Objective};
use crate::config::GbdtParams;
use crate::registry::{ModelCache, ModelRegistry, CORRECTION_MODEL, USEFULNESS_MODEL};
use crate::storage::SqliteRepository;
use crate::training::TrainedModel;
use crate::types::ModelKind;
use std::sync::Arc;
use tempfile::TempDir;

fn small_params() -> GbdtParams {
    GbdtParams {
        num_rounds: 30,
        learning_rate: 0.3,
        max_depth: 2,
        ..GbdtParams::default()
    }
}

/// Regression model that predicts a constant logit shift
fn constant_correction(shift: f64) -> TrainedModel {
    let mut data = Dataset::new(vec!["mean_relevance".to_string()]);
    for i in 0..10 {
        data.push(vec![i as f64 / 10.0], shift);
    }
    let model = Gbdt::train(&data, None, &small_params(), Objective::SquaredError).unwrap();
    TrainedModel {
        model,
        kind: ModelKind::Regression,
        metrics: serde_json::json!({}),
        importances: vec![("mean_relevance".to_string(), 1.0)],
        train_size: 10,
    }
}

fn usefulness_classifier() -> TrainedModel {
    let mut data = Dataset::new(vec!["semantic_strength".to_string()]);
    for i in 0..40 {
        let x = i as f64 / 40.0;
        data.push(vec![x], if x > 0.3 { 1.0 } else { 0.0 });
    }
    let model = Gbdt::train(&data, None, &small_params(), Objective::Logistic).unwrap();
    TrainedModel {
        model,
        kind: ModelKind::Classification,
        metrics: serde_json::json!({}),
        importances: vec![("semantic_strength".to_string(), 1.0)],
        train_size: 40,
    }
}

async fn engine_with(
    correction: Option<TrainedModel>,
    usefulness: Option<TrainedModel>,
) -> (TempDir, CorrectionEngine) {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(SqliteRepository::in_memory().await.unwrap());
    let registry = ModelRegistry::new(dir.path().to_path_buf(), repo);

    if let Some(trained) = correction {
        registry
            .save(CORRECTION_MODEL, Some("v1".to_string()), &trained, &small_params())
            .await
            .unwrap();
    }
    if let Some(trained) = usefulness {
        registry
            .save(USEFULNESS_MODEL, Some("v1".to_string()), &trained, &small_params())
            .await
            .unwrap();
    }

    (dir, CorrectionEngine::new(ModelCache::new(registry)))
}

fn correction_request(probs: &[(&str, f64)]) -> CorrectionRequest {
    CorrectionRequest {
        market_id: "m1".to_string(),
        current_probabilities: probs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
        market_features: MarketSignals { k: probs.len(), ..MarketSignals::default() },
        recent_summary: RecentSummary {
            wbatch: 0.2,
            last_hour_delta: 0.01,
            top_post_features: vec![PostSignal { relevance: 0.9, ..PostSignal::default() }],
        },
    }
}

#[tokio::test]
async fn test_no_model_returns_identity() {
    let (_dir, engine) = engine_with(None, None).await;
    let request = correction_request(&[("yes", 0.7), ("no", 0.3)]);

    let response = engine.correct(&request, None).await;
    assert_eq!(response.probabilities_corrected, request.current_probabilities);
    assert_eq!(response.model_version, "none");
    assert_eq!(response.confidence, 0.0);
    assert_eq!(
        response.explain["message"],
        serde_json::json!("no model available yet")
    );
}

#[tokio::test]
async fn test_correction_renormalizes_and_stays_in_bounds() {
    let (_dir, engine) = engine_with(Some(constant_correction(1.0)), None).await;
    let request = correction_request(&[("yes", 0.7), ("no", 0.3)]);

    let response = engine.correct(&request, None).await;
    assert_eq!(response.model_version, "v1");
    assert_eq!(response.confidence, 0.8);

    let corrected = &response.probabilities_corrected;
    let total: f64 = corrected.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    for value in corrected.values() {
        assert!(*value > 0.0 && *value < 1.0);
    }
    // Ordering between outcomes survives a uniform logit shift
    assert!(corrected["yes"] > corrected["no"]);
    // And the shift changed the distribution
    assert!((corrected["yes"] - 0.7).abs() > 1e-6);

    assert!(!response.explain.is_empty());
    assert!(response.explain.len() <= 5);
}

#[tokio::test]
async fn test_extreme_probabilities_are_clipped_not_panicked() {
    let (_dir, engine) = engine_with(Some(constant_correction(2.0)), None).await;
    let request = correction_request(&[("yes", 0.001), ("no", 0.999)]);

    let response = engine.correct(&request, None).await;
    let corrected = &response.probabilities_corrected;
    let total: f64 = corrected.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    for value in corrected.values() {
        assert!(value.is_finite());
        assert!(*value > 0.0 && *value < 1.0);
    }
}

#[tokio::test]
async fn test_more_than_two_outcomes_degrades() {
    let (_dir, engine) = engine_with(Some(constant_correction(1.0)), None).await;
    let request = correction_request(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);

    let response = engine.correct(&request, None).await;
    assert_eq!(response.probabilities_corrected, request.current_probabilities);
    assert_eq!(response.model_version, "none");
    assert_eq!(response.confidence, 0.0);
    assert!(response.explain["message"]
        .as_str()
        .unwrap()
        .contains("binary"));
}

#[tokio::test]
async fn test_missing_explicit_version_degrades() {
    let (_dir, engine) = engine_with(Some(constant_correction(1.0)), None).await;
    let request = correction_request(&[("yes", 0.6), ("no", 0.4)]);

    let response = engine.correct(&request, Some("v99")).await;
    assert_eq!(response.model_version, "none");
    assert_eq!(response.probabilities_corrected, request.current_probabilities);
}

#[tokio::test]
async fn test_heuristic_usefulness_without_model() {
    let (_dir, engine) = engine_with(None, None).await;
    let request = PostUsefulnessRequest {
        post_features: PostSignal {
            relevance: 0.8,
            strength: 0.6,
            credibility: 0.9,
            ..PostSignal::default()
        },
        market_context: MarketSignals::default(),
        prob_before: 0.5,
    };

    let response = engine.usefulness(&request, None).await;
    assert_eq!(response.model_version, "heuristic");
    assert!((response.usefulness_score - 0.432).abs() < 1e-12);
    assert_eq!(response.move_toward_truth_prob, 0.5);
}

#[tokio::test]
async fn test_usefulness_with_model_scores_strong_posts_higher() {
    let (_dir, engine) = engine_with(None, Some(usefulness_classifier())).await;

    let strong = PostUsefulnessRequest {
        post_features: PostSignal {
            relevance: 0.9,
            strength: 0.9,
            credibility: 0.9,
            ..PostSignal::default()
        },
        market_context: MarketSignals::default(),
        prob_before: 0.5,
    };
    let weak = PostUsefulnessRequest {
        post_features: PostSignal {
            relevance: 0.1,
            strength: 0.1,
            credibility: 0.1,
            ..PostSignal::default()
        },
        market_context: MarketSignals::default(),
        prob_before: 0.5,
    };

    let strong_response = engine.usefulness(&strong, None).await;
    let weak_response = engine.usefulness(&weak, None).await;

    assert_eq!(strong_response.model_version, "v1");
    assert!(strong_response.usefulness_score > 0.5);
    assert!(weak_response.usefulness_score < 0.5);
    assert_eq!(
        strong_response.usefulness_score,
        strong_response.move_toward_truth_prob
    );
}
