//! Online prediction
//!
//! The correction engine applies the market correction model to a request's
//! current probabilities in logit space and renormalizes, and scores single
//! posts with the usefulness classifier. Both paths are infallible by
//! construction: when no model resolves (or the request is unsupported) the
//! response degrades to identity probabilities or the heuristic score, with
//! the reason in the `explain` payload.

#[cfg(test)]
mod tests;

use crate::boost::Gbdt;
use crate::registry::{ModelCache, CORRECTION_MODEL, USEFULNESS_MODEL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Probabilities are clipped to this band before the logit transform
const PROB_CLIP: (f64, f64) = (0.01, 0.99);
/// How many importances go into the explanation
const EXPLAIN_TOP: usize = 5;

/// Per-post signal scores, as sent by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostSignal {
    #[serde(default)]
    pub relevance: f64,
    #[serde(default)]
    pub stance: f64,
    #[serde(default)]
    pub strength: f64,
    #[serde(default)]
    pub credibility: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub log_followers: f64,
    #[serde(default)]
    pub author_verified: bool,
}

/// Market-level context for a correction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSignals {
    #[serde(rename = "K", default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub duration_days: f64,
    #[serde(default)]
    pub avg_posts_per_hour: f64,
    /// Carried through for observability only, never a model feature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

fn default_k() -> usize {
    2
}

impl Default for MarketSignals {
    fn default() -> Self {
        Self { k: default_k(), duration_days: 0.0, avg_posts_per_hour: 0.0, topic: None }
    }
}

/// Summary of recent evidence for a market
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentSummary {
    #[serde(rename = "Wbatch", default)]
    pub wbatch: f64,
    #[serde(default)]
    pub last_hour_delta: f64,
    #[serde(default)]
    pub top_post_features: Vec<PostSignal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub market_id: String,
    pub current_probabilities: HashMap<String, f64>,
    #[serde(default)]
    pub market_features: MarketSignals,
    #[serde(default)]
    pub recent_summary: RecentSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionResponse {
    pub probabilities_corrected: HashMap<String, f64>,
    pub model_version: String,
    pub confidence: f64,
    #[serde(default)]
    pub explain: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostUsefulnessRequest {
    #[serde(default)]
    pub post_features: PostSignal,
    #[serde(default)]
    pub market_context: MarketSignals,
    #[serde(default = "default_prob_before")]
    pub prob_before: f64,
}

fn default_prob_before() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostUsefulnessResponse {
    pub usefulness_score: f64,
    pub move_toward_truth_prob: f64,
    pub model_version: String,
}

pub struct CorrectionEngine {
    cache: ModelCache,
}

impl CorrectionEngine {
    pub fn new(cache: ModelCache) -> Self {
        Self { cache }
    }

    /// Correct a market's probabilities.
    ///
    /// Never fails: an unresolvable model, a registry error, or an
    /// unsupported market shape all return the original probabilities with
    /// `model_version = "none"` and zero confidence.
    pub async fn correct(
        &self,
        request: &CorrectionRequest,
        version: Option<&str>,
    ) -> CorrectionResponse {
        if request.current_probabilities.len() > 2 {
            return identity_response(
                request,
                "only binary markets are supported",
            );
        }

        let resolved = match self.cache.get(CORRECTION_MODEL, version).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return identity_response(request, "no model available yet"),
            Err(e) => {
                tracing::warn!("correction model lookup failed: {e}");
                return identity_response(request, "no model available yet");
            }
        };

        let features = correction_features(request);
        let aligned = align_features(resolved.model.feature_names(), &features);
        let correction = resolved.model.predict(&aligned);

        let mut corrected: HashMap<String, f64> = request
            .current_probabilities
            .iter()
            .map(|(outcome, &prob)| {
                let prob = prob.clamp(PROB_CLIP.0, PROB_CLIP.1);
                let logit = (prob / (1.0 - prob)).ln();
                (outcome.clone(), 1.0 / (1.0 + (-(logit + correction)).exp()))
            })
            .collect();

        let total: f64 = corrected.values().sum();
        if total > 0.0 {
            for value in corrected.values_mut() {
                *value /= total;
            }
        }

        CorrectionResponse {
            probabilities_corrected: corrected,
            model_version: resolved.version.clone(),
            // TODO: derive confidence from the model's cross-validation spread
            confidence: 0.8,
            explain: top_importances(&resolved.model),
        }
    }

    /// Score one post's probability of moving the market toward truth.
    ///
    /// Without a model the score falls back to semantic strength
    /// (relevance x strength x credibility) under version `"heuristic"`.
    pub async fn usefulness(
        &self,
        request: &PostUsefulnessRequest,
        version: Option<&str>,
    ) -> PostUsefulnessResponse {
        let resolved = match self.cache.get(USEFULNESS_MODEL, version).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return heuristic_response(request),
            Err(e) => {
                tracing::warn!("usefulness model lookup failed: {e}");
                return heuristic_response(request);
            }
        };

        let features = usefulness_features(request);
        let aligned = align_features(resolved.model.feature_names(), &features);
        let prob = resolved.model.predict(&aligned);

        PostUsefulnessResponse {
            usefulness_score: prob,
            move_toward_truth_prob: prob,
            model_version: resolved.version.clone(),
        }
    }
}

fn identity_response(request: &CorrectionRequest, reason: &str) -> CorrectionResponse {
    let mut explain = serde_json::Map::new();
    explain.insert("message".to_string(), serde_json::Value::String(reason.to_string()));
    CorrectionResponse {
        probabilities_corrected: request.current_probabilities.clone(),
        model_version: "none".to_string(),
        confidence: 0.0,
        explain,
    }
}

fn heuristic_response(request: &PostUsefulnessRequest) -> PostUsefulnessResponse {
    let p = &request.post_features;
    PostUsefulnessResponse {
        usefulness_score: p.relevance * p.strength * p.credibility,
        move_toward_truth_prob: 0.5,
        model_version: "heuristic".to_string(),
    }
}

fn correction_features(request: &CorrectionRequest) -> Vec<(&'static str, f64)> {
    let mut features = vec![
        ("K", request.market_features.k as f64),
        ("duration_days", request.market_features.duration_days),
        ("posts_per_hour", request.market_features.avg_posts_per_hour),
        ("Wbatch", request.recent_summary.wbatch),
        ("last_hour_delta", request.recent_summary.last_hour_delta),
    ];

    let posts = &request.recent_summary.top_post_features;
    if !posts.is_empty() {
        let n = posts.len() as f64;
        features.push(("mean_relevance", posts.iter().map(|p| p.relevance).sum::<f64>() / n));
        features.push(("mean_strength", posts.iter().map(|p| p.strength).sum::<f64>() / n));
        features.push(("mean_credibility", posts.iter().map(|p| p.credibility).sum::<f64>() / n));
        features.push(("mean_stance", posts.iter().map(|p| p.stance).sum::<f64>() / n));
    }

    features
}

fn usefulness_features(request: &PostUsefulnessRequest) -> Vec<(&'static str, f64)> {
    let p = &request.post_features;
    let semantic_strength = p.relevance * p.strength * p.credibility;
    vec![
        ("relevance", p.relevance),
        ("stance", p.stance),
        ("strength", p.strength),
        ("credibility", p.credibility),
        ("confidence", p.confidence),
        ("semantic_strength", semantic_strength),
        ("abs_stance", p.stance.abs()),
        ("signed_signal", p.stance * semantic_strength),
        ("log_followers", p.log_followers),
        ("author_verified", if p.author_verified { 1.0 } else { 0.0 }),
        ("prob_before", request.prob_before),
        ("prob_uncertainty", crate::features::prob_uncertainty(request.prob_before)),
    ]
}

/// Project named request features onto the model's schema; unknown names are
/// dropped, missing ones read zero.
fn align_features(names: &[String], features: &[(&'static str, f64)]) -> Vec<f64> {
    let mut aligned = vec![0.0; names.len()];
    for (name, value) in features {
        if let Some(pos) = names.iter().position(|n| n == name) {
            aligned[pos] = *value;
        }
    }
    aligned
}

fn top_importances(model: &Gbdt) -> serde_json::Map<String, serde_json::Value> {
    model
        .feature_importance()
        .into_iter()
        .take(EXPLAIN_TOP)
        .map(|(name, gain)| (name, serde_json::json!(gain)))
        .collect()
}
