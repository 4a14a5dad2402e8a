//! Core domain types shared across the feedback loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Market lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
    Resolved,
}

/// A prediction market record.
///
/// Markets are currently binary (two outcomes); `final_probabilities` maps
/// outcome id to the last tracked probability before resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub status: MarketStatus,
    pub outcomes: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_outcome_id: Option<String>,
    #[serde(default)]
    pub final_probabilities: HashMap<String, f64>,
}

impl Market {
    /// Final probability assigned to the winning outcome, if the market is
    /// resolved and the probability was tracked.
    pub fn final_prob_of_winner(&self) -> Option<f64> {
        let winner = self.resolved_outcome_id.as_deref()?;
        self.final_probabilities.get(winner).copied()
    }
}

/// Evidence scores attached to a post by the scoring pipeline.
///
/// `relevance`, `strength`, `credibility`, `confidence` are in [0, 1];
/// `stance` is in [-1, 1]. Missing scores deserialize to 0.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EvidenceScores {
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
}

impl EvidenceScores {
    /// relevance × strength × credibility
    pub fn semantic_strength(&self) -> f64 {
        self.relevance * self.strength * self.credibility
    }

    /// stance × semantic strength
    pub fn signed_signal(&self) -> f64 {
        self.stance * self.semantic_strength()
    }
}

/// Classifier flags attached to a post
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PostFlags {
    #[serde(default)]
    pub is_sarcasm: bool,
    #[serde(default)]
    pub is_question: bool,
    #[serde(default)]
    pub is_rumor: bool,
}

/// Raw engagement counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngagementCounts {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

/// A scored social post tied to a market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub market_id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_followers: u64,
    #[serde(default)]
    pub author_verified: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metrics: EngagementCounts,
    #[serde(default)]
    pub scores: EvidenceScores,
    #[serde(default)]
    pub flags: PostFlags,
    pub scored_at: Option<DateTime<Utc>>,
}

/// Probability mapping at a point in time for one market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilitySnapshot {
    pub market_id: String,
    pub timestamp: DateTime<Utc>,
    pub probabilities: HashMap<String, f64>,
}

/// A post aligned against the market's probability time series.
///
/// `label` is `None` when the market had no snapshots at all; such rows are
/// excluded from classifier training by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledPost {
    pub post: Post,
    pub prob_before: f64,
    pub prob_after: f64,
    pub delta_prob: f64,
    pub label: Option<bool>,
    /// Hours between scoring and market resolution; 0 when unknown
    #[serde(default)]
    pub hours_before_resolution: f64,
}

/// Model type tag stored in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Regression,
    Classification,
}

/// Registry metadata for one trained model artifact.
///
/// Immutable after creation except for the `deployed` flag, which an external
/// promotion process toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: String,
    pub name: String,
    pub version: String,
    pub kind: ModelKind,
    pub path: String,
    pub train_size: usize,
    pub metrics: serde_json::Value,
    pub feature_importances: Vec<(String, f64)>,
    pub hyperparameters: serde_json::Value,
    pub approved: bool,
    pub deployed: bool,
    pub created_at: DateTime<Utc>,
}
