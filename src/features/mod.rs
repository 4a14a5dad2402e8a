//! Feature engineering
//!
//! Pure functions mapping raw posts and markets to fixed-schema numeric
//! vectors. The schemas declared here are the single source of truth for
//! feature name and order on both the training and serving paths; boosted-tree
//! models are column-order sensitive, so every vector in the system is built
//! against these lists.


use crate::types::{Market, Post};

/// Post-level feature schema, in column order.
pub const POST_FEATURES: &[&str] = &[
    // Evidence scores
    "relevance",
    "stance",
    "strength",
    "credibility",
    "confidence",
    // Derived
    "semantic_strength",
    "abs_stance",
    "signed_signal",
    // Author
    "log_followers",
    "author_verified",
    // Engagement
    "log_likes",
    "log_reposts",
    "log_replies",
    "log_quotes",
    "total_log_engagement",
    // Text
    "text_length",
    "has_url",
    "has_hashtag",
    "has_mention",
    "has_cashtag",
    "has_numeric",
    // Flags
    "is_sarcasm",
    "is_question",
    "is_rumor",
    // Timing
    "hours_before_resolution",
    "is_recent",
    // Interactions
    "stance_x_followers",
    "strength_x_credibility",
    "signal_x_followers",
    // Probability context
    "prob_before",
    "prob_uncertainty",
];

/// Market-level feature schema, in column order.
pub const MARKET_FEATURES: &[&str] = &[
    // Basic
    "K",
    "duration_hours",
    "duration_days",
    // Post stats
    "num_posts",
    "posts_per_hour",
    // Score aggregates
    "mean_relevance",
    "std_relevance",
    "max_relevance",
    "min_relevance",
    "mean_stance",
    "std_stance",
    "max_stance",
    "min_stance",
    "mean_strength",
    "std_strength",
    "max_strength",
    "min_strength",
    "mean_credibility",
    "std_credibility",
    "max_credibility",
    "min_credibility",
    "mean_semantic_strength",
    "std_semantic_strength",
    "max_semantic_strength",
    // Stance distribution
    "stance_positive_ratio",
    "stance_negative_ratio",
    "stance_neutral_ratio",
    "mean_abs_stance",
    // Author
    "num_unique_authors",
    "author_hhi",
    "top_author_share",
    "mean_log_followers",
    "max_log_followers",
    "verified_ratio",
    // Engagement
    "mean_log_likes",
    "max_log_likes",
    "mean_log_reposts",
    "max_log_reposts",
    // Flags
    "is_sarcasm_ratio",
    "is_question_ratio",
    "is_rumor_ratio",
    // Text
    "mean_text_length",
    "has_url_ratio",
    "has_hashtag_ratio",
    // Temporal
    "mean_hours_before_resolution",
    "min_hours_before_resolution",
    "recent_posts_ratio",
];

/// An ordered, named feature vector bound to one of the fixed schemas.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    names: &'static [&'static str],
    values: Vec<f64>,
}

impl FeatureVector {
    /// All-zero vector for the given schema (the default/fallback row)
    pub fn zeros(names: &'static [&'static str]) -> Self {
        Self {
            names,
            values: vec![0.0; names.len()],
        }
    }

    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        let idx = self.names.iter().position(|n| *n == name)?;
        Some(self.values[idx])
    }

    /// Set a feature by name. Names not in the schema are ignored, mirroring
    /// the projection step that drops unexpected columns.
    pub fn set(&mut self, name: &str, value: f64) {
        if let Some(idx) = self.names.iter().position(|n| *n == name) {
            self.values[idx] = value;
        }
    }

    /// (name, value) pairs in schema order
    pub fn to_pairs(&self) -> Vec<(String, f64)> {
        self.names
            .iter()
            .zip(&self.values)
            .map(|(n, v)| (n.to_string(), *v))
            .collect()
    }
}

/// Temporal and probability context for a single post, supplied by the label
/// constructor during training and by the request payload at serving time.
#[derive(Debug, Clone, Copy)]
pub struct PostContext {
    pub prob_before: f64,
    pub hours_before_resolution: f64,
}

impl Default for PostContext {
    fn default() -> Self {
        // 0.5 is the uninformative prior when no snapshot exists
        Self {
            prob_before: 0.5,
            hours_before_resolution: 0.0,
        }
    }
}

/// log(1 + x) for non-negative counts; 0 maps to 0
fn log1p(x: f64) -> f64 {
    x.max(0.0).ln_1p()
}

/// `1 - 2·|p - 0.5|`: maximal at p = 0.5, zero at the extremes
pub fn prob_uncertainty(prob_before: f64) -> f64 {
    1.0 - (prob_before - 0.5).abs() * 2.0
}

/// Extract the post-level feature vector.
///
/// Total: a post missing every optional field yields the all-default vector,
/// never an error.
pub fn extract_post_features(post: &Post, ctx: &PostContext) -> FeatureVector {
    let mut v = FeatureVector::zeros(POST_FEATURES);

    let scores = &post.scores;
    v.set("relevance", scores.relevance);
    v.set("stance", scores.stance);
    v.set("strength", scores.strength);
    v.set("credibility", scores.credibility);
    v.set("confidence", scores.confidence);

    let semantic = scores.semantic_strength();
    let signal = scores.signed_signal();
    v.set("semantic_strength", semantic);
    v.set("abs_stance", scores.stance.abs());
    v.set("signed_signal", signal);

    let log_followers = log1p(post.author_followers as f64);
    v.set("log_followers", log_followers);
    v.set("author_verified", bool_feature(post.author_verified));

    let log_likes = log1p(post.metrics.like_count as f64);
    let log_reposts = log1p(post.metrics.repost_count as f64);
    let log_replies = log1p(post.metrics.reply_count as f64);
    let log_quotes = log1p(post.metrics.quote_count as f64);
    v.set("log_likes", log_likes);
    v.set("log_reposts", log_reposts);
    v.set("log_replies", log_replies);
    v.set("log_quotes", log_quotes);
    v.set(
        "total_log_engagement",
        log_likes + log_reposts + log_replies + log_quotes,
    );

    let text = post.text.to_lowercase();
    v.set("text_length", post.text.chars().count() as f64);
    v.set("has_url", bool_feature(text.contains("http")));
    v.set("has_hashtag", bool_feature(text.contains('#')));
    v.set("has_mention", bool_feature(text.contains('@')));
    v.set("has_cashtag", bool_feature(text.contains('$')));
    v.set(
        "has_numeric",
        bool_feature(text.chars().any(|c| c.is_ascii_digit())),
    );

    v.set("is_sarcasm", bool_feature(post.flags.is_sarcasm));
    v.set("is_question", bool_feature(post.flags.is_question));
    v.set("is_rumor", bool_feature(post.flags.is_rumor));

    v.set("hours_before_resolution", ctx.hours_before_resolution);
    v.set(
        "is_recent",
        bool_feature(ctx.hours_before_resolution <= 24.0),
    );

    v.set("stance_x_followers", scores.stance * log_followers);
    v.set(
        "strength_x_credibility",
        scores.strength * scores.credibility,
    );
    v.set("signal_x_followers", signal * log_followers);

    v.set("prob_before", ctx.prob_before);
    v.set("prob_uncertainty", prob_uncertainty(ctx.prob_before));

    v
}

/// Extract the market-level feature vector, aggregating over the market's
/// posts. An empty post collection yields all-zero aggregates.
pub fn extract_market_features(market: &Market, posts: &[Post]) -> FeatureVector {
    let mut v = FeatureVector::zeros(MARKET_FEATURES);

    // Binary markets only; K > 2 is explicitly unsupported upstream
    v.set("K", 2.0);

    let mut duration_hours = 0.0;
    if let (Some(created), Some(resolved)) = (market.created_at, market.resolved_at) {
        duration_hours = (resolved - created).num_seconds() as f64 / 3600.0;
        v.set("duration_hours", duration_hours);
        v.set("duration_days", duration_hours / 24.0);
    }

    if posts.is_empty() {
        return v;
    }

    let n = posts.len() as f64;
    v.set("num_posts", n);
    if duration_hours > 0.0 {
        v.set("posts_per_hour", n / duration_hours);
    }

    let vectors: Vec<FeatureVector> = posts
        .iter()
        .map(|p| extract_post_features(p, &post_context_for(market, p)))
        .collect();

    // mean/std/max/min per scorable column; only names present in the market
    // schema are kept by `set`
    for col in [
        "relevance",
        "stance",
        "strength",
        "credibility",
        "confidence",
        "semantic_strength",
    ] {
        let values = column(&vectors, col);
        v.set(&format!("mean_{col}"), mean(&values));
        v.set(&format!("std_{col}"), pop_std(&values));
        v.set(&format!("max_{col}"), max(&values));
        v.set(&format!("min_{col}"), min(&values));
    }

    let stances = column(&vectors, "stance");
    v.set("stance_positive_ratio", ratio(&stances, |s| s > 0.0));
    v.set("stance_negative_ratio", ratio(&stances, |s| s < 0.0));
    v.set("stance_neutral_ratio", ratio(&stances, |s| s == 0.0));
    v.set(
        "mean_abs_stance",
        mean(&stances.iter().map(|s| s.abs()).collect::<Vec<_>>()),
    );

    let (unique_authors, hhi, top_share) = author_concentration(posts);
    v.set("num_unique_authors", unique_authors as f64);
    v.set("author_hhi", hhi);
    v.set("top_author_share", top_share);

    let log_followers = column(&vectors, "log_followers");
    v.set("mean_log_followers", mean(&log_followers));
    v.set("max_log_followers", max(&log_followers));
    v.set("verified_ratio", mean(&column(&vectors, "author_verified")));

    for col in ["log_likes", "log_reposts"] {
        let values = column(&vectors, col);
        v.set(&format!("mean_{col}"), mean(&values));
        v.set(&format!("max_{col}"), max(&values));
    }

    for col in ["is_sarcasm", "is_question", "is_rumor"] {
        v.set(&format!("{col}_ratio"), mean(&column(&vectors, col)));
    }

    v.set("mean_text_length", mean(&column(&vectors, "text_length")));
    v.set("has_url_ratio", mean(&column(&vectors, "has_url")));
    v.set("has_hashtag_ratio", mean(&column(&vectors, "has_hashtag")));

    let hbr = column(&vectors, "hours_before_resolution");
    v.set("mean_hours_before_resolution", mean(&hbr));
    v.set("min_hours_before_resolution", min(&hbr));
    v.set("recent_posts_ratio", ratio(&hbr, |h| h <= 24.0));

    v
}

fn post_context_for(market: &Market, post: &Post) -> PostContext {
    let hours_before_resolution = match (market.resolved_at, post.scored_at) {
        (Some(resolved), Some(scored)) => (resolved - scored).num_seconds() as f64 / 3600.0,
        _ => 0.0,
    };
    PostContext {
        prob_before: 0.5,
        hours_before_resolution,
    }
}

/// Herfindahl index of author share-of-posts: (unique authors, HHI, top share)
fn author_concentration(posts: &[Post]) -> (usize, f64, f64) {
    use std::collections::HashMap;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for post in posts {
        *counts.entry(post.author_id.as_str()).or_insert(0) += 1;
    }

    let total = posts.len() as f64;
    if total == 0.0 {
        return (0, 0.0, 0.0);
    }

    let mut hhi = 0.0;
    let mut top_share = 0.0f64;
    for &count in counts.values() {
        let share = count as f64 / total;
        hhi += share * share;
        top_share = top_share.max(share);
    }

    (counts.len(), hhi, top_share)
}

fn bool_feature(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn column(vectors: &[FeatureVector], name: &str) -> Vec<f64> {
    vectors.iter().filter_map(|v| v.get(name)).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by N, not N-1)
fn pop_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn ratio(values: &[f64], pred: impl Fn(f64) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| pred(**v)).count() as f64 / values.len() as f64
}
