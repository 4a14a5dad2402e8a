//! Training orchestration
//!
//! Cross-validated training for the two boosted-tree models:
//! - market correction (regression on the market's residual error,
//!   time-ordered splits)
//! - post usefulness (classification on `moved_toward_truth`, group k-fold
//!   keyed by market id with per-fold class rebalancing)
//!
//! Both protocols share one pattern: split → fit → validate → select best
//! fold → aggregate metrics → extract importances. Sample-size gates refuse to
//! train on too little data and say why, instead of failing silently.

pub mod metrics;
pub mod splits;


use crate::boost::{Dataset, Gbdt, Objective};
use crate::config::{GbdtParams, TrainingConfig};
use crate::error::Result;
use crate::features::{self, PostContext, MARKET_FEATURES, POST_FEATURES};
use crate::types::{LabeledPost, Market, ModelKind, Post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One market-level training row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSample {
    pub market_id: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub features: Vec<f64>,
    /// `1 − final_probability(winning outcome)`: the market's residual error
    pub target: f64,
}

/// Result of a training run. A `Skipped` outcome is the structured
/// "cannot proceed, here is why" path, not an error.
pub enum TrainingOutcome {
    Trained(Box<TrainedModel>),
    Skipped { reason: String },
}

/// A selected model plus everything the registry stores alongside it
pub struct TrainedModel {
    pub model: Gbdt,
    pub kind: ModelKind,
    pub metrics: serde_json::Value,
    pub importances: Vec<(String, f64)>,
    pub train_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionFold {
    pub fold: usize,
    pub rmse: f64,
    pub best_iteration: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionCv {
    pub cv_folds: Vec<RegressionFold>,
    pub mean_rmse: f64,
    pub std_rmse: f64,
    pub best_rmse: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationFold {
    pub fold: usize,
    pub auc: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub best_iteration: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationCv {
    pub cv_folds: Vec<ClassificationFold>,
    pub mean_auc: f64,
    pub std_auc: f64,
    pub mean_accuracy: f64,
    pub mean_f1: f64,
    pub best_auc: f64,
}

/// Build the market-level dataset: one row per resolved market, sorted by
/// resolution time so the time-ordered splits are valid. Markets missing a
/// winner or final probabilities get a zero target.
pub fn build_market_dataset(
    markets: &[Market],
    posts_by_market: &HashMap<String, Vec<Post>>,
) -> Vec<MarketSample> {
    let empty: Vec<Post> = Vec::new();
    let mut samples: Vec<MarketSample> = markets
        .iter()
        .map(|market| {
            let posts = posts_by_market.get(&market.id).unwrap_or(&empty);
            let features = features::extract_market_features(market, posts);
            let target = market
                .final_prob_of_winner()
                .map(|p| 1.0 - p)
                .unwrap_or(0.0);
            MarketSample {
                market_id: market.id.clone(),
                resolved_at: market.resolved_at,
                features: features.values().to_vec(),
                target,
            }
        })
        .collect();

    samples.sort_by_key(|s| s.resolved_at);
    samples
}

/// Train the market correction model with time-ordered cross-validation.
///
/// The selected model is the fold with the lowest validation RMSE, not the
/// last-trained fold: later folds are not guaranteed better on a noisy target.
pub fn train_correction_model(
    samples: &[MarketSample],
    params: &GbdtParams,
    cfg: &TrainingConfig,
) -> Result<TrainingOutcome> {
    if samples.len() < cfg.min_resolved_markets {
        let reason = format!(
            "insufficient data: {} resolved markets, {} required",
            samples.len(),
            cfg.min_resolved_markets
        );
        tracing::warn!("correction training skipped: {reason}");
        return Ok(TrainingOutcome::Skipped { reason });
    }

    let mut sorted: Vec<&MarketSample> = samples.iter().collect();
    sorted.sort_by_key(|s| s.resolved_at);

    let feature_names: Vec<String> = MARKET_FEATURES.iter().map(|s| s.to_string()).collect();
    let folds = splits::time_series_split(sorted.len(), cfg.folds)?;

    let mut fold_metrics = Vec::with_capacity(folds.len());
    let mut best: Option<(f64, Gbdt)> = None;

    for (fold, (train_range, valid_range)) in folds.into_iter().enumerate() {
        let mut train = Dataset::new(feature_names.clone());
        for i in train_range.clone() {
            train.push(sorted[i].features.clone(), sorted[i].target);
        }
        let mut valid = Dataset::new(feature_names.clone());
        for i in valid_range.clone() {
            valid.push(sorted[i].features.clone(), sorted[i].target);
        }

        let model = Gbdt::train(&train, Some(&valid), params, Objective::SquaredError)?;
        let predictions = model.predict_batch(valid.rows());
        let fold_rmse = metrics::rmse(&predictions, valid.targets());

        tracing::info!(
            "correction fold {fold}: rmse={fold_rmse:.6} trees={}",
            model.num_trees()
        );
        fold_metrics.push(RegressionFold {
            fold,
            rmse: fold_rmse,
            best_iteration: model.best_iteration(),
        });

        if best.as_ref().map_or(true, |(score, _)| fold_rmse < *score) {
            best = Some((fold_rmse, model));
        }
    }

    let (best_rmse, model) = best.expect("at least one fold");
    let rmses: Vec<f64> = fold_metrics.iter().map(|f| f.rmse).collect();
    let cv = RegressionCv {
        cv_folds: fold_metrics,
        mean_rmse: metrics::mean(&rmses),
        std_rmse: metrics::std_dev(&rmses),
        best_rmse,
    };

    let importances = model.feature_importance();
    Ok(TrainingOutcome::Trained(Box::new(TrainedModel {
        model,
        kind: ModelKind::Regression,
        metrics: serde_json::to_value(&cv)?,
        importances,
        train_size: samples.len(),
    })))
}

/// Train the post usefulness classifier with group k-fold keyed by market id.
///
/// Class imbalance is corrected per fold: positives are weighted by the
/// negative/positive ratio of that fold's training slice. Selection is best
/// AUC across folds.
pub fn train_usefulness_model(
    labeled: &[LabeledPost],
    params: &GbdtParams,
    cfg: &TrainingConfig,
) -> Result<TrainingOutcome> {
    // Unlabeled rows (markets with no snapshots) are excluded up front
    let usable: Vec<&LabeledPost> = labeled.iter().filter(|lp| lp.label.is_some()).collect();

    if usable.len() < cfg.min_labeled_posts {
        let reason = format!(
            "insufficient data: {} labeled posts, {} required",
            usable.len(),
            cfg.min_labeled_posts
        );
        tracing::warn!("usefulness training skipped: {reason}");
        return Ok(TrainingOutcome::Skipped { reason });
    }

    let feature_names: Vec<String> = POST_FEATURES.iter().map(|s| s.to_string()).collect();
    let rows: Vec<Vec<f64>> = usable
        .iter()
        .map(|lp| {
            let ctx = PostContext {
                prob_before: lp.prob_before,
                hours_before_resolution: lp.hours_before_resolution,
            };
            features::extract_post_features(&lp.post, &ctx).values().to_vec()
        })
        .collect();
    let targets: Vec<f64> = usable
        .iter()
        .map(|lp| if lp.label == Some(true) { 1.0 } else { 0.0 })
        .collect();
    let groups: Vec<String> = usable.iter().map(|lp| lp.post.market_id.clone()).collect();

    let folds = splits::group_k_fold(&groups, cfg.folds)?;
    let mut fold_metrics = Vec::with_capacity(folds.len());
    let mut best: Option<(f64, Gbdt)> = None;

    for (fold, (train_idx, valid_idx)) in folds.into_iter().enumerate() {
        // Positive-class weight from this fold's training slice only
        let pos = train_idx.iter().filter(|&&i| targets[i] > 0.5).count();
        let neg = train_idx.len() - pos;
        let pos_weight = neg as f64 / pos.max(1) as f64;

        let mut train = Dataset::new(feature_names.clone());
        for &i in &train_idx {
            let weight = if targets[i] > 0.5 { pos_weight } else { 1.0 };
            train.push_weighted(rows[i].clone(), targets[i], weight);
        }
        let mut valid = Dataset::new(feature_names.clone());
        for &i in &valid_idx {
            valid.push(rows[i].clone(), targets[i]);
        }

        let model = Gbdt::train(&train, Some(&valid), params, Objective::Logistic)?;
        let scores = model.predict_batch(valid.rows());
        let labels: Vec<bool> = valid_idx.iter().map(|&i| targets[i] > 0.5).collect();

        let auc = metrics::roc_auc(&scores, &labels);
        let (accuracy, precision, recall, f1) = metrics::classification_report(&scores, &labels);

        tracing::info!(
            "usefulness fold {fold}: auc={auc:.4} acc={accuracy:.4} pos_weight={pos_weight:.2}"
        );
        fold_metrics.push(ClassificationFold {
            fold,
            auc,
            accuracy,
            precision,
            recall,
            f1,
            best_iteration: model.best_iteration(),
        });

        if best.as_ref().map_or(true, |(score, _)| auc > *score) {
            best = Some((auc, model));
        }
    }

    let (best_auc, model) = best.expect("at least one fold");
    let aucs: Vec<f64> = fold_metrics.iter().map(|f| f.auc).collect();
    let accuracies: Vec<f64> = fold_metrics.iter().map(|f| f.accuracy).collect();
    let f1s: Vec<f64> = fold_metrics.iter().map(|f| f.f1).collect();
    let cv = ClassificationCv {
        cv_folds: fold_metrics,
        mean_auc: metrics::mean(&aucs),
        std_auc: metrics::std_dev(&aucs),
        mean_accuracy: metrics::mean(&accuracies),
        mean_f1: metrics::mean(&f1s),
        best_auc,
    };

    let importances = model.feature_importance();
    Ok(TrainingOutcome::Trained(Box::new(TrainedModel {
        model,
        kind: ModelKind::Classification,
        metrics: serde_json::to_value(&cv)?,
        importances,
        train_size: usable.len(),
    })))
}
