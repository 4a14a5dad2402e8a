//! Boosted-tree models
//!
//! Newton-step gradient boosting over depth-limited regression trees, with the
//! train / predict / save / load / feature-importance surface the rest of the
//! system treats as opaque. Supports a squared-error objective (regression)
//! and a logistic objective (binary classification), per-sample weights for
//! class rebalancing, and early stopping against a validation set.

mod tree;


use crate::config::GbdtParams;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tree::Tree;

/// Training objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    SquaredError,
    Logistic,
}

/// In-memory training dataset: row-major features plus targets and weights.
#[derive(Debug, Clone)]
pub struct Dataset {
    feature_names: Vec<String>,
    rows: Vec<Vec<f64>>,
    targets: Vec<f64>,
    weights: Vec<f64>,
}

impl Dataset {
    pub fn new(feature_names: Vec<String>) -> Self {
        Self {
            feature_names,
            rows: Vec::new(),
            targets: Vec::new(),
            weights: Vec::new(),
        }
    }

    pub fn push(&mut self, features: Vec<f64>, target: f64) {
        self.push_weighted(features, target, 1.0);
    }

    pub fn push_weighted(&mut self, mut features: Vec<f64>, target: f64, weight: f64) {
        // Zero-fill short rows so every row matches the schema width
        features.resize(self.feature_names.len(), 0.0);
        self.rows.push(features);
        self.targets.push(target);
        self.weights.push(weight);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }
}

/// A trained boosted-tree model.
///
/// Carries the ordered feature-name schema it was trained on; serving aligns
/// request features against this list on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gbdt {
    objective: Objective,
    feature_names: Vec<String>,
    base_score: f64,
    trees: Vec<Tree>,
    best_iteration: usize,
}

impl Gbdt {
    /// Train with optional early stopping.
    ///
    /// When a validation set is given, training stops after
    /// `params.early_stopping_rounds` rounds without validation-loss
    /// improvement (RMSE for regression, log loss for classification) and the
    /// returned model is truncated to the best iteration.
    pub fn train(
        train: &Dataset,
        valid: Option<&Dataset>,
        params: &GbdtParams,
        objective: Objective,
    ) -> Result<Self> {
        if train.is_empty() {
            return Err(Error::InvalidTrainingData(
                "empty training dataset".to_string(),
            ));
        }

        let n_features = train.feature_names.len();
        let base_score = initial_score(objective, &train.targets, &train.weights);

        let mut raw: Vec<f64> = vec![base_score; train.len()];
        let mut valid_raw: Vec<f64> = valid.map(|v| vec![base_score; v.len()]).unwrap_or_default();

        let mut trees: Vec<Tree> = Vec::new();
        let mut best_loss = f64::INFINITY;
        let mut best_round = 0usize;

        for round in 0..params.num_rounds {
            let (grad, hess) = gradients(objective, &raw, &train.targets, &train.weights);
            let tree = Tree::fit(&train.rows, &grad, &hess, n_features, params);

            for (i, row) in train.rows.iter().enumerate() {
                raw[i] += tree.predict(row);
            }

            if let Some(valid) = valid {
                for (i, row) in valid.rows.iter().enumerate() {
                    valid_raw[i] += tree.predict(row);
                }
            }

            trees.push(tree);

            if let Some(valid) = valid {
                let loss = validation_loss(objective, &valid_raw, &valid.targets);
                if loss < best_loss {
                    best_loss = loss;
                    best_round = round + 1;
                } else if round + 1 - best_round >= params.early_stopping_rounds {
                    tracing::debug!(
                        "early stop at round {} (best {} with loss {:.6})",
                        round + 1,
                        best_round,
                        best_loss
                    );
                    break;
                }
            } else {
                best_round = round + 1;
            }
        }

        trees.truncate(best_round.max(1));
        let best_iteration = trees.len();

        Ok(Self {
            objective,
            feature_names: train.feature_names.clone(),
            base_score,
            trees,
            best_iteration,
        })
    }

    /// Predict for a single row. For the logistic objective the output is a
    /// probability in (0, 1). Missing trailing features read as 0.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let raw: f64 = self.base_score + self.trees.iter().map(|t| t.predict(features)).sum::<f64>();
        match self.objective {
            Objective::SquaredError => raw,
            Objective::Logistic => sigmoid(raw),
        }
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict(r)).collect()
    }

    /// Accumulated split gain per feature, sorted descending. Raw gain values
    /// are preserved; no renormalization.
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        let mut totals = vec![0.0; self.feature_names.len()];
        for tree in &self.trees {
            for (i, gain) in tree.gains().iter().enumerate() {
                totals[i] += gain;
            }
        }

        let mut pairs: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(totals)
            .collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        pairs
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

fn initial_score(objective: Objective, targets: &[f64], weights: &[f64]) -> f64 {
    let w_total: f64 = weights.iter().sum();
    if w_total <= 0.0 {
        return 0.0;
    }
    let w_mean = targets
        .iter()
        .zip(weights)
        .map(|(t, w)| t * w)
        .sum::<f64>()
        / w_total;

    match objective {
        Objective::SquaredError => w_mean,
        Objective::Logistic => {
            let p = w_mean.clamp(1e-4, 1.0 - 1e-4);
            (p / (1.0 - p)).ln()
        }
    }
}

fn gradients(
    objective: Objective,
    raw: &[f64],
    targets: &[f64],
    weights: &[f64],
) -> (Vec<f64>, Vec<f64>) {
    let n = raw.len();
    let mut grad = Vec::with_capacity(n);
    let mut hess = Vec::with_capacity(n);

    for i in 0..n {
        let w = weights[i];
        match objective {
            Objective::SquaredError => {
                grad.push((raw[i] - targets[i]) * w);
                hess.push(w);
            }
            Objective::Logistic => {
                let p = sigmoid(raw[i]);
                grad.push((p - targets[i]) * w);
                hess.push((p * (1.0 - p)).max(1e-16) * w);
            }
        }
    }

    (grad, hess)
}

fn validation_loss(objective: Objective, raw: &[f64], targets: &[f64]) -> f64 {
    match objective {
        Objective::SquaredError => {
            let mse = raw
                .iter()
                .zip(targets)
                .map(|(p, t)| (p - t).powi(2))
                .sum::<f64>()
                / raw.len().max(1) as f64;
            mse.sqrt()
        }
        Objective::Logistic => {
            raw.iter()
                .zip(targets)
                .map(|(r, t)| {
                    let p = sigmoid(*r).clamp(1e-12, 1.0 - 1e-12);
                    -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
                })
                .sum::<f64>()
                / raw.len().max(1) as f64
        }
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
