//! Depth-limited regression trees fit to gradient/hessian statistics

use crate::config::GbdtParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// One boosted tree. `gains` accumulates split gain per feature index and
/// feeds the model-level importance accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    root: Node,
    gains: Vec<f64>,
}

impl Tree {
    /// Fit a tree to the current gradient/hessian statistics. Leaf values are
    /// Newton steps `-G / (H + lambda)`, pre-scaled by the learning rate.
    pub fn fit(
        rows: &[Vec<f64>],
        grad: &[f64],
        hess: &[f64],
        n_features: usize,
        params: &GbdtParams,
    ) -> Self {
        let indices: Vec<usize> = (0..rows.len()).collect();
        let mut gains = vec![0.0; n_features];
        let root = build_node(rows, grad, hess, &indices, 0, n_features, params, &mut gains);
        Self { root, gains }
    }

    /// Evaluate the tree. Features beyond the supplied slice read as 0.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.get(*feature).copied().unwrap_or(0.0);
                    node = if value < *threshold { left } else { right };
                }
            }
        }
    }

    pub fn gains(&self) -> &[f64] {
        &self.gains
    }
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    rows: &[Vec<f64>],
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    depth: usize,
    n_features: usize,
    params: &GbdtParams,
    gains: &mut Vec<f64>,
) -> Node {
    let g: f64 = indices.iter().map(|&i| grad[i]).sum();
    let h: f64 = indices.iter().map(|&i| hess[i]).sum();
    let leaf = Node::Leaf {
        value: -g / (h + params.lambda) * params.learning_rate,
    };

    if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf {
        return leaf;
    }

    let Some(split) = best_split(rows, grad, hess, indices, n_features, params, g, h) else {
        return leaf;
    };

    gains[split.feature] += split.gain;

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| rows[i][split.feature] < split.threshold);

    let left = build_node(
        rows,
        grad,
        hess,
        &left_idx,
        depth + 1,
        n_features,
        params,
        gains,
    );
    let right = build_node(
        rows,
        grad,
        hess,
        &right_idx,
        depth + 1,
        n_features,
        params,
        gains,
    );

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(left),
        right: Box::new(right),
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Exact greedy search over all feature/threshold pairs, maximizing the
/// regularized gain `0.5·(GL²/(HL+λ) + GR²/(HR+λ) − G²/(H+λ))`.
#[allow(clippy::too_many_arguments)]
fn best_split(
    rows: &[Vec<f64>],
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    n_features: usize,
    params: &GbdtParams,
    g_total: f64,
    h_total: f64,
) -> Option<SplitCandidate> {
    let lambda = params.lambda;
    let parent_score = g_total * g_total / (h_total + lambda);
    let mut best: Option<SplitCandidate> = None;

    for feature in 0..n_features {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_by(|&a, &b| {
            rows[a][feature]
                .partial_cmp(&rows[b][feature])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut g_left = 0.0;
        let mut h_left = 0.0;

        for pos in 0..sorted.len().saturating_sub(1) {
            let i = sorted[pos];
            g_left += grad[i];
            h_left += hess[i];

            let here = rows[i][feature];
            let next = rows[sorted[pos + 1]][feature];
            if here == next {
                continue;
            }

            let n_left = pos + 1;
            let n_right = sorted.len() - n_left;
            if n_left < params.min_samples_leaf || n_right < params.min_samples_leaf {
                continue;
            }

            let g_right = g_total - g_left;
            let h_right = h_total - h_left;
            let gain = 0.5
                * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                    - parent_score);

            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (here + next) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}
