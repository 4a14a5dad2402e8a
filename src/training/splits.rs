//! Leakage-free cross-validation splits
//!
//! Two strategies: time-ordered splits for market-level regression (later
//! resolutions never leak into earlier validation folds) and group k-fold
//! keyed by market id for post-level classification (posts from one market
//! never straddle a fold boundary).

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::ops::Range;

/// Expanding-window time-series split over `n` samples already sorted in time
/// order. Fold `i` trains on everything before its validation block; the k
/// validation blocks tile the tail of the series.
pub fn time_series_split(n: usize, k: usize) -> Result<Vec<(Range<usize>, Range<usize>)>> {
    if k == 0 {
        return Err(Error::InvalidTrainingData("fold count must be > 0".to_string()));
    }
    let test_size = n / (k + 1);
    if test_size == 0 {
        return Err(Error::InvalidTrainingData(format!(
            "{n} samples is too few for {k} time-ordered folds"
        )));
    }

    let first_test_start = n - k * test_size;
    let mut folds = Vec::with_capacity(k);
    for i in 0..k {
        let start = first_test_start + i * test_size;
        folds.push((0..start, start..start + test_size));
    }
    Ok(folds)
}

/// Group k-fold: every sample sharing a group key lands in exactly one fold.
///
/// Deterministic greedy balancing: groups are assigned largest-first to the
/// currently smallest fold. Returns `(train_indices, valid_indices)` per fold.
pub fn group_k_fold(groups: &[String], k: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if k == 0 {
        return Err(Error::InvalidTrainingData("fold count must be > 0".to_string()));
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for g in groups {
        *counts.entry(g.as_str()).or_insert(0) += 1;
    }
    if counts.len() < k {
        return Err(Error::InvalidTrainingData(format!(
            "{} distinct groups is too few for {k} group folds",
            counts.len()
        )));
    }

    // Largest groups first; ties broken by name so splits are reproducible
    let mut ordered: Vec<(&str, usize)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let mut fold_sizes = vec![0usize; k];
    let mut assignment: HashMap<&str, usize> = HashMap::new();
    for (group, count) in ordered {
        let fold = fold_sizes
            .iter()
            .enumerate()
            .min_by_key(|(_, size)| **size)
            .map(|(i, _)| i)
            .unwrap_or(0);
        fold_sizes[fold] += count;
        assignment.insert(group, fold);
    }

    let mut folds = vec![(Vec::new(), Vec::new()); k];
    for (idx, group) in groups.iter().enumerate() {
        let assigned = assignment[group.as_str()];
        for (fold, (train, valid)) in folds.iter_mut().enumerate() {
            if fold == assigned {
                valid.push(idx);
            } else {
                train.push(idx);
            }
        }
    }
    Ok(folds)
}
