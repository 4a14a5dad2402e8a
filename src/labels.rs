//! Label construction
//!
//! Aligns each post's scoring timestamp against the market's probability time
//! series to derive `prob_before` (last snapshot strictly before), `prob_after`
//! (first snapshot at-or-after), and the binary `moved_toward_truth` label,
//! all tracked against the winning outcome.

use crate::types::{LabeledPost, Post, ProbabilitySnapshot};
use chrono::{DateTime, Utc};

/// The uninformative prior used when no snapshot covers a lookup
pub const PRIOR_PROB: f64 = 0.5;

/// Label a market's posts against its snapshot series.
///
/// With no snapshots at all every post gets the default 0.5 probabilities and
/// `label = None`; callers exclude unlabeled rows from classifier training.
/// A zero delta labels as `false` (not moved toward truth).
pub fn label_posts(
    posts: &[Post],
    winning_outcome_id: &str,
    snapshots: &[ProbabilitySnapshot],
) -> Vec<LabeledPost> {
    let mut ordered: Vec<&ProbabilitySnapshot> = snapshots.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    posts
        .iter()
        .map(|post| label_post(post, winning_outcome_id, &ordered))
        .collect()
}

fn label_post(
    post: &Post,
    winning_outcome_id: &str,
    ordered: &[&ProbabilitySnapshot],
) -> LabeledPost {
    if ordered.is_empty() {
        return LabeledPost {
            post: post.clone(),
            prob_before: PRIOR_PROB,
            prob_after: PRIOR_PROB,
            delta_prob: 0.0,
            label: None,
            hours_before_resolution: 0.0,
        };
    }

    let (prob_before, prob_after) = match post.scored_at {
        Some(scored_at) => (
            last_before(ordered, scored_at, winning_outcome_id),
            first_at_or_after(ordered, scored_at, winning_outcome_id),
        ),
        None => (PRIOR_PROB, PRIOR_PROB),
    };

    let delta_prob = prob_after - prob_before;
    LabeledPost {
        post: post.clone(),
        prob_before,
        prob_after,
        delta_prob,
        label: Some(delta_prob > 0.0),
        hours_before_resolution: 0.0,
    }
}

/// Probability of the winning outcome in the last snapshot strictly before `t`
fn last_before(ordered: &[&ProbabilitySnapshot], t: DateTime<Utc>, outcome: &str) -> f64 {
    ordered
        .iter()
        .rev()
        .find(|s| s.timestamp < t)
        .map(|s| winner_prob(s, outcome))
        .unwrap_or(PRIOR_PROB)
}

/// Probability of the winning outcome in the first snapshot at-or-after `t`
fn first_at_or_after(ordered: &[&ProbabilitySnapshot], t: DateTime<Utc>, outcome: &str) -> f64 {
    ordered
        .iter()
        .find(|s| s.timestamp >= t)
        .map(|s| winner_prob(s, outcome))
        .unwrap_or(PRIOR_PROB)
}

fn winner_prob(snapshot: &ProbabilitySnapshot, outcome: &str) -> f64 {
    snapshot
        .probabilities
        .get(outcome)
        .copied()
        .unwrap_or(PRIOR_PROB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EngagementCounts, EvidenceScores, PostFlags};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn post_at(id: &str, scored_at: Option<DateTime<Utc>>) -> Post {
        Post {
            id: id.to_string(),
            market_id: "m1".to_string(),
            author_id: "a1".to_string(),
            author_followers: 0,
            author_verified: false,
            text: String::new(),
            metrics: EngagementCounts::default(),
            scores: EvidenceScores::default(),
            flags: PostFlags::default(),
            scored_at,
        }
    }

    fn snapshot_at(t: DateTime<Utc>, yes_prob: f64) -> ProbabilitySnapshot {
        ProbabilitySnapshot {
            market_id: "m1".to_string(),
            timestamp: t,
            probabilities: HashMap::from([
                ("yes".to_string(), yes_prob),
                ("no".to_string(), 1.0 - yes_prob),
            ]),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_snapshots_yields_defaults_and_no_label() {
        let posts = vec![post_at("p1", Some(t0()))];
        let labeled = label_posts(&posts, "yes", &[]);

        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].prob_before, 0.5);
        assert_eq!(labeled[0].prob_after, 0.5);
        assert_eq!(labeled[0].label, None);
    }

    #[test]
    fn test_single_snapshot_before_post() {
        // Snapshot at t0, post scored at t0 + 1s: prob_before is the snapshot
        // value, prob_after falls back to the prior since nothing exists
        // at-or-after the post time.
        let snapshots = vec![snapshot_at(t0(), 0.7)];
        let posts = vec![post_at("p1", Some(t0() + Duration::seconds(1)))];

        let labeled = label_posts(&posts, "yes", &snapshots);
        assert_eq!(labeled[0].prob_before, 0.7);
        assert_eq!(labeled[0].prob_after, 0.5);
        assert_eq!(labeled[0].label, Some(false));
    }

    #[test]
    fn test_snapshot_at_post_time_counts_as_after() {
        // at-or-after is inclusive; strictly-before is not
        let snapshots = vec![snapshot_at(t0() - Duration::hours(1), 0.4), snapshot_at(t0(), 0.6)];
        let posts = vec![post_at("p1", Some(t0()))];

        let labeled = label_posts(&posts, "yes", &snapshots);
        assert_eq!(labeled[0].prob_before, 0.4);
        assert_eq!(labeled[0].prob_after, 0.6);
        assert_eq!(labeled[0].label, Some(true));
    }

    #[test]
    fn test_moved_away_from_truth() {
        let snapshots = vec![
            snapshot_at(t0() - Duration::hours(1), 0.8),
            snapshot_at(t0() + Duration::hours(1), 0.6),
        ];
        let posts = vec![post_at("p1", Some(t0()))];

        let labeled = label_posts(&posts, "yes", &snapshots);
        assert_eq!(labeled[0].prob_before, 0.8);
        assert_eq!(labeled[0].prob_after, 0.6);
        assert!((labeled[0].delta_prob + 0.2).abs() < 1e-12);
        assert_eq!(labeled[0].label, Some(false));
    }

    #[test]
    fn test_zero_delta_labels_false() {
        let snapshots = vec![
            snapshot_at(t0() - Duration::hours(1), 0.6),
            snapshot_at(t0() + Duration::hours(1), 0.6),
        ];
        let posts = vec![post_at("p1", Some(t0()))];

        let labeled = label_posts(&posts, "yes", &snapshots);
        assert_eq!(labeled[0].delta_prob, 0.0);
        assert_eq!(labeled[0].label, Some(false));
    }

    #[test]
    fn test_tracks_winning_outcome() {
        // Same series, opposite label when "no" wins
        let snapshots = vec![
            snapshot_at(t0() - Duration::hours(1), 0.4),
            snapshot_at(t0() + Duration::hours(1), 0.6),
        ];
        let posts = vec![post_at("p1", Some(t0()))];

        let toward_yes = label_posts(&posts, "yes", &snapshots);
        assert_eq!(toward_yes[0].label, Some(true));

        let toward_no = label_posts(&posts, "no", &snapshots);
        assert_eq!(toward_no[0].label, Some(false));
    }

    #[test]
    fn test_unknown_outcome_falls_back_to_prior() {
        let snapshots = vec![snapshot_at(t0() - Duration::hours(1), 0.9)];
        let posts = vec![post_at("p1", Some(t0()))];

        let labeled = label_posts(&posts, "missing-outcome", &snapshots);
        assert_eq!(labeled[0].prob_before, 0.5);
    }

    #[test]
    fn test_unsorted_snapshots_are_ordered_internally() {
        let snapshots = vec![
            snapshot_at(t0() + Duration::hours(1), 0.9),
            snapshot_at(t0() - Duration::hours(2), 0.3),
            snapshot_at(t0() - Duration::hours(1), 0.5),
        ];
        let posts = vec![post_at("p1", Some(t0()))];

        let labeled = label_posts(&posts, "yes", &snapshots);
        assert_eq!(labeled[0].prob_before, 0.5);
        assert_eq!(labeled[0].prob_after, 0.9);
    }
}
