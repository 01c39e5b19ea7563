//! Fallback voting
//!
//! Used when the arbiter fails, times out or names a candidate outside the
//! surviving pool. The winner is the candidate with the strictly highest
//! mean verification score; missing scores are not imputed. Ties go to the
//! earliest-generated candidate, then to pool order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::types::{Candidate, CandidateId, Verification};

/// Arithmetic mean of the available scores per candidate.
///
/// Candidates with no verification are absent from the map.
pub fn mean_scores(verifications: &[Verification]) -> BTreeMap<CandidateId, f64> {
    let mut sums: BTreeMap<CandidateId, (f64, usize)> = BTreeMap::new();
    for v in verifications {
        let entry = sums.entry(v.candidate_id.clone()).or_insert((0.0, 0));
        entry.0 += v.score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(id, (sum, n))| (id, sum / n as f64))
        .collect()
}

/// Pick the fallback winner and its mean score.
///
/// Returns `None` only when no candidate in `candidates` has a score.
pub fn select_fallback_winner<'a>(
    candidates: &'a [Candidate],
    verifications: &[Verification],
) -> Option<(&'a Candidate, f64)> {
    let means = mean_scores(verifications);

    let mut best: Option<(usize, &Candidate, f64)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let Some(&mean) = means.get(&candidate.id) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((best_index, best_candidate, best_mean)) => {
                match mean.total_cmp(best_mean) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        (candidate.created_at, index) < (best_candidate.created_at, *best_index)
                    }
                }
            }
        };
        if better {
            best = Some((index, candidate, mean));
        }
    }

    best.map(|(_, candidate, mean)| (candidate, mean))
}
