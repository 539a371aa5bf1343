//! Majority voting with a fixed tie-break rule.
//!
//! Both voting stages — neighbor labels within a fold and fold predictions
//! across the ensemble — use the same rule: the label with the highest count
//! wins, and **ties are broken by smallest label value**. Neither proximity
//! rank nor encounter order ever influences the outcome; permuting the vote
//! list cannot change the winner. The implementation counts into an array
//! indexed by label and scans it in ascending label order with a strict
//! greater-than comparison, so the smallest tied label is kept.

use smallvec::SmallVec;

use crate::error::EnsembleError;

/// Per-query vote buffer sized for typical `k` / fold counts.
pub type VoteBuf = SmallVec<[u32; 16]>;

/// Resolve the majority label of a non-empty vote multiset.
///
/// Returns `None` only for an empty slice; validated call paths always pass
/// at least one vote (`k >= 1`, fold count >= 1).
pub fn majority_label(votes: &[u32]) -> Option<u32> {
    let max = *votes.iter().max()?;
    let mut counts = vec![0u32; max as usize + 1];
    for &vote in votes {
        counts[vote as usize] += 1;
    }
    let mut best = 0usize;
    for (label, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = label;
        }
    }
    Some(best as u32)
}

/// Map neighbor positions through a fold's label vector.
///
/// Positions come from the fold's own index, so an out-of-range position is
/// an internal invariant violation, not a caller error.
pub fn resolve_neighbor_labels(positions: &[u32], labels: &[u32]) -> Result<VoteBuf, EnsembleError> {
    let mut votes = VoteBuf::with_capacity(positions.len());
    for &pos in positions {
        let label = labels.get(pos as usize).copied().ok_or_else(|| {
            EnsembleError::Invariant(format!(
                "neighbor position {pos} outside label vector of length {}",
                labels.len()
            ))
        })?;
        votes.push(label);
    }
    Ok(votes)
}
