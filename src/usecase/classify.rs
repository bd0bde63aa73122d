use crate::domain::review::{RawReview, ReviewState, UserId};

/// Decide which bucket a review belongs to for the given reviewer.
///
/// Returns `None` when the reviewer is not assigned to a non-draft review.
/// The checks run in a fixed order: drafts are recognised before reviewer
/// assignment is looked at, so a draft counts as a draft even when the
/// reviewer is not on it.
pub fn classify(review: &RawReview, current_user: &UserId) -> Option<ReviewState> {
    if review.is_draft {
        return Some(ReviewState::Draft);
    }

    let vote = review.vote_of(current_user)?;

    if vote.is_final() {
        Some(ReviewState::SignedOff)
    } else if vote.is_waiting() {
        Some(ReviewState::Waiting)
    } else {
        Some(ReviewState::Actionable)
    }
}
