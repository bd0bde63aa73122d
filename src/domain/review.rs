use std::cmp::Ordering;
use std::fmt;

use time::OffsetDateTime;

/// Where a pull request stands from the signed-in reviewer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewState {
    /// Assigned to the reviewer and no vote cast yet.
    Actionable,
    /// The reviewer asked for changes and waits on the author.
    Waiting,
    Draft,
    /// The reviewer already cast a final vote.
    SignedOff,
}

impl ReviewState {
    pub const ALL: [ReviewState; 4] = [
        ReviewState::Actionable,
        ReviewState::Waiting,
        ReviewState::Draft,
        ReviewState::SignedOff,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Actionable => "Actionable",
            Self::Waiting => "Waiting",
            Self::Draft => "Drafts",
            Self::SignedOff => "Signed off",
        }
    }

    fn priority(self) -> u8 {
        match self {
            Self::Actionable => 0,
            Self::Waiting => 1,
            Self::Draft => 2,
            Self::SignedOff => 3,
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A reviewer's recorded stance on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    NoVote,
    WaitingForAuthor,
    ApprovedWithSuggestions,
    Approved,
    Rejected,
}

impl Vote {
    /// True when the reviewer has completed their part of the review.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::ApprovedWithSuggestions | Self::Rejected
        )
    }

    pub fn is_waiting(self) -> bool {
        matches!(self, Self::WaitingForAuthor)
    }
}

/// Backend-specific identity of a user (a GUID on Azure DevOps, a login on GitHub).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewerVote {
    pub reviewer: UserId,
    pub vote: Vote,
}

/// One active pull request as returned by a backend search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReview {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub repository: String,
    pub created_at: Option<OffsetDateTime>,
    pub is_draft: bool,
    pub reviewers: Vec<ReviewerVote>,
    /// Web page of the pull request; used to open it externally.
    pub url: String,
}

impl RawReview {
    pub fn vote_of(&self, user: &UserId) -> Option<Vote> {
        self.reviewers
            .iter()
            .find(|r| &r.reviewer == user)
            .map(|r| r.vote)
    }
}

/// A classified review together with the account it was fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardEntry {
    pub account: String,
    /// Position of the account in the configuration.
    pub account_index: usize,
    pub state: ReviewState,
    pub review: RawReview,
}

impl DashboardEntry {
    /// Total order of the displayed list: state priority, oldest first
    /// (unknown creation time last), configured account order, review id, url.
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.state
            .priority()
            .cmp(&other.state.priority())
            .then_with(|| compare_created(self.review.created_at, other.review.created_at))
            .then_with(|| self.account_index.cmp(&other.account_index))
            .then_with(|| self.review.id.cmp(&other.review.id))
            .then_with(|| self.review.url.cmp(&other.review.url))
    }
}

fn compare_created(a: Option<OffsetDateTime>, b: Option<OffsetDateTime>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
