use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::macros::datetime;

use super::{BackendError, MalformedReview, ReviewBackend, ReviewConnection, SearchHit};
use crate::domain::review::{RawReview, ReviewerVote, UserId, Vote};
use crate::usecase::fetch::Account;

/// A configured failure fires at the stage matching its variant.
#[derive(Clone)]
pub struct InMemoryBackend {
    user: UserId,
    hits: Vec<SearchHit>,
    failure: Option<BackendError>,
    latency: Duration,
    open: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    pub fn new(user: impl Into<String>, reviews: impl IntoIterator<Item = RawReview>) -> Self {
        Self {
            user: UserId::new(user),
            hits: reviews.into_iter().map(Ok).collect(),
            failure: None,
            latency: Duration::ZERO,
            open: Arc::default(),
            connects: Arc::default(),
        }
    }

    pub fn failing(mut self, failure: BackendError) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_malformed(mut self, malformed: MalformedReview) -> Self {
        self.hits.push(Err(malformed));
        self
    }

    /// Connections handed out and not yet dropped.
    #[cfg(test)]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn fails_with(&self, stage: fn(&BackendError) -> bool) -> Result<(), BackendError> {
        match &self.failure {
            Some(failure) if stage(failure) => Err(failure.clone()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ReviewBackend for InMemoryBackend {
    async fn connect(&self) -> Result<Box<dyn ReviewConnection>, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.fails_with(|f| matches!(f, BackendError::Connection { .. }))?;
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConnection {
            backend: self.clone(),
        }))
    }
}

struct InMemoryConnection {
    backend: InMemoryBackend,
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.backend.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReviewConnection for InMemoryConnection {
    async fn current_user(&self) -> Result<UserId, BackendError> {
        self.backend
            .fails_with(|f| matches!(f, BackendError::Identity { .. }))?;
        Ok(self.backend.user.clone())
    }

    async fn search_active_reviews(&self, _user: &UserId) -> Result<Vec<SearchHit>, BackendError> {
        if !self.backend.latency.is_zero() {
            tokio::time::sleep(self.backend.latency).await;
        }
        self.backend
            .fails_with(|f| matches!(f, BackendError::Query { .. }))?;
        Ok(self.backend.hits.clone())
    }
}

const DEMO_USER: &str = "demo-reviewer";

fn demo_review(
    id: u64,
    title: &str,
    author: &str,
    repository: &str,
    created_at: time::OffsetDateTime,
    my_vote: Option<Vote>,
) -> RawReview {
    let mut reviewers = vec![ReviewerVote {
        reviewer: UserId::new("teammate"),
        vote: Vote::Approved,
    }];
    if let Some(vote) = my_vote {
        reviewers.push(ReviewerVote {
            reviewer: UserId::new(DEMO_USER),
            vote,
        });
    }
    RawReview {
        id,
        title: title.to_string(),
        author: author.to_string(),
        repository: repository.to_string(),
        created_at: Some(created_at),
        is_draft: false,
        reviewers,
        url: format!("https://example.com/{repository}/pull/{id}"),
    }
}

/// Canned accounts for `--demo`: two healthy accounts and one that cannot connect.
pub fn demo_accounts() -> Vec<Account> {
    let platform = vec![
        demo_review(
            4211,
            "Retry transient storage errors in the uploader",
            "mhughes",
            "platform",
            datetime!(2024-03-04 09:12 UTC),
            Some(Vote::NoVote),
        ),
        demo_review(
            4198,
            "Bump TLS stack and drop legacy ciphers",
            "ana",
            "platform",
            datetime!(2024-02-27 16:40 UTC),
            Some(Vote::WaitingForAuthor),
        ),
        demo_review(
            4220,
            "Add tracing spans around queue consumers",
            "ji-woo",
            "platform",
            datetime!(2024-03-05 11:03 UTC),
            Some(Vote::Approved),
        ),
        RawReview {
            is_draft: true,
            ..demo_review(
                4225,
                "WIP: shard the session table",
                "ana",
                "platform",
                datetime!(2024-03-06 08:00 UTC),
                None,
            )
        },
    ];

    let tooling = vec![
        demo_review(
            87,
            "Fix flaky snapshot test on Windows",
            "oss-contributor",
            "tooling",
            datetime!(2024-03-01 20:15 UTC),
            Some(Vote::NoVote),
        ),
        demo_review(
            91,
            "Document the release checklist",
            "sam",
            "tooling",
            datetime!(2024-03-03 10:30 UTC),
            Some(Vote::Rejected),
        ),
        demo_review(
            93,
            "Unrelated PR where we are not a reviewer",
            "sam",
            "tooling",
            datetime!(2024-03-03 12:00 UTC),
            None,
        ),
    ];

    let latency = Duration::from_millis(400);
    vec![
        Account::new(
            "platform",
            InMemoryBackend::new(DEMO_USER, platform).with_latency(latency),
        ),
        Account::new(
            "legacy",
            InMemoryBackend::new(DEMO_USER, Vec::new()).failing(BackendError::Connection {
                message: "demo account is offline".to_string(),
            }),
        ),
        Account::new(
            "tooling",
            InMemoryBackend::new(DEMO_USER, tooling)
                .with_latency(latency)
                .with_malformed(MalformedReview {
                    id: "95".to_string(),
                    reason: "reviewer list could not be read".to_string(),
                }),
        ),
    ]
}
