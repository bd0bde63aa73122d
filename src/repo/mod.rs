use async_trait::async_trait;

use crate::domain::review::{RawReview, UserId};

pub mod auth;
pub mod azure;
pub mod github;
pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("failed to connect: {message}")]
    Connection { message: String },

    #[error("failed to resolve the signed-in user: {message}")]
    Identity { message: String },

    #[error("pull request search failed: {message}")]
    Query { message: String },
}

/// A single review the backend returned but that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed pull request {id}: {reason}")]
pub struct MalformedReview {
    pub id: String,
    pub reason: String,
}

pub type SearchHit = Result<RawReview, MalformedReview>;

#[async_trait]
pub trait ReviewBackend: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ReviewConnection>, BackendError>;
}

#[async_trait]
pub trait ReviewConnection: Send + Sync {
    async fn current_user(&self) -> Result<UserId, BackendError>;

    /// Active pull requests on which `user` is a reviewer, in backend order.
    async fn search_active_reviews(&self, user: &UserId) -> Result<Vec<SearchHit>, BackendError>;
}
