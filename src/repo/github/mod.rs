// Two aliased searches (review requested, reviewed by) merged by URL. An
// outstanding review request resets that reviewer's vote.

use async_trait::async_trait;
use octocrab::Octocrab;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{BackendError, MalformedReview, ReviewBackend, ReviewConnection, SearchHit};
use crate::domain::review::{RawReview, ReviewerVote, UserId, Vote};

const SEARCH_PAGE_SIZE: i32 = 50;

#[derive(Debug, Clone)]
pub struct GithubBackend {
    token: String,
    api_base: Option<String>,
}

impl GithubBackend {
    pub fn new(token: impl Into<String>, api_base: Option<String>) -> Self {
        Self {
            token: token.into(),
            api_base,
        }
    }
}

#[async_trait]
impl ReviewBackend for GithubBackend {
    async fn connect(&self) -> Result<Box<dyn ReviewConnection>, BackendError> {
        let mut builder = Octocrab::builder().personal_token(self.token.clone());
        if let Some(api) = &self.api_base {
            builder = builder
                .base_uri(api.as_str())
                .map_err(|e| BackendError::Connection {
                    message: format!("invalid api_base '{api}': {e}"),
                })?;
        }
        let octo = builder.build().map_err(|e| BackendError::Connection {
            message: format!("failed to init GitHub client: {e}"),
        })?;
        Ok(Box::new(GithubConnection { octo }))
    }
}

struct GithubConnection {
    octo: Octocrab,
}

#[derive(Debug, serde::Serialize)]
struct GraphQlPayload<V> {
    query: &'static str,
    variables: V,
}

#[derive(Debug, serde::Serialize)]
struct NoVars {}

#[derive(Debug, serde::Serialize)]
struct SearchVars {
    requested: String,
    reviewed: String,
    page_size: i32,
}

#[derive(Debug, serde::Deserialize)]
struct GraphQlResponse<T> {
    data: T,
}

#[derive(Debug, serde::Deserialize)]
struct ViewerData {
    viewer: Viewer,
}

#[derive(Debug, serde::Deserialize)]
struct Viewer {
    login: String,
}

#[derive(Debug, serde::Deserialize)]
struct SearchData {
    requested: SearchResult,
    reviewed: SearchResult,
}

#[derive(Debug, serde::Deserialize)]
struct SearchResult {
    nodes: Option<Vec<SearchNode>>,
}

#[derive(Debug, serde::Deserialize)]
struct Repository {
    #[serde(rename = "nameWithOwner")]
    name_with_owner: String,
}

#[derive(Debug, serde::Deserialize)]
struct Author {
    login: String,
}

#[derive(Debug, serde::Deserialize)]
struct ReviewRequestConnection {
    nodes: Option<Vec<ReviewRequestNode>>,
}

#[derive(Debug, serde::Deserialize)]
struct ReviewRequestNode {
    #[serde(rename = "requestedReviewer")]
    requested_reviewer: Option<RequestedReviewer>,
}

#[derive(Debug, serde::Deserialize)]
struct RequestedReviewer {
    #[serde(rename = "__typename")]
    typename: Option<String>,
    login: Option<String>, // User
}

#[derive(Debug, serde::Deserialize)]
struct LatestReviews {
    nodes: Option<Vec<LatestReview>>,
}

#[derive(Debug, serde::Deserialize)]
struct LatestReview {
    author: Option<Author>,
    state: String,
}

#[derive(Debug, serde::Deserialize)]
struct SearchNode {
    #[serde(rename = "__typename")]
    typename: Option<String>,
    number: Option<u64>,
    title: Option<String>,
    url: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    #[serde(rename = "isDraft")]
    is_draft: Option<bool>,
    repository: Option<Repository>,
    author: Option<Author>,
    #[serde(rename = "reviewRequests")]
    review_requests: Option<ReviewRequestConnection>,
    #[serde(rename = "latestReviews")]
    latest_reviews: Option<LatestReviews>,
}

const VIEWER_QUERY: &str = "query { viewer { login } }";

const REVIEWS_QUERY: &str = r#"
query ($requested: String!, $reviewed: String!, $page_size: Int!) {
  requested: search(query: $requested, type: ISSUE, first: $page_size) {
    nodes {
      __typename
      ...PrFields
    }
  }
  reviewed: search(query: $reviewed, type: ISSUE, first: $page_size) {
    nodes {
      __typename
      ...PrFields
    }
  }
}

fragment PrFields on PullRequest {
  number
  title
  url
  createdAt
  isDraft
  repository {
    nameWithOwner
  }
  author {
    login
  }
  reviewRequests(first: 50) {
    nodes {
      requestedReviewer {
        __typename
        ... on User {
          login
        }
      }
    }
  }
  latestReviews(first: 50) {
    nodes {
      author {
        login
      }
      state
    }
  }
}
"#;

fn login_id(login: &str) -> UserId {
    UserId::new(login.to_ascii_lowercase())
}

fn map_review_state(state: &str) -> Vote {
    match state {
        "APPROVED" => Vote::Approved,
        "CHANGES_REQUESTED" => Vote::WaitingForAuthor,
        _ => Vote::NoVote,
    }
}

fn upsert(reviewers: &mut Vec<ReviewerVote>, reviewer: UserId, vote: Vote) {
    match reviewers.iter_mut().find(|r| r.reviewer == reviewer) {
        Some(existing) => existing.vote = vote,
        None => reviewers.push(ReviewerVote { reviewer, vote }),
    }
}

fn collect_reviewers(node: &SearchNode) -> Vec<ReviewerVote> {
    let mut reviewers = Vec::new();
    let latest = node
        .latest_reviews
        .as_ref()
        .and_then(|l| l.nodes.as_ref())
        .into_iter()
        .flatten();
    for review in latest {
        // Reviews by deleted accounts have no author.
        if let Some(author) = &review.author {
            upsert(&mut reviewers, login_id(&author.login), map_review_state(&review.state));
        }
    }

    let requests = node
        .review_requests
        .as_ref()
        .and_then(|r| r.nodes.as_ref())
        .into_iter()
        .flatten();
    for request in requests {
        let Some(r) = request.requested_reviewer.as_ref() else {
            continue;
        };
        if r.typename.as_deref() == Some("User")
            && let Some(login) = r.login.as_deref()
        {
            upsert(&mut reviewers, login_id(login), Vote::NoVote);
        }
    }
    reviewers
}

/// `None` for search hits that are not pull requests.
fn to_review(node: SearchNode) -> Option<SearchHit> {
    if node.typename.as_deref()? != "PullRequest" {
        return None;
    }
    let reviewers = collect_reviewers(&node);
    let (Some(number), Some(title), Some(url)) = (node.number, node.title, node.url) else {
        return Some(Err(MalformedReview {
            id: node.number.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
            reason: "missing number, title or url".to_string(),
        }));
    };

    Some(Ok(RawReview {
        id: number,
        title,
        author: node
            .author
            .map(|a| a.login)
            .unwrap_or_else(|| "ghost".to_string()),
        repository: node
            .repository
            .map(|r| r.name_with_owner)
            .unwrap_or_default(),
        created_at: node
            .created_at
            .as_deref()
            .and_then(|d| OffsetDateTime::parse(d, &Rfc3339).ok()),
        is_draft: node.is_draft.unwrap_or(false),
        reviewers,
        url,
    }))
}

fn merge_hits(data: SearchData) -> Vec<SearchHit> {
    let mut seen = std::collections::HashSet::new();
    let mut hits = Vec::new();
    let nodes = [data.requested, data.reviewed]
        .into_iter()
        .flat_map(|r| r.nodes.unwrap_or_default());
    for node in nodes {
        let Some(hit) = to_review(node) else {
            continue;
        };
        if let Ok(review) = &hit
            && !seen.insert(review.url.clone())
        {
            continue;
        }
        hits.push(hit);
    }
    hits
}

fn search_query(qualifier: &str, login: &UserId) -> String {
    format!("is:pr is:open archived:false {qualifier}:{login} sort:created-asc")
}

#[async_trait]
impl ReviewConnection for GithubConnection {
    async fn current_user(&self) -> Result<UserId, BackendError> {
        let payload = GraphQlPayload {
            query: VIEWER_QUERY,
            variables: NoVars {},
        };
        let resp: GraphQlResponse<ViewerData> =
            self.octo
                .graphql(&payload)
                .await
                .map_err(|e| BackendError::Identity {
                    message: format!("GitHub viewer query failed: {e}"),
                })?;
        Ok(login_id(&resp.data.viewer.login))
    }

    async fn search_active_reviews(&self, user: &UserId) -> Result<Vec<SearchHit>, BackendError> {
        let payload = GraphQlPayload {
            query: REVIEWS_QUERY,
            variables: SearchVars {
                requested: search_query("review-requested", user),
                reviewed: search_query("reviewed-by", user),
                page_size: SEARCH_PAGE_SIZE,
            },
        };
        let resp: GraphQlResponse<SearchData> =
            self.octo
                .graphql(&payload)
                .await
                .map_err(|e| BackendError::Query {
                    message: format!("GitHub review search failed: {e}"),
                })?;
        Ok(merge_hits(resp.data))
    }
}
