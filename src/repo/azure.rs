//! Azure DevOps backend over the Git REST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::{BackendError, MalformedReview, ReviewBackend, ReviewConnection, SearchHit};
use crate::domain::review::{RawReview, ReviewerVote, UserId, Vote};

const API_VERSION: &str = "7.0";

#[derive(Debug, Clone)]
pub struct AzureDevOpsBackend {
    org_url: Url,
    project: String,
    repository: Option<String>,
    pat: String,
}

impl AzureDevOpsBackend {
    pub fn new(
        org_url: &str,
        project: impl Into<String>,
        repository: Option<String>,
        pat: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let org_url = Url::parse(org_url).map_err(|e| BackendError::Connection {
            message: format!("invalid organization url '{org_url}': {e}"),
        })?;
        Ok(Self {
            org_url,
            project: project.into(),
            repository,
            pat: pat.into(),
        })
    }
}

#[async_trait]
impl ReviewBackend for AzureDevOpsBackend {
    async fn connect(&self) -> Result<Box<dyn ReviewConnection>, BackendError> {
        let client = Client::builder()
            .user_agent(concat!("pr-dash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Connection {
                message: e.to_string(),
            })?;
        Ok(Box::new(AzureConnection {
            client,
            backend: self.clone(),
        }))
    }
}

struct AzureConnection {
    client: Client,
    backend: AzureDevOpsBackend,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionData {
    authenticated_user: IdentityRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRef {
    id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitPullRequest {
    pull_request_id: u64,
    title: String,
    is_draft: Option<bool>,
    created_by: Option<IdentityRef>,
    creation_date: Option<String>,
    repository: Option<GitRepository>,
    #[serde(default)]
    reviewers: Vec<ReviewerRef>,
}

#[derive(Debug, Deserialize)]
struct GitRepository {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ReviewerRef {
    id: String,
    vote: i32,
}

impl AzureConnection {
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth("", Some(&self.backend.pat))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, reqwest::Error> {
        self.authorized(self.client.get(url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    fn search_url(&self, user: &UserId) -> Result<Url, BackendError> {
        let backend = &self.backend;
        let mut segments = vec![backend.project.as_str(), "_apis", "git"];
        if let Some(repo) = &backend.repository {
            segments.extend(["repositories", repo.as_str()]);
        }
        segments.push("pullrequests");
        let mut url = join_segments(&backend.org_url, &segments)?;
        url.query_pairs_mut()
            .append_pair("searchCriteria.reviewerId", user.as_str())
            .append_pair("searchCriteria.status", "active")
            .append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl ReviewConnection for AzureConnection {
    async fn current_user(&self) -> Result<UserId, BackendError> {
        let url = join_segments(&self.backend.org_url, &["_apis", "connectionData"])?;
        let data: ConnectionData = self
            .get_json(url)
            .await
            .map_err(|e| BackendError::Identity {
                message: e.to_string(),
            })?;
        parse_identity(&data.authenticated_user.id).ok_or_else(|| BackendError::Identity {
            message: format!(
                "authorized identity '{}' is not a GUID",
                data.authenticated_user.id
            ),
        })
    }

    async fn search_active_reviews(&self, user: &UserId) -> Result<Vec<SearchHit>, BackendError> {
        let url = self.search_url(user)?;
        let list: ValueList<GitPullRequest> =
            self.get_json(url).await.map_err(|e| BackendError::Query {
                message: e.to_string(),
            })?;
        Ok(list
            .value
            .into_iter()
            .map(|pr| to_review(pr, &self.backend))
            .collect())
    }
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, BackendError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| BackendError::Connection {
            message: format!("'{base}' cannot be used as a base url"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn parse_identity(raw: &str) -> Option<UserId> {
    let id = Uuid::parse_str(raw).ok()?;
    Some(UserId::new(id.hyphenated().to_string()))
}

fn parse_vote(code: i32) -> Option<Vote> {
    match code {
        10 => Some(Vote::Approved),
        5 => Some(Vote::ApprovedWithSuggestions),
        0 => Some(Vote::NoVote),
        -5 => Some(Vote::WaitingForAuthor),
        -10 => Some(Vote::Rejected),
        _ => None,
    }
}

fn to_review(pr: GitPullRequest, backend: &AzureDevOpsBackend) -> SearchHit {
    let malformed = |reason: String| MalformedReview {
        id: pr.pull_request_id.to_string(),
        reason,
    };

    let is_draft = pr.is_draft.unwrap_or(false);
    let mut reviewers = Vec::with_capacity(pr.reviewers.len());
    for r in &pr.reviewers {
        let parsed = parse_identity(&r.id)
            .ok_or_else(|| format!("reviewer id '{}' is not a GUID", r.id))
            .and_then(|reviewer| {
                parse_vote(r.vote)
                    .map(|vote| ReviewerVote { reviewer, vote })
                    .ok_or_else(|| format!("unknown vote {}", r.vote))
            });
        match parsed {
            Ok(vote) => reviewers.push(vote),
            // Drafts are classified without looking at reviewers.
            Err(_) if is_draft => {}
            Err(reason) => return Err(malformed(reason)),
        }
    }

    let repository = pr
        .repository
        .map(|r| r.name)
        .or_else(|| backend.repository.clone())
        .unwrap_or_default();
    let url = join_segments(
        &backend.org_url,
        &[
            backend.project.as_str(),
            "_git",
            repository.as_str(),
            "pullrequest",
            &pr.pull_request_id.to_string(),
        ],
    )
    .map(String::from)
    .map_err(|e| malformed(e.to_string()))?;

    Ok(RawReview {
        id: pr.pull_request_id,
        title: pr.title,
        author: pr
            .created_by
            .and_then(|c| c.display_name)
            .unwrap_or_else(|| "unknown".to_string()),
        repository,
        created_at: pr
            .creation_date
            .as_deref()
            .and_then(|d| OffsetDateTime::parse(d, &Rfc3339).ok()),
        is_draft,
        reviewers,
        url,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::usecase::classify::classify;

    const ME: &str = "8C2F5E0A-3F0B-4E43-9C1B-2D6E0C4B7A11";
    const OTHER: &str = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";

    fn backend(org: &str) -> AzureDevOpsBackend {
        AzureDevOpsBackend::new(org, "Fabrikam Web", Some("web".to_string()), "pat").unwrap()
    }

    fn pr(reviewers: serde_json::Value) -> GitPullRequest {
        serde_json::from_value(json!({
            "pullRequestId": 42,
            "title": "Fix login",
            "isDraft": false,
            "createdBy": { "id": OTHER, "displayName": "Ana" },
            "creationDate": "2024-03-01T10:15:30.1234567Z",
            "repository": { "name": "web" },
            "reviewers": reviewers,
        }))
        .unwrap()
    }

    #[test]
    fn converts_pull_request() {
        let hit = to_review(
            pr(json!([{ "id": ME, "vote": -5 }, { "id": OTHER, "vote": 10 }])),
            &backend("https://dev.azure.com/contoso/"),
        );
        let review = hit.unwrap();

        assert_eq!(review.id, 42);
        assert_eq!(review.author, "Ana");
        assert_eq!(
            review.url,
            "https://dev.azure.com/contoso/Fabrikam%20Web/_git/web/pullrequest/42"
        );
        assert!(review.created_at.is_some());
        let me = parse_identity(ME).unwrap();
        assert_eq!(review.vote_of(&me), Some(Vote::WaitingForAuthor));
    }

    #[test]
    fn unknown_vote_marks_review_malformed() {
        let hit = to_review(
            pr(json!([{ "id": ME, "vote": 3 }])),
            &backend("https://dev.azure.com/contoso"),
        );
        let err = hit.unwrap_err();
        assert_eq!(err.id, "42");
        assert!(err.reason.contains("unknown vote"));
    }

    #[test]
    fn bad_reviewer_id_marks_review_malformed() {
        let hit = to_review(
            pr(json!([{ "id": "not-a-guid", "vote": 0 }])),
            &backend("https://dev.azure.com/contoso"),
        );
        assert!(hit.unwrap_err().reason.contains("not a GUID"));
    }

    #[test]
    fn draft_with_unreadable_reviewer_is_kept() {
        let mut pr = pr(json!([
            { "id": "[TEAM]\\Reviewers", "vote": 0 },
            { "id": ME, "vote": 7 },
            { "id": OTHER, "vote": 10 }
        ]));
        pr.is_draft = Some(true);

        let review = to_review(pr, &backend("https://dev.azure.com/contoso")).unwrap();

        assert!(review.is_draft);
        assert_eq!(review.reviewers.len(), 1);
        let me = parse_identity(ME).unwrap();
        assert_eq!(
            classify(&review, &me),
            Some(crate::domain::review::ReviewState::Draft)
        );
    }

    #[test]
    fn identities_compare_case_insensitively() {
        assert_eq!(
            parse_identity(ME),
            parse_identity(&ME.to_ascii_lowercase())
        );
    }

    #[tokio::test]
    async fn resolves_user_and_searches_active_reviews() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contoso/_apis/connectionData"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "authenticatedUser": { "id": ME, "displayName": "Me" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(
                "/contoso/Fabrikam%20Web/_apis/git/repositories/web/pullrequests",
            ))
            .and(query_param("searchCriteria.status", "active"))
            .and(query_param(
                "searchCriteria.reviewerId",
                ME.to_ascii_lowercase().as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "pullRequestId": 7,
                    "title": "Add retries",
                    "reviewers": [{ "id": ME, "vote": 0 }]
                }],
                "count": 1
            })))
            .mount(&server)
            .await;

        let backend = backend(&format!("{}/contoso", server.uri()));
        let connection = backend.connect().await.unwrap();
        let user = connection.current_user().await.unwrap();
        let hits = connection.search_active_reviews(&user).await.unwrap();

        assert_eq!(hits.len(), 1);
        let review = hits[0].as_ref().unwrap();
        assert_eq!(review.title, "Add retries");
        assert_eq!(review.repository, "web");
        assert_eq!(review.vote_of(&user), Some(Vote::NoVote));
    }

    #[tokio::test]
    async fn unauthorized_identity_is_an_identity_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contoso/_apis/connectionData"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let backend = backend(&format!("{}/contoso", server.uri()));
        let connection = backend.connect().await.unwrap();
        let err = connection.current_user().await.unwrap_err();
        assert!(matches!(err, BackendError::Identity { .. }));
    }
}
