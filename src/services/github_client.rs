//! GitHub API client.
//!
//! Provides the search call the engine depends on, enriched with the review
//! data the categorizer needs. The engine only sees the [`SearchClient`]
//! trait; [`GitHubClient`] is the production implementation.

use crate::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Back-off used when a rate limit response carries no hint.
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Pull requests enriched at once within one search.
const ENRICH_CONCURRENCY: usize = 4;

/// Reviews per page (the API maximum).
const REVIEWS_PER_PAGE: usize = 100;

/// Upper bound on review pages read per pull request.
const MAX_REVIEW_PAGES: u32 = 10;

/// Code-hosting search API, as seen by the engine.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run one search and return every matching pull request.
    async fn search(&self, query: &str, auth_token: &str) -> Result<Vec<RawItem>, FetchError>;

    /// Login of the user owning the token.
    async fn current_user(&self, auth_token: &str) -> Result<String, FetchError>;
}

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    /// Base URL of the API (e.g., `https://api.github.com`).
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Search results per page (max 100).
    pub per_page: u32,

    /// Upper bound on search pages fetched per source.
    pub max_pages: u32,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 30,
            per_page: 50,
            max_pages: 4,
        }
    }
}

/// GitHub user from API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// State of a pull request review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    #[serde(other)]
    Unknown,
}

/// Pull request review from API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubReview {
    pub user: Option<GitHubUser>,
    pub state: ReviewState,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// A pull request as returned by the search, enriched with review data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub repository_url: String,
    pub user: GitHubUser,
    pub url: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviews: Vec<GitHubReview>,
    /// Logins of users whose review is currently requested.
    pub requested_reviewers: Vec<String>,
}

/// Search hit from `GET /search/issues`.
#[derive(Debug, Clone, Deserialize)]
struct SearchIssue {
    id: u64,
    number: u64,
    title: String,
    repository_url: String,
    user: GitHubUser,
    url: String,
    html_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Present only when the issue is a pull request.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    items: Vec<SearchIssue>,
}

#[derive(Debug, Deserialize)]
struct RequestedReviewersResponse {
    #[serde(default)]
    users: Vec<GitHubUser>,
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

impl GitHubClient {
    /// Create a new GitHub client.
    pub fn new(config: GitHubClientConfig) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("pr-sentinel/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Unexpected {
                status: None,
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Get the full URL for an API path.
    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// GET a JSON resource.
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(self.api_url(endpoint))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        Self::handle_response(response, endpoint).await
    }

    /// Handle API response errors.
    async fn handle_response<T: DeserializeOwned>(
        response: Response,
        endpoint: &str,
    ) -> Result<T, FetchError> {
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| FetchError::Unexpected {
                status: Some(status.as_u16()),
                message: format!("Failed to parse response from {}: {}", endpoint, e),
            });
        }

        let retry_after = rate_limit_hint(response.headers());
        let body = response.text().await.unwrap_or_default();
        // GitHub returns errors as {"message": "..."}
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);

        Err(classify_status(status, retry_after, message))
    }

    /// Run a search, following pages up to the configured cap.
    pub async fn search_pull_requests(
        &self,
        query: &str,
        token: &str,
    ) -> Result<Vec<RawItem>, FetchError> {
        let mut hits: Vec<SearchIssue> = Vec::new();
        let mut page = 1;

        loop {
            let response: SearchResponse = self
                .get_json(
                    "/search/issues",
                    &[
                        ("q", query.to_string()),
                        ("sort", "updated".to_string()),
                        ("order", "desc".to_string()),
                        ("per_page", self.config.per_page.to_string()),
                        ("page", page.to_string()),
                    ],
                    token,
                )
                .await?;

            let received = response.items.len();
            hits.extend(response.items);

            let exhausted = received < self.config.per_page as usize
                || hits.len() as u64 >= response.total_count;
            if exhausted || page >= self.config.max_pages {
                break;
            }
            page += 1;
        }

        log::debug!("Search '{}' returned {} hit(s)", query, hits.len());

        // `buffered` keeps the search order
        stream::iter(hits.into_iter().filter(|h| h.pull_request.is_some()))
            .map(|hit| self.enrich(hit, token))
            .buffered(ENRICH_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Attach requested reviewers and reviews to a search hit.
    async fn enrich(&self, hit: SearchIssue, token: &str) -> Result<RawItem, FetchError> {
        let Some((owner, repo)) = split_repository_url(&hit.repository_url) else {
            return Err(FetchError::Unexpected {
                status: None,
                message: format!("Unrecognized repository URL: {}", hit.repository_url),
            });
        };

        let base = format!(
            "/repos/{}/{}/pulls/{}",
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            hit.number
        );
        let reviewers_endpoint = format!("{}/requested_reviewers", base);
        let reviews_endpoint = format!("{}/reviews", base);

        let (reviewers, reviews) = futures::try_join!(
            self.get_json::<RequestedReviewersResponse>(&reviewers_endpoint, &[], token),
            self.get_reviews(&reviews_endpoint, token),
        )
        .or_else(|e| match e {
            // The PR vanished between search and enrichment.
            FetchError::NotFound(_) => Ok((
                RequestedReviewersResponse { users: Vec::new() },
                Vec::new(),
            )),
            other => Err(other),
        })?;

        Ok(RawItem {
            id: hit.id,
            number: hit.number,
            title: hit.title,
            repository_url: hit.repository_url,
            user: hit.user,
            url: hit.url,
            html_url: hit.html_url,
            created_at: hit.created_at,
            updated_at: hit.updated_at,
            reviews,
            requested_reviewers: reviewers.users.into_iter().map(|u| u.login).collect(),
        })
    }

    /// Read every page of a pull request's reviews, oldest first.
    async fn get_reviews(
        &self,
        endpoint: &str,
        token: &str,
    ) -> Result<Vec<GitHubReview>, FetchError> {
        let mut reviews = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("per_page", REVIEWS_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let batch: Vec<GitHubReview> = self.get_json(endpoint, &query, token).await?;
            let received = batch.len();
            reviews.extend(batch);

            if received < REVIEWS_PER_PAGE || page >= MAX_REVIEW_PAGES {
                break;
            }
            page += 1;
        }

        Ok(reviews)
    }

    /// Get the user owning the token. Used to verify a token.
    pub async fn get_user(&self, token: &str) -> Result<GitHubUser, FetchError> {
        self.get_json("/user", &[], token).await
    }
}

#[async_trait]
impl SearchClient for GitHubClient {
    async fn search(&self, query: &str, auth_token: &str) -> Result<Vec<RawItem>, FetchError> {
        self.search_pull_requests(query, auth_token).await
    }

    async fn current_user(&self, auth_token: &str) -> Result<String, FetchError> {
        self.get_user(auth_token).await.map(|user| user.login)
    }
}

/// Map a non-success status to the fetch error taxonomy.
fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    message: String,
) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED => FetchError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after: retry_after
                .unwrap_or(Duration::from_secs(DEFAULT_RATE_LIMIT_WAIT_SECS)),
        },
        // Secondary and primary rate limits come back as 403 with headers set
        StatusCode::FORBIDDEN if retry_after.is_some() => FetchError::RateLimited {
            retry_after: retry_after.unwrap_or_default(),
        },
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => FetchError::NotFound(message),
        s if s.is_server_error() => FetchError::Transient(format!("HTTP {}: {}", s.as_u16(), message)),
        s => FetchError::Unexpected {
            status: Some(s.as_u16()),
            message,
        },
    }
}

/// Read the back-off hint from rate limit headers, if the response is one.
fn rate_limit_hint(headers: &header::HeaderMap) -> Option<Duration> {
    let get_header = |name: &str| -> Option<u64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    };

    if let Some(secs) = get_header("retry-after") {
        return Some(Duration::from_secs(secs));
    }

    if get_header("x-ratelimit-remaining") == Some(0) {
        let wait = get_header("x-ratelimit-reset")
            .map(|reset| (reset as i64 - Utc::now().timestamp()).max(1) as u64)
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS);
        return Some(Duration::from_secs(wait));
    }

    None
}

/// Split an API repository URL into owner and repository name.
///
/// e.g., "https://api.github.com/repos/octo/widgets" -> ("octo", "widgets")
pub fn split_repository_url(repository_url: &str) -> Option<(&str, &str)> {
    let idx = repository_url.find("/repos/")?;
    let mut parts = repository_url[idx + "/repos/".len()..].split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    Some((owner, repo))
}

/// `owner/repo` form of an API repository URL.
pub fn repo_full_name(repository_url: &str) -> Option<String> {
    split_repository_url(repository_url).map(|(owner, repo)| format!("{}/{}", owner, repo))
}
