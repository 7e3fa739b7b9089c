use crate::config::RepoId;
use crate::credentials::Credential;
use crate::error::AnalyticsError;
use crate::metrics::{PullRequestRecord, PullRequestState};
use chrono::{DateTime, Utc};
use http::{StatusCode, Uri};
use octocrab::service::middleware::retry::RetryConfig;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

const UNKNOWN_AUTHOR: &str = "Unknown";

/// State filter sent to the pull request listing endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Open,
    All,
}

#[derive(Serialize)]
struct ListPullsQuery {
    state: StateFilter,
    per_page: u8,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

/// Pull request fields as returned by `GET /repos/{owner}/{repo}/pulls`.
#[derive(Debug, Deserialize)]
struct ApiPullRequest {
    number: u64,
    title: Option<String>,
    user: Option<ApiUser>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    state: PullRequestState,
    html_url: String,
}

impl From<ApiPullRequest> for PullRequestRecord {
    fn from(pr: ApiPullRequest) -> Self {
        Self {
            number: pr.number,
            title: pr.title.unwrap_or_default(),
            author: pr
                .user
                .map(|user| user.login)
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            created_at: pr.created_at,
            closed_at: pr.closed_at,
            merged_at: pr.merged_at,
            state: pr.state,
            url: pr.html_url,
        }
    }
}

/// Builds one authenticated GitHub client per analytics operation.
#[derive(Clone, Debug)]
pub struct ClientFactory {
    api_base: Option<Uri>,
    per_page: u8,
}

impl ClientFactory {
    pub fn new(api_base: Option<&str>, per_page: u8) -> anyhow::Result<Self> {
        let api_base = api_base
            .map(|base| base.parse::<Uri>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid GitHub API base: {e}"))?;
        Ok(Self { api_base, per_page })
    }

    /// Wraps the credential into a fresh client. Nothing is shared with other clients.
    pub fn build_client(&self, credential: &Credential) -> Result<GitHubClient, AnalyticsError> {
        let mut builder = Octocrab::builder()
            .personal_token(credential.expose().to_owned())
            .add_retry_config(RetryConfig::None);
        if let Some(base) = &self.api_base {
            builder = builder
                .base_uri(base.clone())
                .map_err(|e| AnalyticsError::ClientBuild {
                    message: e.to_string(),
                })?;
        }

        let octocrab = builder.build().map_err(|e| AnalyticsError::ClientBuild {
            message: e.to_string(),
        })?;

        Ok(GitHubClient {
            octocrab,
            per_page: self.per_page,
        })
    }
}

pub struct GitHubClient {
    octocrab: Octocrab,
    per_page: u8,
}

impl GitHubClient {
    /// Issues a single listing request. Only the first page is read and nothing is retried.
    pub async fn fetch_pull_requests(
        &self,
        repo_id: &RepoId,
        state: StateFilter,
    ) -> Result<Vec<PullRequestRecord>, AnalyticsError> {
        // Sanitize inputs to prevent path traversal or unintended endpoint access
        let owner = sanitize_segment(&repo_id.owner);
        let repo = sanitize_segment(&repo_id.repo);
        let route = format!("/repos/{owner}/{repo}/pulls");
        let query = ListPullsQuery {
            state,
            per_page: self.per_page,
        };

        let prs: Vec<ApiPullRequest> = self
            .octocrab
            .get(route, Some(&query))
            .await
            .map_err(|e| map_octocrab_error(&e))?;

        tracing::debug!(repo = %repo_id, state = ?state, count = prs.len(), "Fetched pull requests");

        Ok(prs.into_iter().map(PullRequestRecord::from).collect())
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment.trim().replace("..", "").replace(['/', '?', '#'], "")
}

fn is_rate_limit_error(source: &octocrab::GitHubError) -> bool {
    let is_rate_limit_status = matches!(
        source.status_code,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    );

    let message_indicates_rate_limit = source.message.to_lowercase().contains("rate limit")
        || source
            .documentation_url
            .as_deref()
            .is_some_and(|url| url.contains("rate-limit"));

    is_rate_limit_status && message_indicates_rate_limit
}

fn map_octocrab_error(error: &octocrab::Error) -> AnalyticsError {
    match error {
        octocrab::Error::GitHub { source, .. } => AnalyticsError::UpstreamFetchFailed {
            status: Some(source.status_code.as_u16()),
            rate_limited: is_rate_limit_error(source),
            message: source.message.clone(),
        },
        other => AnalyticsError::UpstreamFetchFailed {
            status: None,
            rate_limited: false,
            message: other.to_string(),
        },
    }
}
