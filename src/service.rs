//! Service layer for the analytics operations.
//!
//! Each operation runs the whole chain on its own:
//! 1. Resolve the verified caller's upstream credential.
//! 2. Build a client bound to that credential.
//! 3. Fetch a single page of pull requests from GitHub.
//! 4. Aggregate the records into the requested view.
//!
//! Nothing is cached or shared between calls, so repeated or concurrent requests each
//! reach upstream independently.

use crate::auth::CallerId;
use crate::config::RepoId;
use crate::credentials::CredentialResolver;
use crate::error::AnalyticsError;
use crate::github::{ClientFactory, StateFilter};
use crate::metrics::{
    self, DeveloperMetrics, OpenPullRequestView, PullRequestRecord, TimingMetrics,
};
use chrono::Utc;

#[derive(Clone)]
pub struct AnalyticsService {
    resolver: CredentialResolver,
    clients: ClientFactory,
}

impl AnalyticsService {
    pub fn new(resolver: CredentialResolver, clients: ClientFactory) -> Self {
        Self { resolver, clients }
    }

    /// Lists the open pull requests of a repository in upstream order.
    pub async fn list_open_pull_requests(
        &self,
        repo_id: &RepoId,
        caller: &CallerId,
    ) -> Result<Vec<OpenPullRequestView>, AnalyticsError> {
        let records = self.fetch(repo_id, caller, StateFilter::Open).await?;
        Ok(metrics::list_open(&records))
    }

    /// Computes funnel metrics for `developer`, who need not be the caller.
    pub async fn developer_metrics(
        &self,
        repo_id: &RepoId,
        developer: &str,
        caller: &CallerId,
    ) -> Result<DeveloperMetrics, AnalyticsError> {
        let records = self.fetch(repo_id, caller, StateFilter::All).await?;
        let metrics = metrics::developer_metrics(&records, developer);
        tracing::debug!(
            repo = %repo_id,
            developer,
            total = metrics.total_prs,
            merged = metrics.merged_prs,
            "Computed developer metrics"
        );
        Ok(metrics)
    }

    /// Computes repository-wide merge timing and the longest running open pull requests.
    pub async fn timing_metrics(
        &self,
        repo_id: &RepoId,
        caller: &CallerId,
    ) -> Result<TimingMetrics, AnalyticsError> {
        let records = self.fetch(repo_id, caller, StateFilter::All).await?;
        Ok(metrics::timing_metrics(&records, Utc::now()))
    }

    async fn fetch(
        &self,
        repo_id: &RepoId,
        caller: &CallerId,
        state: StateFilter,
    ) -> Result<Vec<PullRequestRecord>, AnalyticsError> {
        let credential = self.resolver.resolve(caller.as_str()).await?;
        let client = self.clients.build_client(&credential)?;
        client.fetch_pull_requests(repo_id, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialCipher, InMemoryCredentialStore};
    use chrono::Duration;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo() -> RepoId {
        RepoId {
            owner: "owner".to_string(),
            repo: "repo".to_string(),
        }
    }

    async fn service_for(server: &MockServer) -> AnalyticsService {
        let cipher = CredentialCipher::from_key(&[3; 32]).unwrap();
        let store = InMemoryCredentialStore::new();
        store
            .insert("alice", cipher.encrypt("ghp_alice").unwrap())
            .await;
        AnalyticsService::new(
            CredentialResolver::new(Arc::new(store), cipher),
            ClientFactory::new(Some(&server.uri()), 30).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_unknown_caller_never_reaches_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(0)
            .mount(&server)
            .await;
        let service = service_for(&server).await;
        let stranger = CallerId::new("mallory");

        let open = service.list_open_pull_requests(&repo(), &stranger).await;
        let developer = service.developer_metrics(&repo(), "dev1", &stranger).await;
        let timing = service.timing_metrics(&repo(), &stranger).await;

        for err in [
            open.unwrap_err(),
            developer.unwrap_err(),
            timing.unwrap_err(),
        ] {
            assert!(matches!(err, AnalyticsError::UnknownCaller { .. }));
        }
    }

    #[tokio::test]
    async fn test_timing_metrics_fetches_all_states() {
        let server = MockServer::start().await;
        let created = (Utc::now() - Duration::days(5)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/pulls"))
            .and(query_param("state", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "number": 1,
                    "title": "Stale change",
                    "user": { "login": "dev1" },
                    "created_at": created,
                    "closed_at": null,
                    "merged_at": null,
                    "state": "open",
                    "html_url": "https://github.com/owner/repo/pull/1"
                },
                {
                    "number": 2,
                    "title": "Quick fix",
                    "user": { "login": "dev2" },
                    "created_at": "2024-01-01T00:00:00Z",
                    "closed_at": "2024-01-01T12:00:00Z",
                    "merged_at": "2024-01-01T12:00:00Z",
                    "state": "closed",
                    "html_url": "https://github.com/owner/repo/pull/2"
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        let service = service_for(&server).await;

        let timing = service
            .timing_metrics(&repo(), &CallerId::new("alice"))
            .await
            .unwrap();

        assert!((timing.average_time_to_merge_hours - 12.0).abs() < f64::EPSILON);
        assert_eq!(timing.longest_running_prs.len(), 1);
        assert!(timing.longest_running_prs[0].days_open >= 4);
        assert_eq!(timing.longest_running_prs[0].title, "Stale change");
    }

    #[tokio::test]
    async fn test_upstream_failure_aborts_operation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/pulls"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "Bad credentials"
            })))
            .mount(&server)
            .await;
        let service = service_for(&server).await;

        let err = service
            .developer_metrics(&repo(), "dev1", &CallerId::new("alice"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AnalyticsError::UpstreamFetchFailed {
                status: Some(401),
                ..
            }
        ));
    }
}
