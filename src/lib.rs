pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod github;
pub mod metrics;
pub mod service;

use auth::{CallerId, IdentityVerifier, StaticTokenVerifier};
use axum::{
    extract::{Path, State},
    middleware,
    routing::get,
    Extension, Json, Router,
};
use config::{AppConfig, RepoId};
use credentials::{
    CredentialCipher, CredentialResolver, CredentialStore, InMemoryCredentialStore,
};
use error::AnalyticsError;
use github::ClientFactory;
use serde::{Deserialize, Serialize};
use service::AnalyticsService;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service running the analytics operations.
    pub service: AnalyticsService,
    /// Verifies bearer tokens into caller identities.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
}

impl AppState {
    /// Initializes the application state from configuration, seeding the credential store
    /// from the configured file if there is one.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = match &config.credentials_file {
            Some(path) => InMemoryCredentialStore::from_file(path)?,
            None => {
                tracing::warn!("CREDENTIALS_FILE is not set; every caller will be unknown");
                InMemoryCredentialStore::new()
            }
        };
        let verifier = Arc::new(StaticTokenVerifier::new(&config.api_tokens));
        Self::with_parts(config, Arc::new(store), verifier)
    }

    /// Initializes the application state around an existing credential store and verifier.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> anyhow::Result<Self> {
        let cipher = CredentialCipher::from_base64_key(&config.credential_key)?;
        let clients =
            ClientFactory::new(config.github_api_base.as_deref(), config.pulls_per_page())?;
        let service = AnalyticsService::new(CredentialResolver::new(store, cipher), clients);

        Ok(Self {
            service,
            verifier,
            config,
        })
    }
}

#[derive(Deserialize)]
pub struct DeveloperPath {
    owner: String,
    repo: String,
    username: String,
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let analytics = Router::new()
        .route("/repos/{owner}/{repo}/pulls", get(get_open_pull_requests))
        .route(
            "/repos/{owner}/{repo}/developers/{username}",
            get(get_developer_metrics),
        )
        .route("/repos/{owner}/{repo}/timing", get(get_timing_metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_caller,
        ));

    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/analytics", analytics)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "pr-analytics",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_open_pull_requests(
    Path(repo_id): Path<RepoId>,
    Extension(caller): Extension<CallerId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<metrics::OpenPullRequestView>>, AnalyticsError> {
    let views = state
        .service
        .list_open_pull_requests(&repo_id, &caller)
        .await
        .inspect_err(|e| log_failure(&repo_id, &caller, e))?;
    tracing::debug!(
        repo = %repo_id,
        caller = %caller,
        count = views.len(),
        "Returning open pull requests"
    );
    Ok(Json(views))
}

pub async fn get_developer_metrics(
    Path(params): Path<DeveloperPath>,
    Extension(caller): Extension<CallerId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<metrics::DeveloperMetrics>, AnalyticsError> {
    let repo_id = RepoId {
        owner: params.owner,
        repo: params.repo,
    };
    let metrics = state
        .service
        .developer_metrics(&repo_id, &params.username, &caller)
        .await
        .inspect_err(|e| log_failure(&repo_id, &caller, e))?;
    Ok(Json(metrics))
}

pub async fn get_timing_metrics(
    Path(repo_id): Path<RepoId>,
    Extension(caller): Extension<CallerId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<metrics::TimingMetrics>, AnalyticsError> {
    let timing = state
        .service
        .timing_metrics(&repo_id, &caller)
        .await
        .inspect_err(|e| log_failure(&repo_id, &caller, e))?;
    Ok(Json(timing))
}

fn log_failure(repo_id: &RepoId, caller: &CallerId, error: &AnalyticsError) {
    match error {
        AnalyticsError::UnknownCaller { .. } | AnalyticsError::UpstreamFetchFailed { .. } => {
            tracing::warn!(
                repo = %repo_id,
                caller = %caller,
                kind = error.kind(),
                "Analytics request failed: {}",
                error
            );
        }
        AnalyticsError::CredentialCorrupt { .. } | AnalyticsError::ClientBuild { .. } => {
            tracing::error!(
                repo = %repo_id,
                caller = %caller,
                kind = error.kind(),
                "Analytics request failed: {}",
                error
            );
        }
    }
}
