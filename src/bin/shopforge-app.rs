use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use url::Url;

use shopforge::app::job_store::{InMemoryJobStore, JobStore};
use shopforge::app::model::{ScrapeJob, StartScrapeRequest};
use shopforge::app::queue::ScrapeJobQueue;
use shopforge::app::runner::ScrapeJobRunner;
use shopforge::catalog::{CatalogSink, LocalFsCatalogStore};
use shopforge::extract::{Extractor, ExtractorConfig, HttpExtractor};
use shopforge::formats::ProductRecord;
use shopforge::provision::credentials::Credentials;
use shopforge::provision::error::ProvisionError;
use shopforge::provision::github::{GitHubClient, GitHubConfig, RepositoryProvider};
use shopforge::provision::orchestrator::{Orchestrator, ProvisionSettings};
use shopforge::store_config::{
    ConfigError, StoreConfig, StoreIdentity, VersionedIdentity, store_config_path,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[arg(long, default_value = "shopforge-data")]
    data_dir: PathBuf,

    /// Scrape jobs allowed to run at the same time.
    #[arg(long, default_value_t = 1)]
    max_concurrency: usize,

    /// Storefront working tree published by `/api/provision`.
    #[arg(long, default_value = "storefront")]
    tree: PathBuf,
}

#[derive(Clone)]
struct AppState {
    store_config: Arc<StoreConfig>,
    catalog: Arc<dyn CatalogSink>,
    extractor: Option<Arc<dyn Extractor>>,
    job_store: Arc<dyn JobStore>,
    queue: ScrapeJobQueue,
    runner: Option<Arc<ScrapeJobRunner>>,
    credentials: Credentials,
    orchestrator: Arc<Orchestrator>,
}

type ApiError = (StatusCode, String);

impl AppState {
    fn extractor(&self) -> Result<&Arc<dyn Extractor>, ApiError> {
        self.extractor.as_ref().ok_or_else(extractor_unavailable)
    }

    fn runner(&self) -> Result<&Arc<ScrapeJobRunner>, ApiError> {
        self.runner.as_ref().ok_or_else(extractor_unavailable)
    }
}

fn extractor_unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "scraping is disabled: SHOPFORGE_EXTRACTOR_URL is not set".to_string(),
    )
}

fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(?err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    shopforge::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting shopforge-app");

    let store_config = StoreConfig::load(store_config_path(&args.data_dir)).await?;
    let extractor_config = match ExtractorConfig::from_env() {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::warn!(err = %format!("{err:#}"), "scraping endpoints disabled");
            None
        }
    };
    let extractor = extractor_config
        .as_ref()
        .map(|config| HttpExtractor::new(config).map(|e| Arc::new(e) as Arc<dyn Extractor>))
        .transpose()?;
    let call_timeout = extractor_config
        .as_ref()
        .map(|config| config.timeout)
        .unwrap_or(Duration::from_secs(ExtractorConfig::DEFAULT_TIMEOUT_SECS));

    let store_config = Arc::new(store_config);
    let orchestrator = shopforge::provision::orchestrator_from_env(
        Arc::clone(&store_config),
        ProvisionSettings::from_env(&args.tree),
    )?;

    let state = build_state(
        store_config,
        Arc::new(LocalFsCatalogStore::new(&args.data_dir)),
        extractor,
        call_timeout,
        args.max_concurrency,
        Credentials::from_env(),
        Arc::new(orchestrator),
    );
    let status = state.credentials.status();
    tracing::info!(github = status.github, vercel = status.vercel, "provider connections");

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_state(
    store_config: Arc<StoreConfig>,
    catalog: Arc<dyn CatalogSink>,
    extractor: Option<Arc<dyn Extractor>>,
    call_timeout: Duration,
    max_concurrency: usize,
    credentials: Credentials,
    orchestrator: Arc<Orchestrator>,
) -> AppState {
    let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let runner = extractor.as_ref().map(|extractor| {
        Arc::new(ScrapeJobRunner::new(
            Arc::clone(&job_store),
            Arc::clone(extractor),
            Arc::clone(&catalog),
            call_timeout,
        ))
    });
    AppState {
        store_config,
        catalog,
        extractor,
        job_store,
        queue: ScrapeJobQueue::new(max_concurrency),
        runner,
        credentials,
        orchestrator,
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/scrape/links", post(scrape_links_handler))
        .route("/api/scrape/products", post(start_scrape))
        .route("/api/scrape/jobs/:job_id", get(get_job))
        .route("/api/scrape/jobs/:job_id/cancel", post(cancel_job))
        .route("/api/scrape/jobs/:job_id/products", get(job_products))
        .route("/api/products", get(list_products))
        .route("/api/config/store", get(get_store_config).post(update_store_config))
        .route("/api/connections", get(connections))
        .route("/api/github/repos", get(list_repos))
        .route("/api/provision", post(provision))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LinksRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct LinksResponse {
    links: Vec<String>,
}

async fn scrape_links_handler(
    State(state): State<AppState>,
    Json(body): Json<LinksRequest>,
) -> Result<Json<LinksResponse>, ApiError> {
    let extractor = state.extractor()?;
    let url = Url::parse(body.url.trim())
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid url: {err}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err((StatusCode::BAD_REQUEST, "url must be http/https".to_string()));
    }

    let links = shopforge::scrape::scrape_links(extractor.as_ref(), &url)
        .await
        .map_err(|err| (StatusCode::BAD_GATEWAY, format!("{err:#}")))?;
    Ok(Json(LinksResponse {
        links: links.into_iter().map(String::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
struct StartScrapeResponse {
    job_id: String,
}

async fn start_scrape(
    State(state): State<AppState>,
    Json(request): Json<StartScrapeRequest>,
) -> Result<(StatusCode, Json<StartScrapeResponse>), ApiError> {
    let runner = Arc::clone(state.runner()?);
    request
        .validate()
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("{err:#}")))?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let job = ScrapeJob::new(job_id.clone(), request);
    state.job_store.create(&job).await.map_err(internal)?;
    runner.register(&job_id);

    state.queue.submit(runner, job_id.clone());
    tracing::info!(job_id, waiting = state.queue.waiting(), "scrape job queued");
    Ok((StatusCode::ACCEPTED, Json(StartScrapeResponse { job_id })))
}

async fn load_job(state: &AppState, job_id: &str) -> Result<ScrapeJob, ApiError> {
    if uuid::Uuid::parse_str(job_id.trim()).is_err() {
        return Err((StatusCode::BAD_REQUEST, "invalid job id".to_string()));
    }
    state
        .job_store
        .get(job_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("job not found: {job_id}")))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ScrapeJob>, ApiError> {
    Ok(Json(load_job(&state, &job_id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let job = load_job(&state, &job_id).await?;
    let runner = state.runner()?;
    if job.status.is_terminal() || !runner.cancel(&job_id) {
        return Err((StatusCode::CONFLICT, "job already finished".to_string()));
    }
    Ok(StatusCode::ACCEPTED)
}

/// Hands out the products a finished job saved and forgets the job.
async fn job_products(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<ProductRecord>>, ApiError> {
    let job = load_job(&state, &job_id).await?;
    if !job.status.is_terminal() {
        return Err((StatusCode::CONFLICT, "job is still running".to_string()));
    }

    let mut products = Vec::with_capacity(job.product_ids.len());
    for id in &job.product_ids {
        if let Some(record) = state.catalog.find(*id).await.map_err(internal)? {
            products.push(record);
        }
    }
    state.job_store.remove(&job_id).await.map_err(internal)?;
    Ok(Json(products))
}

async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductRecord>>, ApiError> {
    Ok(Json(state.catalog.list().await.map_err(internal)?))
}

async fn get_store_config(State(state): State<AppState>) -> Json<VersionedIdentity> {
    Json((*state.store_config.get().await).clone())
}

#[derive(Debug, Serialize)]
struct StoreConfigResponse {
    config: VersionedIdentity,
    warning: Option<String>,
}

async fn update_store_config(
    State(state): State<AppState>,
    Json(identity): Json<StoreIdentity>,
) -> Result<Json<StoreConfigResponse>, ApiError> {
    let identity = if identity.database.trim().is_empty() {
        identity.with_generated_database(Utc::now().date_naive())
    } else {
        identity
    };

    let updated = state
        .store_config
        .update(identity)
        .await
        .map_err(|err| match err {
            ConfigError::InvalidConfiguration(_) => (StatusCode::BAD_REQUEST, err.to_string()),
            ConfigError::Persist(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        })?;
    let warning =
        shopforge::provision::repository_collision(&state.credentials, &updated.identity)
            .await
            .map(|name| format!("repository {name} already exists"));

    Ok(Json(StoreConfigResponse {
        config: (*updated).clone(),
        warning,
    }))
}

async fn connections(
    State(state): State<AppState>,
) -> Json<shopforge::provision::credentials::ConnectionStatus> {
    Json(state.credentials.status())
}

async fn list_repos(State(state): State<AppState>) -> Result<Response, ApiError> {
    let token = state
        .credentials
        .require_source_control()
        .map_err(|err| (StatusCode::FORBIDDEN, err.to_string()))?;
    let client = GitHubClient::new(GitHubConfig::from_env()).map_err(internal)?;
    let repositories = client
        .list_repositories(token)
        .await
        .map_err(|err| (StatusCode::BAD_GATEWAY, err.to_string()))?;
    Ok(Json(repositories).into_response())
}

fn provision_status(err: &ProvisionError) -> StatusCode {
    match err {
        ProvisionError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
        ProvisionError::CredentialMissing { .. } => StatusCode::FORBIDDEN,
        ProvisionError::RunInProgress => StatusCode::CONFLICT,
        ProvisionError::RepositoryExists { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ProvisionError::RepositoryProvider(_)
        | ProvisionError::ProjectCreation(_)
        | ProvisionError::DeploymentTrigger(_)
        | ProvisionError::DeploymentStatus { .. }
        | ProvisionError::DeploymentFailed { .. }
        | ProvisionError::DeploymentTimeout { .. }
        | ProvisionError::Alias { .. } => StatusCode::BAD_GATEWAY,
        ProvisionError::Publish(_) | ProvisionError::EnvSync(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn provision(State(state): State<AppState>) -> Response {
    match state.orchestrator.provision(&state.credentials).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => {
            tracing::warn!(kind = err.kind(), err = %err, "provisioning failed");
            let body = serde_json::json!({
                "kind": err.kind(),
                "error": err.to_string(),
            });
            (provision_status(&err), Json(body)).into_response()
        }
    }
}
