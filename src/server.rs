//!
//! statesman HTTP server
//! ---------------------
//! Axum router serving three surfaces over one shared `AppState`:
//! - the Terraform http backend protocol (`/state/{id}`, also `/v1/backend/{id}`);
//! - the unit management API under `/v1/units`;
//! - the RBAC admin API under `/v1/rbac`.
//!
//! The store handed to handlers is the RBAC-gated layer. Dependency-graph updates run
//! on their own background queue, separate from index synchronization, because graph
//! jobs write through the orchestrating layer and so enqueue index jobs themselves.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{Backend, ServerConfig};
use crate::deps::{DependencyGraph, GraphUpdater, GRAPH_UNIT_ID};
use crate::identity::{HeaderPrincipalSupplier, OrgId, OrgResolver, PrincipalSupplier, RequestContext, StaticOrgResolver};
use crate::index::MemoryIndex;
use crate::rbac::RbacManager;
use crate::storage::{AuthorizingStore, FsObjectClient, MemStore, ObjectStore, OrchestratingStore, SharedUnitStore, TaskQueue};

pub mod backend;
pub mod context;
pub mod rbac_api;
pub mod units;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    /// RBAC-gated unit store.
    pub store: SharedUnitStore,
    pub rbac: Arc<RbacManager>,
    pub graph: Arc<dyn GraphUpdater>,
    pub principals: Arc<dyn PrincipalSupplier>,
    pub orgs: Arc<dyn OrgResolver>,
    pub orchestrator: Arc<OrchestratingStore>,
    pub index_tasks: Arc<TaskQueue>,
    pub graph_tasks: Arc<TaskQueue>,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Waits for queued background work. Graph jobs enqueue index jobs, so the graph
    /// queue drains first.
    pub async fn flush_background(&self) {
        self.graph_tasks.flush().await;
        self.index_tasks.flush().await;
    }

    pub fn shutdown_background(&self) {
        self.graph_tasks.shutdown();
        self.index_tasks.shutdown();
    }

    /// Queues a best-effort dependency-graph refresh for a unit that was just written.
    /// All refreshes share the graph unit's queue key and so run one at a time.
    pub(crate) async fn schedule_graph_update(&self, unit_id: &str, state: Vec<u8>) {
        let graph = self.graph.clone();
        let unit = unit_id.to_string();
        let queued = self
            .graph_tasks
            .submit(GRAPH_UNIT_ID, async move {
                if let Err(e) = graph.update_on_write(&unit, &state).await {
                    warn!(target: "statesman::deps", unit_id = %unit, error = %e, "dependency graph update skipped");
                }
            })
            .await;
        if !queued {
            warn!(target: "statesman::deps", unit_id, "graph queue closed; update dropped");
        }
    }
}

/// Builds the layer stack: blob backend, in-memory index, orchestrating layer, RBAC
/// gate. With a durable backend the index is rebuilt from it before serving.
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let blob: SharedUnitStore = match config.backend {
        Backend::Memory => Arc::new(MemStore::new(config.store)),
        Backend::Fs => {
            let client = FsObjectClient::new(&config.data_dir)
                .with_context(|| format!("opening object directory {}", config.data_dir.display()))?;
            Arc::new(ObjectStore::new(Arc::new(client), &config.object_prefix, config.store))
        }
    };

    let index = Arc::new(match &config.index_snapshot {
        Some(path) => MemoryIndex::with_snapshot(path).with_context(|| format!("loading index snapshot {}", path.display()))?,
        None => MemoryIndex::new(),
    });

    let index_tasks = Arc::new(TaskQueue::new("index", config.workers, config.queue_capacity));
    let graph_tasks = Arc::new(TaskQueue::new("graph", config.workers, config.queue_capacity));
    let orchestrator = Arc::new(OrchestratingStore::new(blob, index.clone(), index_tasks.clone()));

    let default_org = OrgId::new(config.default_org.clone());
    if config.backend != Backend::Memory {
        let synced = orchestrator
            .reconcile_index(&RequestContext::system(default_org.clone()))
            .await
            .context("reconciling index from blob store")?;
        info!(target: "statesman", units = synced, "index reconciled");
    }

    let rbac = Arc::new(RbacManager::new(index.clone()).with_system_subjects(config.system_subjects.iter().cloned()));
    let store: SharedUnitStore = Arc::new(AuthorizingStore::new(orchestrator.clone(), rbac.clone(), index));
    let graph: Arc<dyn GraphUpdater> = Arc::new(DependencyGraph::new(orchestrator.clone(), default_org));

    Ok(AppState {
        store,
        rbac,
        graph,
        principals: Arc::new(HeaderPrincipalSupplier),
        orgs: Arc::new(StaticOrgResolver::new(config.default_org.clone())),
        orchestrator,
        index_tasks,
        graph_tasks,
        max_body_bytes: config.max_body_bytes,
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> { Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") }) }

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/state/{*id}", any(backend::handle))
        .route("/v1/backend/{*id}", any(backend::handle))
        .merge(units::routes())
        .merge(rbac_api::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the statesman HTTP server and block until ctrl-c.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let app = build_router(state.clone());

    info!(target: "statesman", addr = %config.http_addr, backend = ?config.backend, max_versions = config.store.max_versions, "starting server");
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    state.flush_background().await;
    state.shutdown_background();
    info!(target: "statesman", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "statesman", error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}
