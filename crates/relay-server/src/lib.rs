//! # relay-server
//!
//! Axum WebSocket server hosting the Relay presence-and-fanout core:
//!
//! - **Presence**: [`websocket::registry::ConnectionRegistry`] maps each
//!   online user to their single live connection.
//! - **Fanout**: [`chat::fanout::FanoutDispatcher`] routes message/typing
//!   events to a freshly resolved recipient set.
//! - **Typing**: [`chat::typing::TypingCoordinator`] expires stale typing
//!   flags and synthesizes `stop-typing`.
//! - **Status**: [`chat::status::MessageStatusTracker`] advances the
//!   `sending → sent → delivered → seen` lifecycle.
//! - **Storage**: [`store::sqlite::SqliteStores`] backs the message store
//!   and group directory.
//!
//! Everything is explicitly constructed in [`run`] (or by tests) and
//! injected through [`context::ServerContext`]; the core has no ambient
//! globals.

#![deny(unsafe_code)]

pub mod chat;
pub mod context;
pub mod metrics;
pub mod settings;
pub mod store;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::chat::fanout::FanoutDispatcher;
use crate::chat::resolver::ChatTargetResolver;
use crate::chat::status::MessageStatusTracker;
use crate::chat::typing::TypingCoordinator;
use crate::context::ServerContext;
use crate::settings::RelaySettings;
use crate::store::sqlite::SqliteStores;
use crate::store::MessageStore;
use crate::websocket::connection;
use crate::websocket::registry::ConnectionRegistry;

/// Wire up every component over the given settings and sqlite database.
///
/// Construction order follows the dependency order: registry and stores
/// first, then resolver and fanout, then the coordinators that route
/// through fanout.
pub fn build_context(settings: RelaySettings, stores: &SqliteStores) -> ServerContext {
    let settings = Arc::new(settings);
    let registry = Arc::new(ConnectionRegistry::new());
    let store: Arc<dyn MessageStore> = Arc::new(stores.messages());
    let resolver = ChatTargetResolver::new(Arc::new(stores.groups()));
    let fanout = Arc::new(FanoutDispatcher::new(Arc::clone(&registry), resolver));
    let typing = Arc::new(TypingCoordinator::new(
        Arc::clone(&fanout),
        settings.typing_expiry(),
    ));
    let status = Arc::new(MessageStatusTracker::new(
        Arc::clone(&registry),
        Arc::clone(&store),
    ));

    ServerContext {
        registry,
        fanout,
        typing,
        status,
        store,
        settings,
    }
}

/// Build the router: the WebSocket endpoint plus health and metrics.
///
/// The fanout core is purely a routing layer — there is no REST surface
/// beyond these operational endpoints.
pub fn build_router(ctx: ServerContext, metrics_handle: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health));

    if let Some(handle) = metrics_handle {
        router = router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { metrics::render(&handle) }
            }),
        );
    }

    router
        .with_state(ctx)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Run the server until the process is stopped.
pub async fn run(settings: RelaySettings) -> anyhow::Result<()> {
    init_tracing();

    let stores = SqliteStores::open(&settings.storage.db_path)?;
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let ctx = build_context(settings, &stores);

    let metrics_handle = metrics::install_recorder();
    let app = build_router(ctx, Some(metrics_handle));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "relay server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize tracing from `RUST_LOG`, defaulting to `info`. Safe to call
/// more than once (later calls are ignored).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<ServerContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::serve_socket(socket, ctx))
}

async fn health() -> &'static str {
    "OK"
}
