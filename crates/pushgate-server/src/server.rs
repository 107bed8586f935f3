//! Gateway assembly: HTTP routes, the broker consumer, and shutdown.
//!
//! Owns the connection registry and hands the same `Arc` to the session
//! handler (through [`AppState`]) and to the dispatcher.

use crate::auth::{Authenticator, IdentityClient};
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::routing::{BrokerConsumer, Dispatcher};
use crate::session::handler::ws_handler;
use crate::session::SessionSettings;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use pushgate_core::GatewayResult;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// State shared by every HTTP handler.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub authenticator: Authenticator,
    pub settings: SessionSettings,
    /// Root token; sessions derive their close signal from it.
    pub shutdown: CancellationToken,
}

/// `/ws` for clients, `/health` for probes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.session_count().await,
        "users": state.registry.user_count().await,
    }))
}

/// The gateway instance.
pub struct GatewayServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl GatewayServer {
    pub fn new(config: ServerConfig) -> GatewayResult<Self> {
        let identity = IdentityClient::new(
            config.identity.url.clone(),
            config.identity.token.clone(),
            config.identity.timeout(),
        )?;
        let authenticator = Authenticator::new(identity, config.origin_policy);

        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let shutdown = CancellationToken::new();

        let state = Arc::new(AppState {
            registry: registry.clone(),
            authenticator,
            settings: SessionSettings {
                keepalive: config.keepalive,
                outbound_buffer: config.outbound_buffer,
            },
            shutdown: shutdown.clone(),
        });

        Ok(Self {
            config,
            registry,
            dispatcher,
            state,
            shutdown,
        })
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Cancelling this token stops the server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn run(self) -> GatewayResult<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener) -> GatewayResult<()> {
        let local = listener.local_addr()?;
        info!(
            addr = %local,
            origin_policy = ?self.config.origin_policy,
            keepalive_secs = self.config.keepalive.as_secs(),
            "gateway listening"
        );

        let consumer = BrokerConsumer::new(self.config.broker.clone(), self.dispatcher.clone());
        let consumer_task = tokio::spawn(consumer.run(self.shutdown.clone()));

        let app = router(self.state.clone());
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
        .await;

        // Either a signal or a serve error: take everything down.
        self.shutdown.cancel();
        if let Err(e) = consumer_task.await {
            warn!(error = %e, "broker consumer task failed");
        }
        let sessions = self.registry.session_count().await;
        info!(sessions, "gateway stopped");

        result.map_err(Into::into)
    }
}
