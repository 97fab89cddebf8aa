pub mod error;
pub mod poller;
pub mod routes;
pub mod signature;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use relbot_clients::{Clients, ShipItClient, SlackClient, TaskclusterClient};
use relbot_core::render::Renderer;
use relbot_core::{
    ChatTransport, CommandHandler, Config, Notifier, Reconciler, RedbReleaseStore,
    ReleaseRepository, ReleaseSource, TaskGraphSource,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub type LiveReconciler = Reconciler<ShipItClient, TaskclusterClient, RedbReleaseStore, SlackClient>;
pub type LiveHandler = CommandHandler<ShipItClient, TaskclusterClient, RedbReleaseStore>;

/// Everything the bot runs, wired against the real services.
pub struct Services {
    pub reconciler: Arc<LiveReconciler>,
    pub handler: Arc<LiveHandler>,
    pub notifier: Arc<Notifier<SlackClient>>,
}

impl Services {
    /// Build clients and open the release store at `config.db_path`.
    pub fn from_config(config: &Config) -> relbot_core::Result<Self> {
        let clients = Clients::from_config(config)?;
        let store = Arc::new(RedbReleaseStore::open(&config.db_path)?);
        let releases = Arc::new(clients.shipit);
        let graphs = Arc::new(clients.taskcluster);
        let slack = Arc::new(clients.slack);
        let renderer = Renderer::from_config(config);

        let reconciler = Reconciler::new(
            Arc::clone(&releases),
            Arc::clone(&graphs),
            Arc::clone(&store),
            Notifier::new(Arc::clone(&slack), renderer.clone(), &config.channel),
        );
        let handler = CommandHandler::new(
            releases,
            graphs,
            store,
            renderer.clone(),
            config.ignored_products.clone(),
        );
        Ok(Self {
            reconciler: Arc::new(reconciler),
            handler: Arc::new(handler),
            notifier: Arc::new(Notifier::new(slack, renderer, &config.channel)),
        })
    }

    /// A command handler for one-off queries. When a running bot holds the
    /// store, answers are built from upstream data with no tracked state.
    pub fn query_handler(config: &Config) -> relbot_core::Result<LiveHandler> {
        let store = match RedbReleaseStore::try_open(&config.db_path)? {
            Some(store) => store,
            None => {
                warn!(
                    db = %config.db_path.display(),
                    "release store in use, answering without tracked phases"
                );
                RedbReleaseStore::in_memory()?
            }
        };
        let clients = Clients::from_config(config)?;
        Ok(CommandHandler::new(
            Arc::new(clients.shipit),
            Arc::new(clients.taskcluster),
            Arc::new(store),
            Renderer::from_config(config),
            config.ignored_products.clone(),
        ))
    }
}

/// Build the axum Router with the Slack endpoint and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router<R, G, S, C>(state: AppState<R, G, S, C>) -> Router
where
    R: ReleaseSource + 'static,
    G: TaskGraphSource + 'static,
    S: ReleaseRepository + 'static,
    C: ChatTransport + 'static,
{
    Router::new()
        .route("/slack/events", post(routes::events::slack_events::<R, G, S, C>))
        .route("/healthz", get(routes::health::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the event endpoint and the periodic reconciliation task until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate_for_serve()?;
    let services = Services::from_config(&config)?;
    let secret = config.slack_signing_secret.clone().unwrap_or_default();
    let state = AppState::new(services.handler, services.notifier, secret);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        channel = %config.channel,
        every_secs = config.poll_interval_secs,
        "relbot listening"
    );

    let poller = poller::spawn(
        services.reconciler,
        Duration::from_secs(config.poll_interval_secs),
    );

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    poller.abort();
    Ok(())
}
