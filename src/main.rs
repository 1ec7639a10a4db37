//! Scribe Chat - AI assistant service for the Scribe notes dashboard
//!
//! Connects to the notes backend, keeps the active chat session and serves it
//! to the dashboard over a local HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scribe_chat::api::{BackendClient, HttpTransport};
use scribe_chat::config::Config;
use scribe_chat::core::mirror::{spawn_draft_autosave, LocalMirror, SqliteMirror, UNSAVED_KEY};
use scribe_chat::core::session::{ChatSession, SessionOptions, SessionPorts};
use scribe_chat::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribe_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let backend = &config.client.backend;

    let mut api = BackendClient::new(&backend.url, Duration::from_secs(backend.request_timeout_secs))?;
    if let Some(ref token) = config.backend_token {
        api = api.with_token(token.clone());
    } else if let (Some(user), Some(password)) = (&config.backend_username, &config.backend_password) {
        api.login(user, password).await?;
    }

    let stream_url = format!(
        "{}{}",
        backend.url.trim_end_matches('/'),
        backend.stream_path
    );
    let transport = HttpTransport::new(stream_url, api.token().map(String::from))?;

    let mirror: Arc<dyn LocalMirror> = Arc::new(SqliteMirror::new(&config.mirror_path()).await?);

    let mut tones = config.tone_registry();
    if let Some(ref dir) = config.tones_dir {
        match tones.load_dir(dir).await {
            Ok(count) => tracing::info!("Loaded {} tone(s) from {}", count, dir.display()),
            Err(e) => tracing::warn!("Failed to load tones from {}: {}", dir.display(), e),
        }
    }

    let ports = SessionPorts {
        api: Arc::new(api),
        transport: Arc::new(transport),
        mirror: mirror.clone(),
    };
    let mut session = ChatSession::new(ports, tones, SessionOptions::from(&config.client));
    if let Err(e) = session.refresh_catalog().await {
        tracing::warn!("Backend catalog unavailable, starting without models: {}", e);
    }
    session.new_chat(None).await?;

    let (drafts, draft_rx) = watch::channel((UNSAVED_KEY.to_string(), String::new()));
    let autosave = spawn_draft_autosave(
        mirror,
        draft_rx,
        Duration::from_secs(config.client.storage.autosave_secs),
    );

    let state = AppState::new(session, drafts);

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Scribe chat running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    autosave.abort();
    Ok(())
}
