//! Memobin: a small note-sharing web application.
//!
//! Serves the HTML pages, a JSON status endpoint and the static assets.
//! Default: http://127.0.0.1:4000/

mod config;
mod db;
mod decoder;
mod errors;
mod forms;
mod middleware;
mod password;
mod render;
mod routes;
mod session;
mod templates;
mod validator;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;

use config::{Config, SessionBackend};
use routes::AppState;
use session::{MemorySessionStore, SessionStore, SqliteSessionStore};

const MAX_FORM_BYTES: usize = 4096;

/// The full router with its middleware chain. Layers run outermost first:
/// request logging, panic recovery, security headers, sessions, body limit.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::home))
        .route("/memo/view/:id", get(routes::memo_view))
        .route(
            "/memo/create",
            get(routes::memo_create).post(routes::memo_create_post),
        )
        .route(
            "/user/signup",
            get(routes::user_signup).post(routes::user_signup_post),
        )
        .route(
            "/user/login",
            get(routes::user_login).post(routes::user_login_post),
        )
        .route("/user/logout", post(routes::user_logout_post))
        .route("/status", get(routes::status))
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .fallback(middleware::not_found)
        .layer(DefaultBodyLimit::max(MAX_FORM_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::load_session,
        ))
        .layer(axum::middleware::from_fn(middleware::common_headers))
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::log_request,
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    if config.debug {
        log::warn!("Debug mode is on: server error details are sent to clients");
    }

    log::info!("Opening database at: {}", config.db_path);
    let database = Arc::new(db::Db::open(&config.db_path).expect("Failed to open database"));

    log::info!("Loading templates from: {}", config.template_dir.display());
    let templates =
        templates::TemplateSet::load(&config.template_dir).expect("Failed to load templates");
    log::info!(
        "Loaded page templates: {}",
        templates.page_names().collect::<Vec<_>>().join(", ")
    );

    let lifetime = chrono::Duration::hours(config.session_lifetime_hours);
    let sessions: Arc<dyn SessionStore> = match config.session_backend {
        SessionBackend::Memory => Arc::new(MemorySessionStore::new(lifetime)),
        SessionBackend::Sqlite => Arc::new(SqliteSessionStore::new(database.clone(), lifetime)),
    };
    log::info!("Session store: {:?}", config.session_backend);

    let forms = forms::FormDecoders::new().expect("Invalid form decoder mapping");

    // Periodic sweep of expired sessions
    let sweeper = sessions.clone();
    let sweep_every = Duration::from_secs(config.session_sweep_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            match sweeper.purge_expired() {
                Ok(0) => {}
                Ok(n) => log::debug!("Purged {} expired sessions", n),
                Err(e) => log::warn!("Session sweep failed: {}", e),
            }
        }
    });

    let addr = config.addr.clone();
    let state = Arc::new(AppState {
        config,
        db: database,
        templates,
        sessions,
        forms,
        start_time: Instant::now(),
    });

    let app = app(state);

    log::info!("Memobin listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
