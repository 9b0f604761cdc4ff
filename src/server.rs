//! Chat server
//!
//! Owns the room and serves HTTP: the login flow, the chat page and the
//! `/room` endpoint where authenticated browsers upgrade to WebSocket.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, RawQuery, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::{self, AuthRoutes, DevProvider, ProviderRegistry, SessionGate};
use crate::avatar::AvatarResolver;
use crate::config::ServerConfig;
use crate::error::{AppError, SessionError};
use crate::handler::serve_client;
use crate::room::{Room, RoomHandle};
use crate::session::{self, Identity};
use crate::trace::{LogTracer, Off, Tracer};

const CHAT_PAGE: &str = include_str!("../templates/chat.html");
const LOGIN_PAGE: &str = include_str!("../templates/login.html");

/// Everything a request handler needs
struct AppState {
    config: ServerConfig,
    room: RoomHandle,
    auth: AuthRoutes,
    avatar: Box<dyn AvatarResolver>,
}

/// The chat server
///
/// Starts the room on construction, so it must be created inside a Tokio
/// runtime and before any connection is accepted.
pub struct ChatServer {
    state: Arc<AppState>,
    room_task: JoinHandle<()>,
}

impl ChatServer {
    /// Create a server with the given configuration and identity providers
    ///
    /// Room events go to the log when `config.trace` is set.
    pub fn new(config: ServerConfig, providers: ProviderRegistry) -> Self {
        let tracer: Box<dyn Tracer> = if config.trace {
            Box::new(LogTracer)
        } else {
            Box::new(Off)
        };
        Self::with_tracer(config, providers, tracer)
    }

    /// Create a server whose room reports to `tracer`
    pub fn with_tracer(
        config: ServerConfig,
        mut providers: ProviderRegistry,
        tracer: Box<dyn Tracer>,
    ) -> Self {
        if config.dev_auth {
            providers.register("dev", Arc::new(DevProvider::new(&config.login_path)));
        }

        let (room, room_task) = Room::new(tracer).start(config.command_capacity);

        let state = AppState {
            auth: AuthRoutes::new(providers, &config.cookie_name),
            avatar: config.avatar.resolver(),
            room,
            config,
        };

        Self {
            state: Arc::new(state),
            room_task,
        }
    }

    /// Handle to the room, e.g. for server-side announcements
    pub fn room(&self) -> &RoomHandle {
        &self.state.room
    }

    /// All routes, ready to be served
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve forever
    pub async fn run(&self) -> Result<(), AppError> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        info!("Chat server listening on {}", self.state.config.bind_addr);
        self.serve(listener).await
    }

    /// Bind and serve until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_room_running()?;
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        info!("Chat server listening on {}", self.state.config.bind_addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutdown signal received");
            })
            .await?;
        Ok(())
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AppError> {
        self.ensure_room_running()?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    fn ensure_room_running(&self) -> Result<(), AppError> {
        if self.room_task.is_finished() {
            return Err(AppError::RoomClosed);
        }
        Ok(())
    }
}

fn router(state: Arc<AppState>) -> Router {
    let gate = SessionGate::new(&state.config.cookie_name, &state.config.login_path);

    let protected = Router::new()
        .route(auth::CHAT_PATH, get(chat))
        .route("/room", get(room_socket))
        .route_layer(middleware::from_fn_with_state(gate, auth::must_auth));

    Router::new()
        .route("/", get(|| async { Redirect::temporary(auth::CHAT_PATH) }))
        .route(&state.config.login_path, get(login))
        .route("/logout", get(logout))
        .route("/auth/{action}/{provider}", get(auth_action))
        .route("/auth/{action}", get(auth_incomplete))
        .merge(protected)
        .fallback(not_found)
        .with_state(state)
}

async fn chat() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn login(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(login_page(state.auth.providers()))
}

async fn logout(State(state): State<Arc<AppState>>) -> Response {
    state.auth.logout()
}

async fn auth_action(
    State(state): State<Arc<AppState>>,
    Path((action, provider)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    state.auth.handle(&action, &provider, query.as_deref()).await
}

async fn auth_incomplete() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "expected /auth/{action}/{provider}")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

fn login_page(providers: &ProviderRegistry) -> String {
    let links: String = providers
        .names()
        .iter()
        .filter(|name| **name != "dev")
        .map(|name| format!("<li><a href=\"/auth/login/{0}\">{0}</a></li>\n", name))
        .collect();
    let dev_form = if providers.get("dev").is_ok() {
        "block"
    } else {
        "none"
    };
    LOGIN_PAGE
        .replace("{{providers}}", &links)
        .replace("{{dev_display}}", dev_form)
}

/// Admission handler
///
/// `WebSocketUpgrade` has already refused anything that is not a valid
/// upgrade. The session is checked before answering 101, so a bad one is
/// refused without touching the room. The connection itself is served on
/// a new task once the upgrade completes.
async fn room_socket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match identify(&state, &headers) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected connection: {}", e);
            let status = match e {
                AppError::Avatar(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
            return (status, "invalid session").into_response();
        }
    };

    let room = state.room.clone();
    let queue_capacity = state.config.queue_capacity;

    ws.read_buffer_size(state.config.read_buffer_size)
        .write_buffer_size(state.config.write_buffer_size)
        .on_upgrade(move |socket| async move {
            if let Err(e) = serve_client(socket, identity, room, queue_capacity).await {
                warn!("Connection handler error: {}", e);
            }
        })
}

/// Decode the session cookie and resolve the avatar
fn identify(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    let token = auth::session_cookie(headers, &state.config.cookie_name)?
        .ok_or(AppError::Session(SessionError::EmptyField("token")))?;
    let identity = session::decode_identity(token)?;
    let avatar_url = state.avatar.avatar_url(&identity)?;
    Ok(identity.with_avatar_url(avatar_url))
}
