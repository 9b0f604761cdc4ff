//! Authentication
//!
//! - The gate in front of protected routes ([`must_auth`]), which redirects
//!   requests without a session cookie to the login page.
//! - The `/auth/{action}/{provider}` routes that run the login/callback
//!   exchange with an [`IdentityProvider`] and hand out the session cookie.
//!
//! Real OAuth providers live outside this crate; they plug in through the
//! trait. [`DevProvider`] is a stand-in for local use.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{info, warn};

use crate::error::AuthError;
use crate::session::{self, SessionRecord};

/// Where a completed login lands
pub const CHAT_PATH: &str = "/chat";

/// A user as vouched for by an identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub name: String,
    pub email: String,
    pub avatar_url: String,
}

/// External authenticator
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start signing in
    async fn begin_auth_url(&self) -> Result<String, AuthError>;

    /// Exchange the provider's callback query for a verified user
    async fn complete_auth(&self, query: &str) -> Result<VerifiedUser, AuthError>;
}

/// Identity providers by name
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `name`, replacing any previous one
    pub fn register(&mut self, name: &str, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(name.to_lowercase(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn IdentityProvider>, AuthError> {
        self.providers
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(name.to_string()))
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Find the session token among the request's cookies
///
/// `Ok(None)` means no (or an empty) session cookie. An unreadable `Cookie`
/// header is an error, not an absent cookie.
pub fn session_cookie<'a>(
    headers: &'a HeaderMap,
    cookie_name: &str,
) -> Result<Option<&'a str>, AuthError> {
    for value in headers.get_all(COOKIE) {
        let header = value.to_str().map_err(|_| AuthError::MalformedCookie)?;
        if let Some(token) = token_from_cookie_header(header, cookie_name) {
            if !token.is_empty() {
                return Ok(Some(token));
            }
        }
    }
    Ok(None)
}

/// Settings for [`must_auth`]
#[derive(Debug, Clone)]
pub struct SessionGate {
    cookie_name: String,
    login_path: String,
}

impl SessionGate {
    pub fn new(cookie_name: &str, login_path: &str) -> Self {
        Self {
            cookie_name: cookie_name.to_string(),
            login_path: login_path.to_string(),
        }
    }
}

/// Auth gate middleware
///
/// Runs the wrapped route only when the request carries a session cookie;
/// otherwise redirects to the login page. The route gets the request
/// unchanged.
pub async fn must_auth(State(gate): State<SessionGate>, req: Request, next: Next) -> Response {
    let present = session_cookie(req.headers(), &gate.cookie_name).map(|token| token.is_some());
    match present {
        Ok(true) => next.run(req).await,
        Ok(false) => Redirect::temporary(&gate.login_path).into_response(),
        Err(e) => {
            warn!("Rejected request to {}: {}", req.uri().path(), e);
            (StatusCode::BAD_REQUEST, "malformed credentials").into_response()
        }
    }
}

/// Handlers for `/auth/{action}/{provider}` and `/logout`
pub struct AuthRoutes {
    providers: ProviderRegistry,
    cookie_name: String,
}

impl AuthRoutes {
    pub fn new(providers: ProviderRegistry, cookie_name: &str) -> Self {
        Self {
            providers,
            cookie_name: cookie_name.to_string(),
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Dispatch an `/auth/{action}/{provider}` request
    pub async fn handle(&self, action: &str, provider: &str, query: Option<&str>) -> Response {
        match action {
            "login" => self.login(provider).await,
            "callback" => self.callback(provider, query.unwrap_or("")).await,
            other => (
                StatusCode::NOT_FOUND,
                format!("auth action {} is not supported", other),
            )
                .into_response(),
        }
    }

    async fn login(&self, provider_name: &str) -> Response {
        let provider = match self.providers.get(provider_name) {
            Ok(p) => p,
            Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        };
        match provider.begin_auth_url().await {
            Ok(url) => Redirect::temporary(&url).into_response(),
            Err(e) => {
                warn!("Login with {} failed: {}", provider_name, e);
                (StatusCode::BAD_GATEWAY, "could not start sign-in").into_response()
            }
        }
    }

    async fn callback(&self, provider_name: &str, query: &str) -> Response {
        let provider = match self.providers.get(provider_name) {
            Ok(p) => p,
            Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        };
        let user = match provider.complete_auth(query).await {
            Ok(user) => user,
            Err(e) => {
                warn!("Callback from {} failed: {}", provider_name, e);
                return (StatusCode::BAD_GATEWAY, "could not complete sign-in").into_response();
            }
        };

        let record = SessionRecord::new(&user.name, &user.email, &user.avatar_url);
        let token = match session::encode(&record) {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not encode session for {}: {}", user.name, e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "could not create session")
                    .into_response();
            }
        };

        info!("{} signed in with {}", user.name, provider_name);
        let cookie = format!("{}={}; Path=/", self.cookie_name, token);
        ([(SET_COOKIE, cookie)], Redirect::temporary(CHAT_PATH)).into_response()
    }

    /// Clear the session cookie
    pub fn logout(&self) -> Response {
        let cookie = format!("{}=; Path=/; Max-Age=0", self.cookie_name);
        ([(SET_COOKIE, cookie)], Redirect::temporary(CHAT_PATH)).into_response()
    }
}

/// Look up a parameter in a URL query string
pub fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k != key {
            return None;
        }
        urlencoding::decode(&v.replace('+', " "))
            .ok()
            .map(|v| v.into_owned())
    })
}

/// Development identity provider
///
/// Trusts whatever `name` and `email` arrive on the callback. Its sign-in
/// step is the form on the login page.
#[derive(Debug, Clone)]
pub struct DevProvider {
    login_path: String,
}

impl DevProvider {
    pub fn new(login_path: &str) -> Self {
        Self {
            login_path: login_path.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for DevProvider {
    async fn begin_auth_url(&self) -> Result<String, AuthError> {
        Ok(format!("{}#dev", self.login_path))
    }

    async fn complete_auth(&self, query: &str) -> Result<VerifiedUser, AuthError> {
        let name = query_param(query, "name")
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AuthError::Provider {
                provider: "dev".to_string(),
                reason: "missing name".to_string(),
            })?;
        let email = query_param(query, "email").unwrap_or_default();
        Ok(VerifiedUser {
            name,
            email,
            avatar_url: String::new(),
        })
    }
}
