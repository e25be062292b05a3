//! Login web server: form and JSON login, cookie sessions, protected pages

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::pages;

/// How the login page submits its form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoginMode {
    /// Regular HTML form post followed by a redirect
    #[default]
    Html,
    /// Script posts JSON and handles the answer in the page
    Xhr,
}

impl LoginMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMode::Html => "html",
            LoginMode::Xhr => "xhr",
        }
    }
}

impl FromStr for LoginMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" | "form" => Ok(LoginMode::Html),
            "xhr" | "json" => Ok(LoginMode::Xhr),
            other => Err(anyhow::anyhow!("unknown login mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebServerConfig {
    pub mode: LoginMode,
    pub username: String,
    pub password: String,
    pub session_cookie: String,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            mode: LoginMode::Html,
            username: "cypress".to_string(),
            password: "password123".to_string(),
            session_cookie: "cypress-session-cookie".to_string(),
        }
    }
}

impl WebServerConfig {
    /// Read `SESSIONKIT_WEB_MODE` and `SESSIONKIT_WEB_SESSION_COOKIE`
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Self::default();
        if let Ok(mode) = std::env::var("SESSIONKIT_WEB_MODE") {
            cfg.mode = mode.parse()?;
        }
        if let Ok(cookie) = std::env::var("SESSIONKIT_WEB_SESSION_COOKIE") {
            cfg.session_cookie = cookie;
        }
        Ok(cfg)
    }
}

struct WebServerState {
    cfg: WebServerConfig,
    sessions: RwLock<HashSet<String>>,
}

impl WebServerState {
    async fn session_valid(&self, headers: &HeaderMap) -> bool {
        match cookie_value(headers, &self.cfg.session_cookie) {
            Some(token) => self.sessions.read().await.contains(&token),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub struct WebServer {
    state: Arc<WebServerState>,
}

impl WebServer {
    pub fn new(cfg: WebServerConfig) -> Self {
        Self {
            state: Arc::new(WebServerState {
                cfg,
                sessions: RwLock::new(HashSet::new()),
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/login", get(login_page_handler).post(login_handler))
            .route("/dashboard", get(dashboard_handler))
            .route("/users", get(users_handler))
            .route("/admin", get(admin_handler))
            .route("/unauthorized", get(unauthorized_handler))
            .with_state(self.state.clone())
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve on an already bound listener (port 0 listeners in tests)
    pub async fn serve_listener(self, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            "Login app ({} mode) listening on http://{}",
            self.state.cfg.mode.as_str(),
            listener.local_addr()?
        );
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl Default for WebServer {
    fn default() -> Self {
        Self::new(WebServerConfig::default())
    }
}

pub async fn serve(addr: SocketAddr, cfg: WebServerConfig) -> anyhow::Result<()> {
    WebServer::new(cfg).serve(addr).await
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sessionkit-web"
    }))
}

async fn login_page_handler(State(state): State<Arc<WebServerState>>) -> Html<String> {
    Html(pages::login(state.cfg.mode, None))
}

async fn login_handler(
    State(state): State<Arc<WebServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let json = is_json(&headers);
    let parsed: Result<LoginForm, String> = if json {
        serde_json::from_slice(&body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_bytes(&body).map_err(|e| e.to_string())
    };
    let form = match parsed {
        Ok(form) => form,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("malformed login body: {}", e)})),
            )
                .into_response()
        }
    };

    if form.username != state.cfg.username || form.password != state.cfg.password {
        debug!("rejected login for '{}'", form.username);
        return if json {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": pages::INVALID_CREDENTIALS})),
            )
                .into_response()
        } else {
            (
                StatusCode::UNAUTHORIZED,
                Html(pages::login(state.cfg.mode, Some(pages::INVALID_CREDENTIALS))),
            )
                .into_response()
        };
    }

    let token = hex::encode(rand::random::<[u8; 16]>());
    state.sessions.write().await.insert(token.clone());
    let cookie = format!("{}={}; Path=/; HttpOnly", state.cfg.session_cookie, token);
    info!("session issued for '{}'", form.username);

    if json {
        (
            StatusCode::OK,
            [(header::SET_COOKIE, cookie)],
            Json(serde_json::json!({"redirect": "/dashboard"})),
        )
            .into_response()
    } else {
        (
            StatusCode::FOUND,
            [
                (header::SET_COOKIE, cookie),
                (header::LOCATION, "/dashboard".to_string()),
            ],
        )
            .into_response()
    }
}

async fn protected_page(state: &WebServerState, headers: &HeaderMap, page: &str) -> Response {
    if state.session_valid(headers).await {
        Html(pages::protected(page)).into_response()
    } else {
        (StatusCode::FOUND, [(header::LOCATION, "/unauthorized")]).into_response()
    }
}

async fn dashboard_handler(State(state): State<Arc<WebServerState>>, headers: HeaderMap) -> Response {
    protected_page(&state, &headers, "dashboard").await
}

async fn users_handler(State(state): State<Arc<WebServerState>>, headers: HeaderMap) -> Response {
    protected_page(&state, &headers, "users").await
}

async fn admin_handler(State(state): State<Arc<WebServerState>>, headers: HeaderMap) -> Response {
    protected_page(&state, &headers, "admin").await
}

async fn unauthorized_handler() -> Html<String> {
    Html(pages::unauthorized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn login_request(content_type: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header("content-type", content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn session_cookie(resp: &Response) -> String {
        let set_cookie = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_form_login_sets_cookie_and_redirects() {
        let app = WebServer::default().router();
        let resp = app
            .oneshot(login_request(
                "application/x-www-form-urlencoded",
                "username=cypress&password=password123",
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/dashboard");
        assert!(session_cookie(&resp).starts_with("cypress-session-cookie="));
    }

    #[tokio::test]
    async fn test_json_login_returns_redirect_body() {
        let app = WebServer::default().router();
        let resp = app
            .oneshot(login_request(
                "application/json",
                r#"{"username":"cypress","password":"password123"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(header::SET_COOKIE));
        assert_eq!(body_text(resp).await, r#"{"redirect":"/dashboard"}"#);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_rejected() {
        let app = WebServer::default().router();

        let resp = app
            .clone()
            .oneshot(login_request("application/json", r#"{"username":"foo","password":"bar"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(!resp.headers().contains_key(header::SET_COOKIE));
        assert!(body_text(resp).await.contains(pages::INVALID_CREDENTIALS));

        let resp = app
            .oneshot(login_request("application/x-www-form-urlencoded", "username=foo&password=bar"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(resp).await.contains("<p class=\"error\">Username and password incorrect</p>"));
    }

    #[tokio::test]
    async fn test_protected_pages_need_session() {
        let app = WebServer::default().router();

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/unauthorized");

        let login = app
            .clone()
            .oneshot(login_request(
                "application/x-www-form-urlencoded",
                "username=cypress&password=password123",
            ))
            .await
            .unwrap();
        let cookie = session_cookie(&login);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/admin")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("<h2>admin.html</h2>"));
    }

    #[tokio::test]
    async fn test_forged_cookie_is_not_a_session() {
        let app = WebServer::default().router();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/users")
                    .header(header::COOKIE, "cypress-session-cookie=forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
    }

    #[test]
    fn test_login_mode_parse() {
        assert_eq!("XHR".parse::<LoginMode>().unwrap(), LoginMode::Xhr);
        assert_eq!("form".parse::<LoginMode>().unwrap(), LoginMode::Html);
        assert!("soap".parse::<LoginMode>().is_err());
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "a=1; cypress-session-cookie=tok".parse().unwrap());
        assert_eq!(cookie_value(&headers, "cypress-session-cookie").as_deref(), Some("tok"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
