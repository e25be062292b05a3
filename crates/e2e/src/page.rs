//! Headless driver for the login app's pages
//!
//! Keeps what a browser would show after each navigation: headings, the
//! `p.error` paragraph and the login form. Form submissions go through the
//! scenario pipeline, so stub rules and waits see them like any other call.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use sessionkit_harness::{HttpResponse, OutboundRequest, ScenarioContext};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::spec::AppMode;

const LOGIN_FIELDS: [&str; 2] = ["username", "password"];

static ERROR_PARAGRAPH: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.error").expect("valid error selector"));

static HEADING: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid heading selector"));

static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("valid form selector"));

/// Snapshot of one element of a rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
    pub hidden: bool,
    pub text: String,
}

impl Element {
    fn from_ref(element: ElementRef<'_>) -> Self {
        let text = element.text().collect::<String>();
        Self {
            tag: element.value().name().to_string(),
            classes: element.value().classes().map(str::to_string).collect(),
            hidden: element.value().attr("hidden").is_some(),
            text: text.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    /// Empty paragraphs take no space on the page
    pub fn is_visible(&self) -> bool {
        !self.hidden && !self.text.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: String,
    pub mode: AppMode,
}

/// What a page currently shows: the loaded markup plus what the login
/// script has written into `p.error` since
#[derive(Debug, Clone, Default)]
pub struct Document {
    source: String,
    shown_error: Option<String>,
}

impl Document {
    pub fn from_html(html: &str) -> Self {
        Self {
            source: html.to_string(),
            shown_error: None,
        }
    }

    /// First element matching a CSS selector; `None` for unknown or invalid selectors
    pub fn element(&self, css: &str) -> Option<Element> {
        let selector = match Selector::parse(css) {
            Ok(selector) => selector,
            Err(e) => {
                warn!("invalid selector '{}': {:?}", css, e);
                return None;
            }
        };
        self.first(&selector)
    }

    pub fn heading(&self) -> Option<Element> {
        self.first(&HEADING)
    }

    pub fn form(&self) -> Option<LoginForm> {
        let html = Html::parse_document(&self.source);
        let form = html.select(&FORM).next()?;
        let action = form
            .value()
            .attr("action")
            .filter(|a| !a.is_empty())
            .unwrap_or("/login")
            .to_string();
        let mode = match form.value().attr("data-login-mode") {
            Some("xhr") => AppMode::Xhr,
            _ => AppMode::Html,
        };
        Some(LoginForm { action, mode })
    }

    fn first(&self, selector: &Selector) -> Option<Element> {
        let html = Html::parse_document(&self.source);
        let found = html.select(selector).next()?;
        let mut element = Element::from_ref(found);
        if let Some(message) = &self.shown_error {
            if ERROR_PARAGRAPH.matches(&found) {
                element.text = message.clone();
                element.hidden = false;
            }
        }
        Some(element)
    }

    /// What the login script does with an error message
    fn show_error(&mut self, message: &str) {
        let html = Html::parse_document(&self.source);
        if html.select(&ERROR_PARAGRAPH).next().is_none() {
            self.source.push_str("<p class=\"error\"></p>");
        }
        self.shown_error = Some(message.to_string());
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    document: Document,
    fields: BTreeMap<String, String>,
    redirect_stubbed: bool,
    redirect_calls: Vec<String>,
}

/// Handle to the page of one scenario. Cloning shares the same page.
#[derive(Clone)]
pub struct Page {
    ctx: ScenarioContext,
    state: Arc<Mutex<PageState>>,
}

impl Page {
    pub fn new(ctx: ScenarioContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(PageState::default())),
        }
    }

    pub fn context(&self) -> &ScenarioContext {
        &self.ctx
    }

    /// Navigate to `url`, following redirects like a browser
    pub async fn visit(&self, url: &str) -> E2eResult<HttpResponse> {
        let response = self.ctx.request(OutboundRequest::get(url)).await?;
        self.load(&response);
        Ok(response)
    }

    fn load(&self, response: &HttpResponse) {
        debug!("page loaded {} ({})", response.url, response.status);
        let mut state = self.state.lock();
        state.url = response.url.clone();
        state.document = Document::from_html(&response.body);
        state.fields.clear();
        state.redirect_stubbed = false;
        state.redirect_calls.clear();
    }

    /// Type into a login form field. A trailing `{enter}` submits the form.
    pub async fn type_into(&self, field: &str, text: &str) -> E2eResult<()> {
        let (text, enter) = match text.strip_suffix("{enter}") {
            Some(text) => (text, true),
            None => (text, false),
        };

        {
            let mut state = self.state.lock();
            if state.document.form().is_none() || !LOGIN_FIELDS.contains(&field) {
                return Err(E2eError::ElementNotFound(format!("input[name={}]", field)));
            }
            state.fields.entry(field.to_string()).or_default().push_str(text);
        }

        if enter {
            self.submit().await?;
        }
        Ok(())
    }

    /// Submit the login form.
    ///
    /// A regular form posts and follows the redirect before returning. The XHR
    /// form returns at once; its request completes in the background and the
    /// page changes when the answer arrives.
    pub async fn submit(&self) -> E2eResult<()> {
        let (form, username, password) = {
            let state = self.state.lock();
            let form = state
                .document
                .form()
                .ok_or_else(|| E2eError::ElementNotFound("form".to_string()))?;
            let field = |name: &str| state.fields.get(name).cloned().unwrap_or_default();
            (form, field("username"), field("password"))
        };

        match form.mode {
            AppMode::Html => {
                let request = OutboundRequest::post(&form.action)
                    .form([("username", username), ("password", password)]);
                let response = self.ctx.request(request).await?;
                self.load(&response);
            }
            AppMode::Xhr => {
                let request = OutboundRequest::post(&form.action).json(json!({
                    "username": username,
                    "password": password,
                }));
                let page = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = page.complete_xhr(request).await {
                        warn!("login XHR failed: {}", e);
                    }
                });
            }
        }
        Ok(())
    }

    async fn complete_xhr(&self, request: OutboundRequest) -> E2eResult<()> {
        let response = self.ctx.request(request).await?;
        let data: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);

        if response.is_success() {
            if let Some(target) = data.get("redirect").and_then(Value::as_str) {
                return self.redirect(target).await;
            }
        }

        let message = match data.get("error").and_then(Value::as_str) {
            Some(error) => error.to_string(),
            None => format!("An error occurred: {}", response.status_line()),
        };
        debug!("login page shows '{}'", message);
        self.state.lock().document.show_error(&message);
        Ok(())
    }

    /// The page script's redirect; only recorded once stubbed
    pub async fn redirect(&self, target: &str) -> E2eResult<()> {
        {
            let mut state = self.state.lock();
            if state.redirect_stubbed {
                state.redirect_calls.push(target.to_string());
                return Ok(());
            }
        }
        self.visit(target).await.map(|_| ())
    }

    /// Record redirect calls instead of navigating, until the next page load
    pub fn stub_redirect(&self) {
        self.state.lock().redirect_stubbed = true;
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn text(&self, selector: &str) -> Option<String> {
        self.state
            .lock()
            .document
            .element(selector)
            .map(|e| e.text)
    }

    pub fn is_visible(&self, selector: &str) -> bool {
        self.state
            .lock()
            .document
            .element(selector)
            .map(|e| e.is_visible())
            .unwrap_or(false)
    }

    pub fn heading(&self) -> Option<String> {
        self.state.lock().document.heading().map(|e| e.text)
    }

    pub fn error_text(&self) -> Option<String> {
        self.text("p.error")
    }

    pub fn error_visible(&self) -> bool {
        self.is_visible("p.error")
    }

    pub fn mode(&self) -> Option<AppMode> {
        self.state.lock().document.form().map(|f| f.mode)
    }

    pub fn redirect_calls(&self) -> Vec<String> {
        self.state.lock().redirect_calls.clone()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.ctx.cookie(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionkit_web::{pages, LoginMode};

    #[test]
    fn test_parse_xhr_login_page() {
        let doc = Document::from_html(&pages::login(LoginMode::Xhr, None));
        assert_eq!(
            doc.form(),
            Some(LoginForm {
                action: "/login".to_string(),
                mode: AppMode::Xhr,
            })
        );
        let error = doc.element("p.error").unwrap();
        assert!(error.hidden);
        assert!(!error.is_visible());
        assert_eq!(doc.heading().map(|h| h.text), Some("Login".to_string()));
    }

    #[test]
    fn test_parse_html_login_error() {
        let doc = Document::from_html(&pages::login(LoginMode::Html, Some(pages::INVALID_CREDENTIALS)));
        assert_eq!(doc.form().map(|f| f.mode), Some(AppMode::Html));
        let error = doc.element("p.error").unwrap();
        assert!(error.is_visible());
        assert_eq!(error.text, "Username and password incorrect");
    }

    #[test]
    fn test_parse_protected_and_unauthorized_pages() {
        let doc = Document::from_html(&pages::protected("users"));
        assert_eq!(doc.element("h2").map(|e| e.text), Some("users.html".to_string()));
        assert!(doc.form().is_none());

        let doc = Document::from_html(&pages::unauthorized());
        assert_eq!(doc.element("h3").map(|e| e.text), Some(pages::UNAUTHORIZED.to_string()));
    }

    #[test]
    fn test_text_drops_markup_and_decodes_entities() {
        let doc = Document::from_html(
            "<p class=\"error\">Bad <b>login</b> &#39;x&#39; &amp; more</p><p class='notice error'>y</p>",
        );
        assert_eq!(doc.element("p.error").unwrap().text, "Bad login 'x' & more");
        let notice = doc.element("p.notice").unwrap();
        assert!(notice.classes.iter().any(|c| c == "error"));
        assert_eq!(notice.text, "y");
    }

    #[test]
    fn test_show_error_reveals_paragraph() {
        let mut doc = Document::from_html(&pages::login(LoginMode::Xhr, None));
        doc.show_error("An error occurred: 503 Service Unavailable");
        let error = doc.element("p.error").unwrap();
        assert!(error.is_visible());
        assert_eq!(error.text, "An error occurred: 503 Service Unavailable");
        assert_eq!(doc.heading().map(|h| h.text), Some("Login".to_string()));
    }

    #[test]
    fn test_show_error_without_paragraph_adds_one() {
        let mut doc = Document::from_html("<h1>Login</h1><form action=\"/login\"></form>");
        assert!(doc.element("p.error").is_none());
        doc.show_error("boom");
        assert!(doc.element(".error").unwrap().is_visible());
    }

    #[test]
    fn test_selectors() {
        let doc = Document::from_html("<h2 class=\"title big\">Users</h2><p>x</p>");
        assert!(doc.element("h2.title").is_some());
        assert!(doc.element(".big").is_some());
        assert!(doc.element("p.notice").is_none());
        assert!(doc.element("p[").is_none());
    }
}
