//! Login flows against the login app served in-process

mod support;

use serde_json::json;
use sessionkit_e2e::Page;
use sessionkit_harness::{
    Credentials, HarnessError, LoginEncoding, OutboundRequest, StubResponse, StubRule,
};
use sessionkit_web::LoginMode;
use support::{TestApp, SHORT};

const SESSION_COOKIE: &str = "cypress-session-cookie";

#[tokio::test]
async fn test_authenticate_with_valid_credentials() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("authenticate");

    let token = ctx.authenticate(&Credentials::default()).await.unwrap();

    assert!(!token.value().is_empty());
    assert_eq!(ctx.cookie(SESSION_COOKIE).as_deref(), Some(token.value()));
    assert_eq!(ctx.session_token(), Some(token));
}

#[tokio::test]
async fn test_authenticate_json_login() {
    let app = TestApp::start(LoginMode::Xhr).await;
    let ctx = app.scenario("authenticate-json");

    ctx.authenticate(&Credentials::default().encoding(LoginEncoding::Json))
        .await
        .unwrap();

    let resp = ctx.request(OutboundRequest::get("/admin")).await.unwrap();
    assert!(resp.body.contains("<h2>admin.html</h2>"));
}

#[tokio::test]
async fn test_authenticate_with_invalid_credentials() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("authenticate-invalid");

    match ctx.authenticate(&Credentials::new("foo", "bar")).await {
        Err(HarnessError::Auth { status, body, .. }) => {
            assert_eq!(status, 401);
            assert!(body.contains("Username and password incorrect"));
        }
        other => panic!("expected Auth error, got {:?}", other),
    }
    assert!(ctx.session_token().is_none());
    assert!(ctx.cookie(SESSION_COOKIE).is_none());
}

#[tokio::test]
async fn test_stubbed_login_failure_shows_error() {
    let app = TestApp::start(LoginMode::Xhr).await;
    let ctx = app.scenario("xhr-stubbed-503");
    ctx.authenticate(&Credentials::default().encoding(LoginEncoding::Json))
        .await
        .unwrap();

    let page = Page::new(ctx.clone());
    page.visit("/login").await.unwrap();

    let post_login = ctx.register_stub(
        StubRule::route("POST", "/login")
            .unwrap()
            .respond(StubResponse::new(503).json(json!({})))
            .alias("postLogin"),
    );

    page.type_into("username", "foo").await.unwrap();
    page.type_into("password", "bar{enter}").await.unwrap();

    let exchange = ctx.wait_for(&post_login, SHORT).await.unwrap();
    assert_eq!(exchange.request_body, json!({"username": "foo", "password": "bar"}));
    assert_eq!(exchange.response_status, 503);
    assert!(exchange.stubbed);

    ctx.expect_eventually("error paragraph shows the 503", || {
        let shown = page.error_visible()
            && page.error_text().as_deref() == Some("An error occurred: 503 Service Unavailable");
        async move { shown }
    })
    .await
    .unwrap();

    assert!(page.url().contains("/login"));
    assert_eq!(ctx.exchanges(&post_login).unwrap().len(), 1);
}

#[tokio::test]
async fn test_xhr_login_shows_server_error() {
    let app = TestApp::start(LoginMode::Xhr).await;
    let ctx = app.scenario("xhr-invalid");
    let page = Page::new(ctx.clone());
    page.visit("/login").await.unwrap();
    let post_login = ctx.register_stub(StubRule::route("POST", "/login").unwrap().alias("postLogin"));

    page.type_into("username", "foo").await.unwrap();
    page.type_into("password", "bar{enter}").await.unwrap();

    let exchange = ctx.wait(&post_login).await.unwrap();
    assert_eq!(exchange.response_status, 401);
    assert!(!exchange.stubbed);

    ctx.expect_eventually("error paragraph visible", || {
        let shown = page.error_visible()
            && page
                .error_text()
                .unwrap_or_default()
                .contains("Username and password incorrect");
        async move { shown }
    })
    .await
    .unwrap();
    assert!(page.url().contains("/login"));
}

#[tokio::test]
async fn test_xhr_login_redirects_to_dashboard() {
    let app = TestApp::start(LoginMode::Xhr).await;
    let ctx = app.scenario("xhr-success");
    let page = Page::new(ctx.clone());
    page.visit("/login").await.unwrap();

    page.type_into("username", "cypress").await.unwrap();
    page.type_into("password", "password123{enter}").await.unwrap();

    ctx.expect_eventually("on the dashboard", || {
        let there = page.url().contains("/dashboard");
        async move { there }
    })
    .await
    .unwrap();
    assert_eq!(page.text("h2").as_deref(), Some("dashboard.html"));
    assert!(page.cookie(SESSION_COOKIE).is_some());
}

#[tokio::test]
async fn test_stubbed_xhr_redirect_is_recorded() {
    let app = TestApp::start(LoginMode::Xhr).await;
    let ctx = app.scenario("xhr-stubbed-redirect");
    let page = Page::new(ctx.clone());
    page.visit("/login").await.unwrap();
    page.stub_redirect();

    let post_login = ctx.register_stub(
        StubRule::route("POST", "/login")
            .unwrap()
            .respond(StubResponse::new(200).json(json!({"redirect": "/foobarbaz"})))
            .alias("postLogin"),
    );

    page.type_into("username", "foo").await.unwrap();
    page.type_into("password", "bar{enter}").await.unwrap();
    ctx.wait(&post_login).await.unwrap();

    ctx.expect_eventually("redirect called", || {
        let called = !page.redirect_calls().is_empty();
        async move { called }
    })
    .await
    .unwrap();

    assert_eq!(page.redirect_calls(), vec!["/foobarbaz".to_string()]);
    assert!(!page.error_visible());
    assert!(page.url().contains("/login"));
}

#[tokio::test]
async fn test_html_form_shows_errors() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("html-invalid");
    let page = Page::new(ctx.clone());
    page.visit("/login").await.unwrap();

    page.type_into("username", "foo").await.unwrap();
    page.type_into("password", "bar{enter}").await.unwrap();

    assert!(page.error_visible());
    assert_eq!(page.error_text().as_deref(), Some("Username and password incorrect"));
    assert!(page.url().contains("/login"));
}

#[tokio::test]
async fn test_html_form_redirects_on_success() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("html-success");
    let page = Page::new(ctx.clone());
    page.visit("/login").await.unwrap();

    page.type_into("username", "cypress").await.unwrap();
    page.type_into("password", "password123{enter}").await.unwrap();

    assert!(page.url().contains("/dashboard"));
    assert!(page.cookie(SESSION_COOKIE).is_some());
}

#[tokio::test]
async fn test_unauthorized_visit_lands_on_unauthorized_page() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("unauthorized");
    let page = Page::new(ctx.clone());

    page.visit("/dashboard").await.unwrap();

    assert!(page
        .text("h3")
        .unwrap_or_default()
        .contains("You are not logged in and cannot access this page"));
    assert!(page.url().contains("unauthorized"));
}

#[tokio::test]
async fn test_redirect_target_without_following() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("redirect-target");

    let resp = ctx
        .request(OutboundRequest::get("/dashboard").follow_redirects(false))
        .await
        .unwrap();

    assert_eq!(resp.status, 302);
    assert_eq!(resp.redirected_to, Some(app.url("/unauthorized")));
}

#[tokio::test]
async fn test_authenticated_pages() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("authenticated-pages");
    ctx.authenticate(&Credentials::default()).await.unwrap();
    let page = Page::new(ctx.clone());

    page.visit("/dashboard").await.unwrap();
    assert_eq!(page.text("h2").as_deref(), Some("dashboard.html"));

    page.visit("/users").await.unwrap();
    assert_eq!(page.text("h2").as_deref(), Some("users.html"));

    let resp = ctx.request(OutboundRequest::get("/admin")).await.unwrap();
    assert!(resp.body.contains("<h2>admin.html</h2>"));
}

#[tokio::test]
async fn test_logout_drops_session() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("logout");
    ctx.authenticate(&Credentials::default()).await.unwrap();

    assert!(ctx.logout().is_some());

    let resp = ctx
        .request(OutboundRequest::get("/admin").follow_redirects(false))
        .await
        .unwrap();
    assert_eq!(resp.status, 302);
}

#[tokio::test]
async fn test_scenario_end_clears_session() {
    let app = TestApp::start(LoginMode::Html).await;
    let ctx = app.scenario("lifecycle");
    ctx.authenticate(&Credentials::default()).await.unwrap();
    ctx.register_stub(StubRule::route("GET", "/users").unwrap().alias("users"));
    ctx.request(OutboundRequest::get("/users")).await.unwrap();

    let report = app.harness.on_scenario_end(&ctx);
    assert!(report.authenticated);
    assert_eq!(report.exchanges.len(), 1);
    assert_eq!(report.exchanges[0].alias, "users");

    let next = app.scenario("next");
    assert!(next.session_token().is_none());
    let resp = next
        .request(OutboundRequest::get("/users").follow_redirects(false))
        .await
        .unwrap();
    assert_eq!(resp.status, 302);
}
