//! Test utilities and common setup.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use serde_json::Value;
use tower::ServiceExt;

use paddock::api::state::DataPaths;
use paddock::api::{AppState, create_router};
use paddock::db::Database;
use paddock::user::AddEditUserRequest;

/// A fully wired application over an in-memory database and temp data dirs.
pub struct TestApp {
    pub router: Router,
    _data: tempfile::TempDir,
}

/// Create a test application with three seeded accounts:
/// admin / moderator / plain user, all with password "secret123".
pub async fn test_app() -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let data = tempfile::tempdir().unwrap();

    let state = AppState::new(
        &db,
        DataPaths {
            logs: data.path().join("logs"),
            instances: data.path().join("instances"),
        },
        Vec::new(),
    );

    for (login, admin, moderator) in [
        ("admin", true, false),
        ("moderator", false, true),
        ("user", false, false),
    ] {
        state
            .users
            .add_edit_user(AddEditUserRequest {
                id: 0,
                login: login.to_string(),
                email: format!("{login}@example.com"),
                pwd1: "secret123".to_string(),
                pwd2: "secret123".to_string(),
                admin,
                moderator,
            })
            .await
            .unwrap();
    }

    TestApp {
        router: create_router(state),
        _data: data,
    }
}

/// Build a request with an optional bearer token and JSON body.
pub fn request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).method(method);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Send a request through the router.
pub async fn send(app: &TestApp, req: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(req).await.unwrap()
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as raw bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

/// Log in and return the session token from the Set-Cookie header.
pub async fn login(app: &TestApp, login: &str) -> String {
    let response = send(
        app,
        request(
            Method::POST,
            "/auth/login",
            None,
            Some(serde_json::json!({ "login": login, "password": "secret123" })),
        ),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK, "login failed");

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|h| h.to_str().ok())
        .expect("login did not set a session cookie");

    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(_, token)| token.to_string())
        .expect("malformed session cookie")
}
