//! Request handlers.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::auth::{CurrentSession, RequireAdmin, RequireModerator, SESSION_COOKIE, session_from_headers};
use crate::configuration::AddEditConfigurationRequest;
use crate::instance::{Archive, StartInstanceRequest};
use crate::settings::SaveSettingsRequest;
use crate::user::{AddEditUserRequest, UserInfo};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

// ---------------------------------------------------------------------------
// Health

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Auth

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

/// POST /auth/login
///
/// Role flags are copied into the session here and never re-read; a later
/// role change on the user record does not touch open sessions.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Response> {
    let Some(user) = state.users.login(&request.login, &request.password).await? else {
        return Err(ApiError::not_found("User not found"));
    };

    let mut staged = state.sessions.new_session();
    staged.set_user_id(user.id);
    staged.set_admin(user.admin);
    staged.set_moderator(user.moderator);

    let token = staged.token().to_string();
    state
        .sessions
        .save(staged)
        .await
        .map_err(|err| ApiError::Persistence(err.to_string()))?;

    info!(user_id = user.id, "User logged in");

    let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "user_id": user.id })),
    )
        .into_response())
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session) = session_from_headers(&state.sessions, &headers).await {
        // A token that vanished underneath us is still a successful logout
        let _ = state.sessions.destroy(&session.token).await;
        info!(user_id = session.user_id(), "User logged out");
    }

    let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Logged out" })),
    )
        .into_response()
}

/// GET /auth/session
pub async fn check_session(session: CurrentSession) -> Json<serde_json::Value> {
    Json(json!({ "user_id": session.user_id() }))
}

// ---------------------------------------------------------------------------
// Users

/// GET /users
///
/// Readable by any active session, but email addresses are blanked unless
/// the caller is an administrator.
pub async fn get_all_users(
    session: CurrentSession,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<UserInfo>>> {
    let users = state.users.get_all_users().await?;

    let infos = users
        .into_iter()
        .map(UserInfo::from)
        .map(|info| {
            if session.is_admin() {
                info
            } else {
                info.redacted()
            }
        })
        .collect();

    Ok(Json(infos))
}

/// GET /users/{id}
///
/// Readable by any active session; the email is blanked unless the caller
/// is an administrator.
pub async fn get_user(
    session: CurrentSession,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserInfo>> {
    let user = state
        .users
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User not found: {id}")))?;

    let info = UserInfo::from(user);
    Ok(Json(if session.is_admin() {
        info
    } else {
        info.redacted()
    }))
}

/// POST /users
pub async fn add_edit_user(
    RequireAdmin(_session): RequireAdmin,
    State(state): State<AppState>,
    Json(request): Json<AddEditUserRequest>,
) -> ApiResult<Json<UserInfo>> {
    let user = state.users.add_edit_user(request).await?;
    Ok(Json(UserInfo::from(user)))
}

/// DELETE /users/{id}
pub async fn remove_user(
    RequireAdmin(session): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    if session.user_id() == id {
        return Err(ApiError::validation("You cannot remove your own account."));
    }

    state.users.remove_user(id).await?;
    Ok(Json(json!({ "message": "User removed" })))
}

// ---------------------------------------------------------------------------
// Configurations

/// GET /configurations
pub async fn get_all_configurations(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<crate::configuration::Configuration>>> {
    Ok(Json(state.configurations.get_all_configurations().await?))
}

/// GET /configurations/{id}
pub async fn get_configuration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<crate::configuration::Configuration>> {
    let config = state
        .configurations
        .get_configuration(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Configuration not found: {id}")))?;
    Ok(Json(config))
}

/// POST /configurations
pub async fn add_edit_configuration(
    RequireModerator(_session): RequireModerator,
    State(state): State<AppState>,
    Json(request): Json<AddEditConfigurationRequest>,
) -> ApiResult<Json<crate::configuration::Configuration>> {
    Ok(Json(state.configurations.add_edit_configuration(request).await?))
}

/// DELETE /configurations/{id}
pub async fn remove_configuration(
    RequireModerator(_session): RequireModerator,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.configurations.remove_configuration(id).await?;
    Ok(Json(json!({ "message": "Configuration removed" })))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// `config` (default) for definition files, `instance` for the most
    /// recent instance's runtime files.
    #[serde(default)]
    pub kind: Option<String>,
}

/// GET /configurations/{id}/download
pub async fn download_configuration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let config = state
        .configurations
        .get_configuration(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Configuration not found: {id}")))?;

    let archive = match query.kind.as_deref().unwrap_or("config") {
        "config" => state.archiver.zip_configuration(&config).await?,
        "instance" => state.archiver.zip_instance_files(&config).await?,
        other => {
            return Err(ApiError::validation(format!(
                "Invalid download kind: {other}"
            )));
        }
    };

    Ok(archive_response(archive))
}

/// GET /tracks
pub async fn get_available_tracks(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<String>>> {
    let settings = state.settings.get_settings().await?;
    let tracks = state
        .configurations
        .get_available_tracks(std::path::Path::new(&settings.folder))
        .await?;
    Ok(Json(tracks))
}

/// GET /cars
pub async fn get_available_cars(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let settings = state.settings.get_settings().await?;
    let cars = state
        .configurations
        .get_available_cars(std::path::Path::new(&settings.folder))
        .await?;
    Ok(Json(cars))
}

// ---------------------------------------------------------------------------
// Settings

/// GET /settings
pub async fn get_settings(
    RequireAdmin(_session): RequireAdmin,
    State(state): State<AppState>,
) -> ApiResult<Json<crate::settings::Settings>> {
    Ok(Json(state.settings.get_settings().await?))
}

/// PUT /settings
pub async fn save_settings(
    RequireAdmin(_session): RequireAdmin,
    State(state): State<AppState>,
    Json(request): Json<SaveSettingsRequest>,
) -> ApiResult<Json<crate::settings::Settings>> {
    Ok(Json(state.settings.save_settings(request).await?))
}

// ---------------------------------------------------------------------------
// Instances

/// GET /instances
pub async fn get_all_instances(
    State(state): State<AppState>,
) -> Json<Vec<crate::instance::Instance>> {
    Json(state.manager.get_all_instances())
}

/// POST /instances/start
pub async fn start_instance(
    RequireModerator(_session): RequireModerator,
    State(state): State<AppState>,
    Json(request): Json<StartInstanceRequest>,
) -> ApiResult<Json<crate::instance::Instance>> {
    if request.configuration_id <= 0 {
        return Err(ApiError::validation("A configuration id is required."));
    }

    Ok(Json(state.manager.start_instance(request).await?))
}

/// POST /instances/{pid}/stop
pub async fn stop_instance(
    RequireModerator(_session): RequireModerator,
    State(state): State<AppState>,
    Path(pid): Path<u32>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.stop_instance(pid).await?;
    Ok(Json(json!({ "message": "Stop requested" })))
}

// ---------------------------------------------------------------------------
// Logs

/// GET /instances/logs
pub async fn get_all_logs(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<crate::instance::LogFileInfo>>> {
    Ok(Json(state.log_store.list().await?))
}

/// GET /instances/logs/{name}
pub async fn read_log(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let content = state.log_store.read(&name).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        content,
    )
        .into_response())
}

/// GET /instances/logs/{name}/download
pub async fn download_log(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let archive = state.archiver.zip_log_file(&name).await?;
    Ok(archive_response(archive))
}

/// DELETE /instances/logs/{name}
pub async fn delete_log(
    RequireModerator(_session): RequireModerator,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.log_store.delete(&name).await?;
    Ok(Json(json!({ "message": "Log file removed" })))
}

/// DELETE /instances/logs
pub async fn delete_all_logs(
    RequireModerator(_session): RequireModerator,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.log_store.delete_all().await?;
    Ok(Json(json!({ "message": "Log files removed", "removed": removed })))
}

// ---------------------------------------------------------------------------

/// Stream a finished archive as an attachment.
fn archive_response(archive: Archive) -> Response {
    let body = Body::from_stream(ReaderStream::new(archive.file));
    let safe_name = archive.file_name.replace('"', "'");

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, archive.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{safe_name}\""),
            ),
        ],
        body,
    )
        .into_response()
}
