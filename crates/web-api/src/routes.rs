use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use application::{FileUpload, RateLimitAction};
use domain::RoomSummary;

use crate::{error::ApiError, state::AppState, ws_connection::WsConnection, LoginResponse};

#[derive(Debug, Deserialize)]
struct CredentialsPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
struct CreateRoomPayload {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_capacity")]
    capacity: u32,
}

fn default_capacity() -> u32 {
    100
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    file_url: String,
    file_name: String,
    file_size: u64,
    mime_type: String,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.chat.max_upload_size as usize + 1024;
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .route("/ws", get(websocket_upgrade))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{room_id}", delete(delete_room))
        .route("/upload", post(upload))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<CredentialsPayload>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let user = state
        .user_service
        .register(&addr.ip().to_string(), &payload.username, &payload.password)
        .await?;
    let token = state.jwt_service.generate_token(&user)?;

    Ok((StatusCode::CREATED, Json(LoginResponse { user, token })))
}

async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<CredentialsPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .user_service
        .login(&addr.ip().to_string(), &payload.username, &payload.password)
        .await?;
    let token = state.jwt_service.generate_token(&user)?;

    Ok(Json(LoginResponse { user, token }))
}

/// 登出：令牌进黑名单，直到自然过期。
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = crate::JwtService::extract_bearer(&headers)?;
    let claims = state
        .jwt_service
        .authorize(token, state.blacklist.as_ref())
        .await?;

    state.blacklist.revoke(&claims.jti, claims.expires_at()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_rooms(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    state.rate_limiter.consume(
        addr.ip().to_string(),
        RateLimitAction::Api,
        chrono::Utc::now(),
    )?;
    Ok(Json(state.chat_service.rooms()))
}

/// 校验令牌并要求管理员身份。
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = crate::JwtService::extract_bearer(headers)?;
    let claims = state
        .jwt_service
        .authorize(token, state.blacklist.as_ref())
        .await?;

    let user = state
        .user_service
        .find(claims.user_id())
        .await?
        .ok_or_else(|| ApiError::unauthorized("unknown user"))?;
    if !user.is_admin {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "administrator privileges required",
        ));
    }
    Ok(())
}

/// 管理员建房
async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoomPayload>,
) -> Result<(StatusCode, Json<RoomSummary>), ApiError> {
    require_admin(&state, &headers).await?;

    let room_id = domain::RoomId::parse(&payload.id)?;
    let room = domain::Room::new(
        room_id,
        payload.name,
        payload.description,
        domain::RoomKind::Public,
        payload.capacity,
        chrono::Utc::now(),
    )?;

    let summary = state.chat_service.create_room(room).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// 管理员删房
async fn delete_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(&state, &headers).await?;

    let room_id = domain::RoomId::parse(&room_id)?;
    state.chat_service.delete_room(&room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 附件先走这里拿 URL，再随消息事件引用。
async fn upload(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let token = crate::JwtService::extract_bearer(&headers)?;
    state
        .jwt_service
        .authorize(token, state.blacklist.as_ref())
        .await?;
    state.rate_limiter.consume(
        addr.ip().to_string(),
        RateLimitAction::Api,
        chrono::Utc::now(),
    )?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
        .ok_or_else(|| ApiError::bad_request("missing file field"))?;

    let file_name = field.file_name().unwrap_or("upload").to_string();
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read upload: {}", e)))?;

    if bytes.len() as u64 > state.chat.max_upload_size {
        return Err(ApiError::payload_too_large(format!(
            "file exceeds {} bytes",
            state.chat.max_upload_size
        )));
    }

    let stored = state
        .storage
        .store(FileUpload {
            file_name,
            mime_type,
            bytes: bytes.to_vec(),
        })
        .await
        .map_err(|e| match e {
            application::StorageError::Rejected(reason) => ApiError::bad_request(reason),
            application::StorageError::Unavailable(reason) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_FAILURE", reason)
            }
        })?;

    Ok(Json(UploadResponse {
        file_url: stored.url,
        file_name: stored.file_name,
        file_size: stored.file_size,
        mime_type: stored.mime_type,
    }))
}

/// WebSocket 握手：令牌随查询参数传入，升级前完成认证。
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = state
        .jwt_service
        .authorize(&query.token, state.blacklist.as_ref())
        .await?;

    let username = domain::Username::parse(&claims.username)?;
    let user_id = claims.user_id();

    Ok(ws.on_upgrade(move |socket| async move {
        WsConnection::new(state, user_id, username).run(socket).await;
    }))
}
