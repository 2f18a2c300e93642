use axum::extract::{FromRequestParts, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::Json;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;

/// Session lifetime for both the JWT and the stored session row.
const SESSION_TTL_SECONDS: i64 = 24 * 3600;

pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
}

/// Authenticated caller, resolved from a Bearer JWT or the session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("admin role required"))
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Bearer JWT first
        if let Some(token) = bearer_token(parts) {
            let data = jsonwebtoken::decode::<Claims>(
                &token,
                &state.jwt.decoding,
                &Validation::default(),
            )
            .map_err(|_| ApiError::unauthorized("invalid or expired token"))?;
            return Ok(AuthUser {
                username: data.claims.sub,
                role: data.claims.role,
            });
        }

        // Session cookie second
        if let Some(session) = session_cookie(parts) {
            let user = {
                let mut db = state.db.lock().unwrap();
                let session = db
                    .resolve_session(&session)
                    .map_err(|e| ApiError::internal(e.to_string()))?
                    .ok_or_else(|| ApiError::unauthorized("expired session"))?;
                db.get_user_by_id(session.user_id)
                    .map_err(|e| ApiError::internal(e.to_string()))?
            };
            if let Some(user) = user {
                return Ok(AuthUser {
                    username: user.username,
                    role: user.role,
                });
            }
        }

        Err(ApiError::unauthorized("authentication required"))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn session_cookie(parts: &Parts) -> Option<String> {
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "session").then(|| value.to_string())
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /api/auth/login` — checks credentials, issues a JWT plus a stored
/// session token set as an HttpOnly cookie.
pub async fn login(
    State(state): State<Arc<AppState>>,
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<std::net::SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> Result<axum::response::Response, ApiError> {
    let user = {
        let mut db = state.db.lock().unwrap();
        db.authenticate_user(&request.username, &request.password)
            .map_err(|e| ApiError::internal(e.to_string()))?
    }
    .ok_or_else(|| ApiError::unauthorized("bad credentials"))?;

    let exp = chrono::Utc::now().timestamp() + SESSION_TTL_SECONDS;
    let claims = Claims {
        sub: user.username.clone(),
        role: user.role.clone(),
        exp,
    };
    let jwt = jsonwebtoken::encode(&Header::default(), &claims, &state.jwt.encoding)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let session_token = random_token();
    {
        let mut db = state.db.lock().unwrap();
        db.create_session(
            &session_token,
            user.id,
            SESSION_TTL_SECONDS,
            Some(&peer.ip().to_string()),
        )
        .map_err(|e| ApiError::internal(e.to_string()))?;
        let _ = db.record_audit(
            &user.username,
            "auth.login",
            "session",
            Some(&peer.ip().to_string()),
        );
    }

    let body = json!({
        "token": jwt,
        "user": { "username": user.username, "role": user.role },
    });
    let mut response = axum::response::IntoResponse::into_response(Json(body));
    let cookie = format!(
        "session={}; HttpOnly; Path=/; Max-Age={}; SameSite=Strict",
        session_token, SESSION_TTL_SECONDS
    );
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie.parse().map_err(|_| ApiError::internal("cookie"))?,
    );
    Ok(response)
}

/// `POST /api/auth/logout` — drops the stored session when one is present.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    parts: axum::http::request::Parts,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if let Some(session) = session_cookie(&parts) {
        let mut db = state.db.lock().unwrap();
        db.delete_session(&session)
            .map_err(|e| ApiError::internal(e.to_string()))?;
    }
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

pub fn random_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validate a JWT presented over the WebSocket `authenticate` message.
pub fn verify_jwt(state: &AppState, token: &str) -> Option<(String, String)> {
    let data =
        jsonwebtoken::decode::<Claims>(token, &state.jwt.decoding, &Validation::default()).ok()?;
    Some((data.claims.sub, data.claims.role))
}
