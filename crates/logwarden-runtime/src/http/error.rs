use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

/// API error mapped onto the JSON envelope
/// `{success:false, error:{message, code}, path, timestamp}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

/// Search errors are client errors except for storage failures.
impl From<logwarden_search::Error> for ApiError {
    fn from(err: logwarden_search::Error) -> Self {
        use logwarden_search::Error as E;
        match &err {
            E::BadRegex(_) => ApiError::bad_request("bad_regex", err.to_string()),
            E::BadLevel(_) => ApiError::bad_request("bad_level", err.to_string()),
            E::BadCursor(_) => ApiError::bad_request("bad_cursor", err.to_string()),
            E::BadFacetField(_) => ApiError::bad_request("bad_facet_field", err.to_string()),
            E::BadInput(_) => ApiError::bad_request("bad_input", err.to_string()),
            E::Timeout => ApiError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string()),
            E::Store(logwarden_store::Error::NotFound(_)) => ApiError::not_found(err.to_string()),
            E::Store(logwarden_store::Error::Conflict(_)) => {
                ApiError::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            E::Store(_) | E::Csv(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<logwarden_store::Error> for ApiError {
    fn from(err: logwarden_store::Error) -> Self {
        match &err {
            logwarden_store::Error::NotFound(_) => ApiError::not_found(err.to_string()),
            logwarden_store::Error::Conflict(_) => {
                ApiError::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<logwarden_rules::Error> for ApiError {
    fn from(err: logwarden_rules::Error) -> Self {
        ApiError::bad_request("bad_rule", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Path is stamped in by the envelope middleware, which sees the URI
        let body = json!({
            "success": false,
            "error": { "message": self.message, "code": self.code },
            "timestamp": Utc::now().to_rfc3339(),
        });
        let mut response = (self.status, Json(body)).into_response();
        response.extensions_mut().insert(NeedsPath);
        response
    }
}

/// Marker: the envelope middleware should rewrite this response to include
/// the request path.
#[derive(Clone, Copy)]
pub struct NeedsPath;

/// Middleware adding `path` to error envelopes.
pub async fn stamp_error_path(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if response.extensions().get::<NeedsPath>().is_none() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, axum::body::Body::empty()),
    };
    let mut value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return Response::from_parts(parts, axum::body::Body::from(bytes)),
    };
    value["path"] = json!(path);

    let body = serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec());
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, axum::body::Body::from(body))
}
