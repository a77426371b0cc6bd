use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::api::handlers::ErrorResponse;

const API_KEY_HEADER: &str = "X-API-Key";
const API_KEY_PARAM: &str = "api_key";

pub struct AuthService {
    api_keys: Arc<Vec<String>>,
}

impl AuthService {
    /// An empty key list disables authentication
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn validate_key(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }

        // Check every key so timing does not reveal which one matched
        self.api_keys
            .iter()
            .fold(false, |found, k| found | bool::from(k.as_bytes().ct_eq(key.as_bytes())))
    }
}

/// Header first, then the `api_key` query parameter
fn presented_key(headers: &HeaderMap, request: &Request) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|h| h.to_str().ok()) {
        return Some(key.to_string());
    }

    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == API_KEY_PARAM)
        .map(|(_, value)| value.into_owned())
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let api_key = presented_key(&headers, &request).unwrap_or_default();

    if auth_service.validate_key(&api_key) {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "rejected request without a valid API key");
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or missing API key".to_string(),
            }),
        )
            .into_response()
    }
}
