use super::state::ServerState;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, error};

/// The authenticated caller of a request.
#[derive(Debug)]
pub struct Session {
    pub user_id: usize,
    pub token: String,
}

pub const COOKIE_SESSION_TOKEN_KEY: &str = "session_token";
pub const HEADER_SESSION_TOKEN_KEY: &str = "Authorization";

pub enum SessionExtractionError {
    AccessDenied,
    InternalError,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> axum::response::Response {
        match self {
            SessionExtractionError::AccessDenied => StatusCode::FORBIDDEN.into_response(),
            SessionExtractionError::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn extract_session_token_from_cookies(
    parts: &mut Parts,
    ctx: &ServerState,
) -> Option<String> {
    let jar = CookieJar::from_request_parts(parts, ctx).await.ok()?;
    jar.get(COOKIE_SESSION_TOKEN_KEY)
        .map(|cookie| cookie.value().to_string())
}

fn extract_session_token_from_headers(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(HEADER_SESSION_TOKEN_KEY)?;
    let value = String::from_utf8_lossy(value.as_bytes());
    let token = value.strip_prefix("Bearer ").unwrap_or(&value).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

async fn extract_session_from_request_parts(
    parts: &mut Parts,
    ctx: &ServerState,
) -> Result<Option<Session>, SessionExtractionError> {
    let token = match extract_session_token_from_cookies(parts, ctx).await {
        Some(token) => token,
        None => match extract_session_token_from_headers(parts) {
            Some(token) => token,
            None => {
                debug!("No token in cookies nor headers.");
                return Ok(None);
            }
        },
    };

    match ctx.user_store.get_user_id_for_token(&token) {
        Ok(Some(user_id)) => Ok(Some(Session { user_id, token })),
        Ok(None) => {
            debug!("Auth token not found in database");
            Ok(None)
        }
        Err(e) => {
            error!("Failed to look up auth token: {:#}", e);
            Err(SessionExtractionError::InternalError)
        }
    }
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        extract_session_from_request_parts(parts, ctx)
            .await?
            .ok_or(SessionExtractionError::AccessDenied)
    }
}

impl FromRequestParts<ServerState> for Option<Session> {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        extract_session_from_request_parts(parts, ctx).await
    }
}
