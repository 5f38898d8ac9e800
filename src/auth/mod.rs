//! Owner identity for HTTP requests.
//!
//! The bearer token is the owner id. With authentication disabled every
//! request acts as [`DEFAULT_OWNER`].

use axum::http::HeaderMap;
use thiserror::Error;


pub const DEFAULT_OWNER: &str = "default";

/// Resolves the owner a request acts for.
pub fn resolve_owner(headers: &HeaderMap, auth_enabled: bool) -> Result<String, TokenError> {
    if auth_enabled {
        extract_bearer_token(headers)
    } else {
        Ok(DEFAULT_OWNER.to_string())
    }
}

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone, Error)]
pub enum TokenError {
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>"
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}
