use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use boxoffice_auth::IdentityVerifier;

use crate::app::errors::ApiError;
use crate::context::UserContext;

/// Header and cookie name carrying the credential when no bearer token is sent.
pub const CREDENTIAL_NAME: &str = "auth-jwt";

#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn IdentityVerifier>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(credential) = extract_credential(req.headers()) else {
        return ApiError::unauthorized("User is not signed in").into_response();
    };

    let identity = match state.verifier.verify(&credential) {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "credential rejected");
            return ApiError::unauthorized("Unauthorized").into_response();
        }
    };

    req.extensions_mut().insert(UserContext::from(identity));
    next.run(req).await
}

/// `Authorization: Bearer`, then the `auth-jwt` header, then the `auth-jwt` cookie.
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let plain = headers.get(CREDENTIAL_NAME).and_then(|v| v.to_str().ok());

    bearer
        .or(plain)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .or_else(|| credential_cookie(headers))
}

fn credential_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CREDENTIAL_NAME)
        .map(|(_, value)| value.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn bearer_token_wins() {
        let h = headers(&[("authorization", "Bearer abc"), ("auth-jwt", "def")]);
        assert_eq!(extract_credential(&h).as_deref(), Some("abc"));
    }

    #[test]
    fn plain_header_is_accepted() {
        let h = headers(&[("auth-jwt", " def ")]);
        assert_eq!(extract_credential(&h).as_deref(), Some("def"));
    }

    #[test]
    fn cookie_is_the_last_resort() {
        let h = headers(&[("cookie", "theme=dark; auth-jwt=ghi; lang=en")]);
        assert_eq!(extract_credential(&h).as_deref(), Some("ghi"));
    }

    #[test]
    fn empty_or_missing_credentials_are_none() {
        assert_eq!(extract_credential(&HeaderMap::new()), None);
        assert_eq!(extract_credential(&headers(&[("authorization", "Bearer   ")])), None);
        assert_eq!(extract_credential(&headers(&[("authorization", "Basic dXNlcg==")])), None);
        assert_eq!(extract_credential(&headers(&[("cookie", "auth-jwt=")])), None);
    }
}
