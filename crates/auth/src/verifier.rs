use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use thiserror::Error;
use tracing::debug;

use boxoffice_core::UserId;

use crate::{Identity, UserClaims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("credential has expired")]
    Expired,

    #[error("invalid credential: {0}")]
    Invalid(String),

    #[error("failed to issue credential: {0}")]
    Issue(String),
}

/// Turns a credential into an [`Identity`].
///
/// Constructed once at startup and passed to whoever needs it.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verifier (and issuer, for dev tooling and tests).
#[derive(Clone)]
pub struct Hs256Verifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl core::fmt::Debug for Hs256Verifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256Verifier").finish_non_exhaustive()
    }
}

impl Hs256Verifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present but not required.
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue(&self, claims: &UserClaims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }
}

impl IdentityVerifier for Hs256Verifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }

        let data = jsonwebtoken::decode::<UserClaims>(credential, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "rejected credential");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        let user_id =
            UserId::parse(data.claims.id).map_err(|_| AuthError::Invalid("token carries no user id".into()))?;

        Ok(Identity {
            user_id,
            email: data.claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn issued_token_verifies() {
        let verifier = Hs256Verifier::new("secret");
        let token = verifier.issue(&UserClaims::new("u1", "u1@example.com")).unwrap();

        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity.user_id.as_str(), "u1");
        assert_eq!(identity.email, "u1@example.com");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = Hs256Verifier::new("a").issue(&UserClaims::new("u1", "e")).unwrap();
        assert!(matches!(Hs256Verifier::new("b").verify(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = Hs256Verifier::new("secret");
        let claims = UserClaims::new("u1", "e").expiring_at(Utc::now() - Duration::minutes(5));
        let token = verifier.issue(&claims).unwrap();

        assert_eq!(verifier.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn blank_user_id_is_rejected() {
        let verifier = Hs256Verifier::new("secret");
        let token = verifier.issue(&UserClaims::new("", "e")).unwrap();
        assert!(matches!(verifier.verify(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn other_algorithms_are_rejected() {
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &UserClaims::new("u1", "e"),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(Hs256Verifier::new("secret").verify(&token).is_err());
    }

    #[test]
    fn empty_credential_is_missing() {
        assert_eq!(Hs256Verifier::new("s").verify("  "), Err(AuthError::Missing));
    }
}
