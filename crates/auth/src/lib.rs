//! `boxoffice-auth`: the Identity Verifier capability.
//!
//! Decoupled from HTTP and storage: the API layer extracts a credential and
//! hands it to an injected [`IdentityVerifier`].

pub mod claims;
pub mod verifier;

pub use claims::{Identity, UserClaims};
pub use verifier::{AuthError, Hs256Verifier, IdentityVerifier};
