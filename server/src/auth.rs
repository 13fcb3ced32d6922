//! Token issuance and validation for WebSocket admission.
//!
//! Clients obtain a signed, time-bounded access token from `POST /token` and
//! present it as the `token` query parameter when opening `/ws`. Tokens are
//! compact JWTs signed with HS256 using the secret from
//! [`Config::secret_key`](crate::config::Config::secret_key).
//!
//! # Token Format
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(hmac_sha256(header.claims))
//! ```
//!
//! with header `{"alg":"HS256","typ":"JWT"}` and claims
//! `{"user_id": "<subject>", "exp": <unix seconds>}`. Tokens expire
//! [`TOKEN_TTL_SECS`] after issuance.
//!
//! # Example
//!
//! ```rust
//! use chorus_server::auth::TokenService;
//!
//! let tokens = TokenService::new("secret");
//! let token = tokens.issue("alice").unwrap();
//! assert_eq!(tokens.validate(&token).unwrap(), "alice");
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Lifetime of an issued token (24 hours).
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Errors that can occur while issuing or validating a token.
///
/// Validation failures are answered with `401 Unauthorized` at admission and
/// never affect the hub or other clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token is not a well-formed three-part JWT.
    #[error("malformed token")]
    Malformed,

    /// The signature does not verify against the configured secret, or the
    /// token claims an algorithm other than HS256.
    #[error("invalid token signature")]
    SignatureInvalid,

    /// The current time is past the embedded expiry.
    #[error("token expired")]
    Expired,

    /// A required claim is missing or has the wrong type.
    #[error("invalid token claims")]
    ClaimsInvalid,

    /// The token could not be signed.
    #[error("failed to sign token")]
    SigningFailed,
}

impl AuthError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed_token",
            Self::SignatureInvalid => "invalid_signature",
            Self::Expired => "token_expired",
            Self::ClaimsInvalid => "invalid_claims",
            Self::SigningFailed => "signing_failed",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::SignatureInvalid,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::MissingRequiredClaim(_) => Self::ClaimsInvalid,
            _ => Self::Malformed,
        }
    }
}

/// Claims carried by every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity of the connecting user.
    pub user_id: String,
    /// Expiry as a unix timestamp in seconds.
    pub exp: i64,
}

/// Stateless token issuer and validator bound to one signing secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &Algorithm::HS256)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl TokenService {
    /// Creates a token service for the given HS256 secret.
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        // Expiry is checked against an explicit clock in `validate_at`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issues a token for `subject` expiring [`TOKEN_TTL_SECS`] from now.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ClaimsInvalid`] for an empty subject and
    /// [`AuthError::SigningFailed`] if encoding fails.
    pub fn issue(&self, subject: &str) -> Result<String, AuthError> {
        self.issue_at(subject, Utc::now())
    }

    /// Issues a token as if the current time were `now`.
    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        if subject.is_empty() {
            return Err(AuthError::ClaimsInvalid);
        }

        let claims = Claims {
            user_id: subject.to_string(),
            exp: now.timestamp() + TOKEN_TTL_SECS,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AuthError::SigningFailed)
    }

    /// Validates `token` and returns its subject.
    ///
    /// # Errors
    ///
    /// See [`AuthError`] for the failure taxonomy.
    pub fn validate(&self, token: &str) -> Result<String, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// Validates `token` as if the current time were `now`.
    ///
    /// A token is expired once `now` is strictly past its `exp` claim.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let data = jsonwebtoken::decode::<HashMap<String, Value>>(
            token,
            &self.decoding_key,
            &self.validation,
        )
        .map_err(|err| match AuthError::from(err) {
            AuthError::Malformed if has_split_signature(token) => AuthError::SignatureInvalid,
            other => other,
        })?;
        let claims = data.claims;

        let exp = claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or(AuthError::ClaimsInvalid)?;

        if now.timestamp() > exp {
            return Err(AuthError::Expired);
        }

        match claims.get("user_id").and_then(Value::as_str) {
            Some(subject) if !subject.is_empty() => Ok(subject.to_string()),
            _ => Err(AuthError::ClaimsInvalid),
        }
    }
}

/// Returns `true` if `token` has a well-formed header and claims followed by
/// a signature containing extra `.` separators.
///
/// A `.` inside the signature text still means the signature does not verify.
fn has_split_signature(token: &str) -> bool {
    let mut parts = token.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(signature)) => {
            signature.contains('.') && is_json_object(header) && is_json_object(claims)
        }
        _ => false,
    }
}

fn is_json_object(segment: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(segment)
        .ok()
        .and_then(|raw| serde_json::from_slice::<serde_json::Map<String, Value>>(&raw).ok())
        .is_some()
}
