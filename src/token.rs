//! Token authority: signs, verifies and decodes JSON Web Tokens.
//!
//! All cryptography is `jsonwebtoken`'s. This module only fixes the policy:
//! one configured algorithm, expiry stamped from a human ttl (`"24h"`, `"90m"`),
//! no clock leeway, and a clear split between [`TokenAuthority::verify`]
//! (trusted) and [`TokenAuthority::decode`] (untrusted).

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error as ThisError;

use crate::app_error::{ApplicationError, ErrorName};

/// The payload of a verified or decoded token.
pub type Claims = Map<String, Value>;

/// Lifetime applied by [`TokenAuthority::sign_default`].
pub const DEFAULT_TTL: &str = "24h";

pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token invalid: {0}")]
    Invalid(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid ttl {0:?}; expected forms like 90s, 15m, 24h, 7d")]
    InvalidTtl(String),

    #[error("token payload must serialise to a JSON object")]
    InvalidPayload,
}

impl From<TokenError> for ApplicationError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => {
                Self::new(ErrorName::TokenExpired.as_str(), "Token has expired")
            }
            TokenError::Invalid(reason) => Self::with_code("TokenInvalid", reason, 401),
            other => Self::with_code("SigningError", other.to_string(), 500),
        }
    }
}

/// Signs and checks tokens with one algorithm and one key pair.
///
/// Built once at startup and shared read-only; it is `Send + Sync`.
pub struct TokenAuthority {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority").field("algorithm", &self.algorithm).finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// HMAC authority (`HS256`, `HS384`, `HS512`) over a shared secret.
    pub fn hmac(algorithm: Algorithm, secret: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(TokenError::Signing(format!(
                "{algorithm:?} needs a PEM key pair, not a shared secret"
            )));
        }
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(TokenError::Signing("shared secret is empty".to_owned()));
        }
        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// [`hmac`](Self::hmac) with [`DEFAULT_ALGORITHM`].
    pub fn with_secret(secret: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        Self::hmac(DEFAULT_ALGORITHM, secret)
    }

    /// HMAC authority with a secret nobody else knows: the SHA-256 of a fresh
    /// v4 uuid. Tokens do not survive a restart.
    pub fn random_hmac(algorithm: Algorithm) -> Result<Self, TokenError> {
        let digest = Sha256::digest(uuid::Uuid::new_v4().as_bytes());
        Self::hmac(algorithm, format!("{digest:x}"))
    }

    /// Asymmetric authority (`RS*`, `PS*`, `ES*`, `EdDSA`) from PEM keys.
    pub fn from_pem(
        algorithm: Algorithm,
        private_pem: &[u8],
        public_pem: &[u8],
    ) -> Result<Self, TokenError> {
        let signing = |e: jsonwebtoken::errors::Error| TokenError::Signing(e.to_string());
        let (encoding, decoding) = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
            | Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => (
                EncodingKey::from_rsa_pem(private_pem).map_err(signing)?,
                DecodingKey::from_rsa_pem(public_pem).map_err(signing)?,
            ),
            Algorithm::ES256 | Algorithm::ES384 => (
                EncodingKey::from_ec_pem(private_pem).map_err(signing)?,
                DecodingKey::from_ec_pem(public_pem).map_err(signing)?,
            ),
            Algorithm::EdDSA => (
                EncodingKey::from_ed_pem(private_pem).map_err(signing)?,
                DecodingKey::from_ed_pem(public_pem).map_err(signing)?,
            ),
            hmac => {
                return Err(TokenError::Signing(format!(
                    "{hmac:?} uses a shared secret, not PEM keys"
                )));
            }
        };
        Ok(Self { algorithm, encoding, decoding })
    }

    pub fn algorithm(&self) -> Algorithm { self.algorithm }

    /// Signs `payload` with an expiry `ttl` from now.
    ///
    /// `payload` must serialise to a JSON object; `iat` and `exp` are added
    /// (overwriting any the caller set).
    pub fn sign<T: Serialize>(&self, payload: &T, ttl: &str) -> Result<String, TokenError> {
        self.sign_at(payload, ttl, jsonwebtoken::get_current_timestamp())
    }

    /// [`sign`](Self::sign) with the 24 hour default lifetime.
    pub fn sign_default<T: Serialize>(&self, payload: &T) -> Result<String, TokenError> {
        self.sign(payload, DEFAULT_TTL)
    }

    pub(crate) fn sign_at<T: Serialize>(
        &self,
        payload: &T,
        ttl: &str,
        now: u64,
    ) -> Result<String, TokenError> {
        let ttl = parse_ttl(ttl)?;
        let mut claims = match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(TokenError::InvalidPayload),
            Err(e) => return Err(TokenError::Signing(e.to_string())),
        };
        claims.insert("iat".to_owned(), Value::from(now));
        claims.insert("exp".to_owned(), Value::from(now.saturating_add(ttl.as_secs())));

        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Checks signature, algorithm and expiry, then returns the payload.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_aud = false;

        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }

    /// Returns the payload **without** checking the signature or expiry.
    ///
    /// Anyone can mint a token that decodes. Never authorise on the result;
    /// use it for display or for routing a token to the right verifier.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        decode_unverified(token)
    }
}

/// Reads the payload segment of a compact JWT.
pub fn decode_unverified(token: &str) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(TokenError::Invalid("token is not three dot-separated segments".to_owned())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Invalid(format!("payload is not base64url: {e}")))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(TokenError::InvalidPayload),
        Err(e) => Err(TokenError::Invalid(format!("payload is not JSON: {e}"))),
    }
}

/// Parses a standard algorithm name: `"HS256"`, `"RS384"`, `"ES256"`, `"EdDSA"`, ...
pub fn parse_algorithm(name: &str) -> Result<Algorithm, TokenError> {
    name.trim()
        .parse()
        .map_err(|_| TokenError::Signing(format!("unknown algorithm {name:?}")))
}

/// Parses `"90s"`, `"15m"`, `"24h"`, `"7d"`, `"2w"`, `"1y"`. A bare number is seconds.
pub fn parse_ttl(ttl: &str) -> Result<Duration, TokenError> {
    let invalid = || TokenError::InvalidTtl(ttl.to_owned());
    let trimmed = ttl.trim();
    let split = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let scale = match unit.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes"      => 60,
        "h" | "hr" | "hrs" | "hour" | "hours"            => 60 * 60,
        "d" | "day" | "days"                             => 24 * 60 * 60,
        "w" | "week" | "weeks"                           => 7 * 24 * 60 * 60,
        "y" | "year" | "years"                           => 365 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    n.checked_mul(scale).map(Duration::from_secs).ok_or_else(invalid)
}
