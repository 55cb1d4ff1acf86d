//! Manage the signed session tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::user::{Account, Role};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Pieces of information asserted on a session token.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Account ID.
    pub sub: i64,
    /// Username at issuance time.
    pub username: String,
    /// Role set at issuance time.
    pub roles: Vec<Role>,
    /// Identifies the time at which the token was issued.
    pub iat: u64,
    /// Identifies the expiration time on or after which the token must not
    /// be accepted for processing.
    pub exp: u64,
}

/// Why a token failed to decode. Expiry is distinguished so callers can word
/// the failure; every other defect is collapsed.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is invalid")]
    Invalid,
}

/// Issues and verifies stateless bearer tokens over a symmetric secret.
#[derive(Clone)]
pub struct SessionTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: u64,
}

impl SessionTokenCodec {
    /// Create a new [`SessionTokenCodec`]. `lifetime` is in seconds.
    pub fn new(secret: impl AsRef<[u8]>, lifetime: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_ref()),
            decoding: DecodingKey::from_secret(secret.as_ref()),
            lifetime,
        }
    }

    /// Session lifetime in seconds.
    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Issue a token for an account.
    pub fn issue(&self, account: &Account) -> Result<String, TokenError> {
        let iat = Self::now();
        let claims = Claims {
            sub: account.id,
            username: account.username.clone(),
            roles: account.roles.clone(),
            iat,
            exp: iat + self.lifetime,
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|_| TokenError::Invalid)
    }

    /// Decode and check a token. No clock-skew tolerance: a token is expired
    /// the second its `exp` passes.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    TokenError::Expired
                },
                _ => TokenError::Invalid,
            })
    }
}
