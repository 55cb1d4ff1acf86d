//! Credential derivation and token minting.

use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::Rng;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;

/// Opaque one-time tokens are 128-bit.
const OPAQUE_TOKEN_BYTES: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// Create a new [`PasswordHasher`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self, CryptoError> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2 {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id.
    pub fn hash(
        &self,
        password: impl AsRef<[u8]>,
    ) -> Result<String, CryptoError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// A malformed PHC string verifies as `false` rather than erroring, so a
    /// corrupted row cannot be told apart from a wrong password.
    pub fn verify(&self, password: impl AsRef<[u8]>, phc_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }
}

/// Mints the opaque random material backing one-time tokens and codes.
pub struct TokenMint;

impl TokenMint {
    /// 128-bit cryptographically random token, hex-encoded (URL-safe).
    /// Used for verification and password-reset tokens.
    pub fn opaque_token() -> String {
        let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// `digits`-long decimal code, uniformly distributed, leading zeros
    /// preserved. Six digits for the second factor.
    pub fn numeric_code(digits: u32) -> String {
        let modulus = 10u64.pow(digits);
        let code = OsRng.gen_range(0..modulus);
        format!("{code:0width$}", width = digits as usize)
    }

    /// Raw random bytes, e.g. for a TOTP secret.
    pub fn secret_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }
}

/// Compare two short strings without leaking the mismatch position.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
