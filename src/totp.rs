//! Time-based one-time passwords over the account's second-factor secret.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;

const TIME_STEP: u64 = 30;
const DIGITS: u32 = 6;

/// Generates the TOTP code for one 30-second counter window.
pub fn code_at(secret: &[u8], counter: u64) -> Result<String, String> {
    let counter_bytes = counter.to_be_bytes();
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret).map_err(|_| "HMAC error")?;
    mac.update(&counter_bytes);
    let result = mac.finalize().into_bytes();

    let offset = (result[19] & 0x0f) as usize;
    let binary_code = ((result[offset] as u32 & 0x7f) << 24)
        | ((result[offset + 1] as u32) << 16)
        | ((result[offset + 2] as u32) << 8)
        | (result[offset + 3] as u32);

    let mut code = (binary_code % 10u32.pow(DIGITS)).to_string();

    // Ensure the code has the correct number of digits.
    while code.len() < DIGITS as usize {
        code.insert(0, '0');
    }

    Ok(code)
}

fn current_counter() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / TIME_STEP
}

/// Generates the TOTP code for the current window.
pub fn generate(secret: &[u8]) -> Result<String, String> {
    code_at(secret, current_counter())
}

/// Check a client-computed code, accepting the current and the previous
/// window to tolerate clock skew.
pub fn verify(secret: &[u8], code: &str) -> bool {
    let counter = current_counter();

    [counter, counter.saturating_sub(1)].iter().any(|c| {
        code_at(secret, *c)
            .map(|expected| crate::crypto::constant_time_eq(&expected, code))
            .unwrap_or(false)
    })
}

/// Provisioning URL consumed by authenticator apps.
pub fn otpauth_url(app_name: &str, username: &str, secret: &[u8]) -> String {
    let encoded = base32::encode(
        base32::Alphabet::Rfc4648 { padding: false },
        secret,
    );
    format!(
        "otpauth://totp/{app_name}:{username}?secret={encoded}&issuer={app_name}"
    )
}
