use std::num::NonZeroU32;

use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, pbkdf2};

const SALT_LEN: usize = 16;
const CREDENTIAL_LEN: usize = digest::SHA256_OUTPUT_LEN;
const VERIFICATION_CODE_BYTES: usize = 6;
const SCHEME: &str = "pbkdf2-sha256";

#[cfg(not(test))]
const PBKDF2_ITERATIONS: u32 = 210_000;
#[cfg(test)]
const PBKDF2_ITERATIONS: u32 = 1_000;

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("Secure random generation failed")]
    Random,

    #[error("Password must be at least {0} characters")]
    TooShort(usize),
}

pub const MIN_PASSWORD_LEN: usize = 8;

fn random_bytes<const N: usize>() -> Result<[u8; N], CredentialError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| CredentialError::Random)?;
    Ok(bytes)
}

/// Hashes a password as `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::TooShort(MIN_PASSWORD_LEN));
    }

    let salt = random_bytes::<SALT_LEN>()?;
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN);

    let mut hash = [0u8; CREDENTIAL_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!(
        "{}${}${}${}",
        SCHEME,
        iterations,
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Checks a password against a stored hash. Malformed hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    let Some(iterations) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (hex::decode(salt), hex::decode(hash)) else {
        return false;
    };

    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok()
}

/// Random code shown on the ticket and checked at the gate (12 hex digits)
pub fn generate_verification_code() -> Result<String, CredentialError> {
    let bytes = random_bytes::<VERIFICATION_CODE_BYTES>()?;
    Ok(hex::encode_upper(bytes))
}
