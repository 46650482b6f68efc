//! Cryptographic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::config::Argon2 as ArgonConfig;

/// Symbols an access code is drawn from.
const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const ACCESS_CODE_LENGTH: usize = 8;
const MIN_KEY_LENGTH: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("key length is {value} while at least {excepted} is excepted")]
    KeyLength { value: usize, excepted: usize },
}

impl From<CryptoError> for crate::error::ServerError {
    fn from(err: CryptoError) -> Self {
        crate::error::ServerError::Internal {
            details: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Cryptographic manager.
pub struct Crypto {
    pub pwd: PasswordManager,
    pub session_key: SessionKey,
}

impl Crypto {
    /// Create a new [`Crypto`].
    pub fn new(
        config: Option<ArgonConfig>,
        session_key: impl AsRef<[u8]>,
    ) -> Result<Self> {
        Ok(Self {
            pwd: PasswordManager::new(config)?,
            session_key: SessionKey::new(session_key)?,
        })
    }
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
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

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC.
    ///
    /// Anything that is not a valid PHC string never matches.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> bool {
        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }
}

/// HMAC-SHA256 key used to authenticate session cookies.
#[derive(Clone)]
pub struct SessionKey(Hmac<Sha256>);

impl SessionKey {
    /// Create a new [`SessionKey`].
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref();
        if key.len() < MIN_KEY_LENGTH {
            return Err(CryptoError::KeyLength {
                value: key.len(),
                excepted: MIN_KEY_LENGTH,
            });
        }

        let mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| {
            CryptoError::KeyLength {
                value: key.len(),
                excepted: MIN_KEY_LENGTH,
            }
        })?;

        Ok(Self(mac))
    }

    /// Sign data, returning the hex-encoded tag.
    pub fn sign(&self, data: impl AsRef<[u8]>) -> String {
        let mut mac = self.0.clone();
        mac.update(data.as_ref());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a hex-encoded tag in constant time.
    pub fn verify(&self, data: impl AsRef<[u8]>, tag: &str) -> bool {
        let Ok(tag) = hex::decode(tag) else {
            return false;
        };

        let mut mac = self.0.clone();
        mac.update(data.as_ref());
        mac.verify_slice(&tag).is_ok()
    }
}

/// Generate an invitation code, uniformly drawn from `[A-Z0-9]`.
pub fn generate_access_code() -> String {
    let mut rng = OsRng;
    (0..ACCESS_CODE_LENGTH)
        .map(|_| {
            ACCESS_CODE_ALPHABET[rng.gen_range(0..ACCESS_CODE_ALPHABET.len())]
                as char
        })
        .collect()
}

/// Whether `code` is shaped like an access code.
pub fn is_access_code_format(code: &str) -> bool {
    code.len() == ACCESS_CODE_LENGTH
        && code.bytes().all(|b| ACCESS_CODE_ALPHABET.contains(&b))
}
