//! Password hashing capability and its bcrypt implementation.

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Opaque credential hashing.
///
/// Implementations must be side-effect free; `verify` must not leak timing
/// information about the stored hash.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, raw: &str) -> Result<String, AuthError>;
    fn verify(&self, raw: &str, hash: &str) -> Result<bool, AuthError>;
}

/// bcrypt hasher.
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// Hasher with an explicit cost (bcrypt accepts 4..=31).
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::with_cost(DEFAULT_BCRYPT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, raw: &str) -> Result<String, AuthError> {
        bcrypt::hash(raw, self.cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    fn verify(&self, raw: &str, hash: &str) -> Result<bool, AuthError> {
        bcrypt::verify(raw, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
    }
}
