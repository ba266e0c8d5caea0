//! Password hashing.

use rand::Rng;

use crate::DomainError;

/// Hashes and verifies passwords with Argon2 and a random salt per hash.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    config: argon2::Config<'static>,
}

impl PasswordHasher {
    pub fn new(config: argon2::Config<'static>) -> Self {
        Self { config }
    }

    /// Argon2 with the given memory (KiB) and iteration costs.
    pub fn with_cost(mem_cost: u32, time_cost: u32) -> Self {
        Self::new(argon2::Config {
            mem_cost,
            time_cost,
            ..argon2::Config::default()
        })
    }

    /// Returns an encoded hash containing the salt and parameters.
    pub fn hash(&self, password: &str) -> Result<String, DomainError> {
        let salt: [u8; 16] = rand::thread_rng().r#gen();
        argon2::hash_encoded(password.as_bytes(), &salt, &self.config)
            .map_err(|e| DomainError::Credential(e.to_string()))
    }

    /// Returns true if the password matches the encoded hash.
    ///
    /// A malformed hash never matches.
    pub fn verify(&self, encoded: &str, password: &str) -> bool {
        argon2::verify_encoded(encoded, password.as_bytes()).unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(argon2::Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_hasher() -> PasswordHasher {
        PasswordHasher::with_cost(256, 1)
    }

    #[test]
    fn hash_verifies_only_the_original_password() {
        let hasher = cheap_hasher();
        let hash = hasher.hash("abcdefg1!").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(hasher.verify(&hash, "abcdefg1!"));
        assert!(!hasher.verify(&hash, "abcdefg2!"));
    }

    #[test]
    fn same_password_hashes_differently() {
        let hasher = cheap_hasher();
        let a = hasher.hash("abcdefg1!").unwrap();
        let b = hasher.hash("abcdefg1!").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_does_not_verify() {
        assert!(!PasswordHasher::default().verify("not-a-hash", "abcdefg1!"));
    }
}
