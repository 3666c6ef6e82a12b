//! Password handshake.
//!
//! Performers send the lowercase hex SHA-256 digest of the shared password as
//! the first frame on a connection. The server hashes its configured password
//! once at startup and compares every attempt against that baseline. There is
//! no lockout or throttling: a wrong digest only fails that connection.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `password`.
pub fn password_digest(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone)]
pub struct AuthGate {
    baseline: String,
}

impl AuthGate {
    pub fn new(password: &str) -> Self {
        Self {
            baseline: password_digest(password),
        }
    }

    /// Check a presented digest. Hex case is ignored.
    pub fn verify(&self, presented: &str) -> bool {
        presented.eq_ignore_ascii_case(&self.baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_known_vectors() {
        assert_eq!(
            password_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            password_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify() {
        let gate = AuthGate::new("hunter2");
        assert!(gate.verify(&password_digest("hunter2")));
        assert!(gate.verify(&password_digest("hunter2").to_uppercase()));
        assert!(!gate.verify(&password_digest("hunter3")));
        assert!(!gate.verify("hunter2"));
    }

    #[test]
    fn test_blank_password() {
        let gate = AuthGate::new("");
        assert!(gate.verify(&password_digest("")));
        assert!(!gate.verify(""));
    }
}
