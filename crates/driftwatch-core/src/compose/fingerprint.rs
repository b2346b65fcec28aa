//! Compose body fingerprinting.

use sha2::{Digest, Sha256};

use super::ComposeError;

/// Computes the hex SHA-256 fingerprint of a Compose body.
///
/// # Errors
///
/// Returns [`ComposeError::EmptyBody`] for an empty input.
pub fn fingerprint(body: &[u8]) -> Result<String, ComposeError> {
    if body.is_empty() {
        return Err(ComposeError::EmptyBody);
    }
    Ok(hex::encode(Sha256::digest(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint(b"services: {}").unwrap();
        let b = fingerprint(b"services: {}").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_differs_for_different_bodies() {
        let a = fingerprint(b"services:\n  api: {}").unwrap();
        let b = fingerprint(b"services:\n  web: {}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(fingerprint(b""), Err(ComposeError::EmptyBody)));
    }
}
