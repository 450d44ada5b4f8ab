//! PKCE (Proof Key for Code Exchange) and `state` generation.
//!
//! S256 only: the challenge is the base64url SHA-256 of the verifier.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Value of `code_challenge_method` for [`PkcePair::challenge`].
pub const CHALLENGE_METHOD: &str = "S256";

/// PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The code verifier (32 random bytes, base64url, 43 chars).
    pub verifier: String,
    /// The S256 code challenge.
    pub challenge: String,
}

/// Generate a fresh verifier and its challenge.
pub fn generate_pkce() -> PkcePair {
    let verifier = random_token::<32>();
    let challenge = challenge_for(&verifier);

    PkcePair {
        verifier,
        challenge,
    }
}

/// S256 challenge of a verifier.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random value for the `state` parameter.
pub fn generate_state() -> String {
    random_token::<16>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_shape() {
        let pair = generate_pkce();
        assert_eq!(pair.verifier.len(), 43);
        assert_eq!(pair.challenge.len(), 43);
        for s in [&pair.verifier, &pair.challenge] {
            assert!(!s.contains('+'));
            assert!(!s.contains('/'));
            assert!(!s.contains('='));
        }
    }

    #[test]
    fn test_challenge_matches_verifier() {
        let pair = generate_pkce();
        assert_eq!(pair.challenge, challenge_for(&pair.verifier));
    }

    #[test]
    fn test_rfc7636_vector() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_values_are_unique() {
        assert_ne!(generate_pkce().verifier, generate_pkce().verifier);
        assert_ne!(generate_state(), generate_state());
        assert_eq!(generate_state().len(), 22);
    }
}
