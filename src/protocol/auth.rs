//! Key derivation and challenge digests for the connect handshake

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Derive the connect auth key from the device secret and MAC.
///
/// The key is the first six digest bytes, base64-encoded with the symbols
/// the camera firmware cannot handle substituted away.
pub fn auth_key(enr: &str, mac: &str) -> String {
    let digest = Sha256::digest(format!("{}{}", enr, mac.to_uppercase()).as_bytes());
    STANDARD
        .encode(&digest[..6])
        .replace('+', "Z")
        .replace('/', "9")
        .replace('=', "A")
}

/// Keyed digest answering the connect challenge.
///
/// Covers the challenge itself, the device secret(s), product model, MAC
/// and the caller identity, so the camera can verify both ends of the
/// pairing. The audio flag is included because it changes what the camera
/// starts streaming on success.
#[allow(clippy::too_many_arguments)]
pub fn challenge_response(
    challenge: &[u8],
    enr: &str,
    product_model: &str,
    mac: &str,
    phone_id: &str,
    open_user_id: &str,
    enable_audio: bool,
) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(enr.as_bytes());
    hasher.update(product_model.as_bytes());
    hasher.update(mac.to_uppercase().as_bytes());
    hasher.update(phone_id.as_bytes());
    hasher.update(open_user_id.as_bytes());
    hasher.update([enable_audio as u8]);

    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_key_shape() {
        let key = auth_key("0123456789abcdef", "aabbccddeeff");
        assert_eq!(key.len(), 8);
        assert!(!key.contains('+') && !key.contains('/') && !key.contains('='));
    }

    #[test]
    fn test_auth_key_is_deterministic_and_case_folds_mac() {
        let a = auth_key("secret", "aabbccddeeff");
        let b = auth_key("secret", "AABBCCDDEEFF");
        assert_eq!(a, b);
        assert_ne!(a, auth_key("other", "aabbccddeeff"));
    }

    #[test]
    fn test_challenge_response_varies_with_inputs() {
        let challenge = [7u8; 16];
        let base = challenge_response(&challenge, "enr", "MODEL", "mac", "phone", "open", true);
        let no_audio =
            challenge_response(&challenge, "enr", "MODEL", "mac", "phone", "open", false);
        let other_phone =
            challenge_response(&challenge, "enr", "MODEL", "mac", "other", "open", true);
        assert_ne!(base, no_audio);
        assert_ne!(base, other_phone);
        assert_eq!(
            base,
            challenge_response(&challenge, "enr", "MODEL", "mac", "phone", "open", true)
        );
    }
}
