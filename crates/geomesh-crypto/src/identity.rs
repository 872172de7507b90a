//! Ed25519 peer and business keys
//!
//! Keys and signatures travel base64-encoded (standard alphabet, padded) so
//! they can be embedded in JSON reports.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Signing keypair for a peer or a business
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Identity {
    /// Fresh keypair from the OS RNG
    pub fn generate() -> Self {
        Self::from(SigningKey::generate(&mut OsRng))
    }

    /// Restore a keypair from its 32 secret bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from(SigningKey::from_bytes(bytes))
    }

    /// Secret key bytes; never leaves the device
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verifying key as embedded in reports
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.as_bytes())
    }

    /// Short hex fingerprint of the public key, for logs
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.verifying_key)
    }

    /// Public half of this identity
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            verifying_key: self.verifying_key,
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Sign a message, base64-encoding the signature
    pub fn sign_base64(&self, message: &[u8]) -> String {
        STANDARD.encode(self.sign(message))
    }

    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        self.public().verify(message, signature)
    }
}

impl From<SigningKey> for Identity {
    fn from(signing_key: SigningKey) -> Self {
        Identity {
            verifying_key: signing_key.verifying_key(),
            signing_key,
        }
    }
}

/// First 8 bytes of SHA-256 over the public key, hex encoded
fn fingerprint(verifying_key: &VerifyingKey) -> String {
    let hash = Sha256::digest(verifying_key.as_bytes());
    hash[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Verifying key of a remote signer
#[derive(Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    verifying_key: VerifyingKey,
}

impl PublicIdentity {
    /// None when the bytes are not a valid curve point
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes).ok()?;
        Some(PublicIdentity { verifying_key })
    }

    /// Create from a base64 verifying key.
    /// Returns None on malformed base64, wrong length or an invalid point.
    pub fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = STANDARD.decode(encoded).ok()?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().ok()?;
        Self::from_bytes(&bytes)
    }

    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        self.verifying_key
            .verify(message, &Signature::from_bytes(signature))
            .is_ok()
    }

    /// Verify a base64 signature; malformed input is a failed verification
    pub fn verify_base64(&self, message: &[u8], signature: &str) -> bool {
        let Ok(bytes) = STANDARD.decode(signature) else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
            return false;
        };
        self.verify(message, &bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.as_bytes())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.verifying_key)
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_keys_differ() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.public_key_base64(), b.public_key_base64());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_signature_bound_to_message_and_key() {
        let signer = Identity::generate();
        let signature = signer.sign(b"hazard at junction 4");

        assert!(signer.verify(b"hazard at junction 4", &signature));
        assert!(!signer.verify(b"hazard at junction 5", &signature));
        assert!(!Identity::generate().verify(b"hazard at junction 4", &signature));
    }

    #[test]
    fn test_public_identity_base64() {
        let identity = Identity::generate();
        let public = PublicIdentity::from_base64(&identity.public_key_base64()).unwrap();

        assert_eq!(public, identity.public());
        assert_eq!(public.fingerprint(), identity.fingerprint());

        let signature = identity.sign_base64(b"review");
        assert!(public.verify_base64(b"review", &signature));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(PublicIdentity::from_base64("not base64!!").is_none());
        // Valid base64, wrong length
        assert!(PublicIdentity::from_base64("AAAA").is_none());

        let public = Identity::generate().public();
        assert!(!public.verify_base64(b"m", "%%%"));
        assert!(!public.verify_base64(b"m", "AAAA"));
    }

    #[test]
    fn test_restore_from_secret() {
        let identity = Identity::generate();
        let restored = Identity::from_bytes(&identity.signing_key_bytes());
        assert_eq!(restored.public_key_base64(), identity.public_key_base64());
    }
}
