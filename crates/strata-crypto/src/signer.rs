use crate::hasher::ContentHasher;

/// Algorithm tag written next to every signature and public key.
pub const SIGNATURE_ALGO: &str = "ed25519";

/// Ed25519 signing key (private).
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Ed25519 verifying key (public).
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

/// Ed25519 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Deterministically derive a key pair from arbitrary seed material.
    ///
    /// The secret is the SHA-256 digest of the seed, so equal seeds always
    /// yield equal keys.
    pub fn derive_from_seed(seed: &[u8]) -> Self {
        Self::from_bytes(ContentHasher::SHA256.digest(seed))
    }

    /// Create from raw 32-byte secret.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Parse a hex-encoded 32-byte secret.
    pub fn from_hex(text: &str) -> Result<Self, SignatureError> {
        Ok(Self::from_bytes(decode_fixed(text)?))
    }

    /// The corresponding public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message))
    }

    /// Raw secret key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Hex-encoded secret key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl VerifyingKey {
    /// Verify a signature on a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        use ed25519_dalek::Verifier;
        self.0
            .verify(message, &signature.0)
            .map_err(|_| SignatureError::InvalidSignature)
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Create from raw 32-byte public key.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, SignatureError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self(key))
    }

    /// Parse a hex-encoded public key, as stored in identity objects.
    pub fn from_hex(text: &str) -> Result<Self, SignatureError> {
        Self::from_bytes(decode_fixed(text)?)
    }

    /// Hex-encoded public key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl Signature {
    /// Parse raw 64-byte signature bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| SignatureError::InvalidLength {
            expected: 64,
            actual: bytes.len(),
        })?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&arr)))
    }

    /// Parse a hex-encoded signature digest.
    pub fn from_hex(text: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(text).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Raw signature bytes.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    /// Hex-encoded signature digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

fn decode_fixed(text: &str) -> Result<[u8; 32], SignatureError> {
    let bytes = hex::decode(text).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| SignatureError::InvalidLength {
        expected: 32,
        actual: len,
    })
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", hex::encode(self.0.to_bytes()))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0.to_bytes()[..8]))
    }
}

/// Errors from signing operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let sk = SigningKey::generate();
        let vk = sk.verifying_key();
        let sig = sk.sign(b"hello world");
        assert!(vk.verify(b"hello world", &sig).is_ok());
    }

    #[test]
    fn verify_fails_on_wrong_message() {
        let sk = SigningKey::generate();
        let sig = sk.sign(b"correct message");
        assert_eq!(
            sk.verifying_key().verify(b"wrong message", &sig),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn verify_fails_with_wrong_key() {
        let sig = SigningKey::generate().sign(b"message");
        assert!(SigningKey::generate()
            .verifying_key()
            .verify(b"message", &sig)
            .is_err());
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = SigningKey::derive_from_seed(b"alice:correct horse");
        let b = SigningKey::derive_from_seed(b"alice:correct horse");
        let c = SigningKey::derive_from_seed(b"bob:correct horse");
        assert_eq!(a.verifying_key(), b.verifying_key());
        assert_ne!(a.verifying_key(), c.verifying_key());
    }

    #[test]
    fn hex_roundtrips() {
        let sk = SigningKey::generate();
        let sk2 = SigningKey::from_hex(&sk.to_hex()).unwrap();
        assert_eq!(sk.verifying_key(), sk2.verifying_key());

        let vk = VerifyingKey::from_hex(&sk.verifying_key().to_hex()).unwrap();
        assert_eq!(vk, sk.verifying_key());

        let sig = sk.sign(b"m");
        assert_eq!(Signature::from_hex(&sig.to_hex()).unwrap(), sig);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(
            VerifyingKey::from_hex("nothex"),
            Err(SignatureError::InvalidHex(_))
        ));
        assert_eq!(
            Signature::from_slice(&[0u8; 10]),
            Err(SignatureError::InvalidLength {
                expected: 64,
                actual: 10
            })
        );
    }

    #[test]
    fn debug_redacts_signing_key() {
        let sk = SigningKey::generate();
        assert!(format!("{sk:?}").contains("redacted"));
    }
}
