//! # Keys and Schnorr Signatures
//!
//! BIP-340 Schnorr signing over secp256k1. Signatures cover the 32-byte event
//! id only, never the event body.

use secp256k1::{schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use std::fmt;

use crate::error::SignatureError;

/// A signing key pair.
///
/// `Debug` prints only the public key; hex via [`Keys::secret_key_hex`] is the
/// only way to get the secret out.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: XOnlyPublicKey,
}

impl Keys {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut secp256k1::rand::thread_rng());
        Self::from_keypair(keypair)
    }

    /// Load a key pair from a 32-byte hex secret.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, SignatureError> {
        let bytes = decode_fixed::<32>("secret_key", secret_hex)?;
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &bytes)
            .map_err(|_| SignatureError::InvalidSecretKey)?;
        Ok(Self::from_keypair(keypair))
    }

    fn from_keypair(keypair: Keypair) -> Self {
        let (public_key, _parity) = keypair.x_only_public_key();
        Self {
            keypair,
            public_key,
        }
    }

    /// x-only public key, 64 hex characters.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Secret key, 64 hex characters.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// Sign a 32-byte digest.
    pub fn sign_digest(&self, digest: [u8; 32]) -> schnorr::Signature {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(digest);
        secp.sign_schnorr(&message, &self.keypair)
    }

    /// Sign a hex event id, returning the 128-hex-character signature.
    pub fn sign_id(&self, id_hex: &str) -> Result<String, SignatureError> {
        let digest = decode_fixed::<32>("id", id_hex)?;
        Ok(self.sign_digest(digest).to_string())
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a Schnorr signature over a hex event id.
///
/// Each malformed input is reported as its own error kind; a well-formed
/// signature that does not verify is [`SignatureError::VerificationFailed`].
pub fn verify_signature(id_hex: &str, sig_hex: &str, pubkey_hex: &str) -> Result<(), SignatureError> {
    let digest = decode_fixed::<32>("id", id_hex)?;
    let sig_bytes = decode_fixed::<64>("sig", sig_hex)?;
    let pubkey_bytes = decode_fixed::<32>("pubkey", pubkey_hex)?;

    let public_key = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))?;
    let signature = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| SignatureError::InvalidEncoding(e.to_string()))?;
    let message = Message::from_digest(digest);

    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&signature, &message, &public_key)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Pass/fail wrapper around [`verify_signature`].
pub fn verify(id_hex: &str, sig_hex: &str, pubkey_hex: &str) -> bool {
    verify_signature(id_hex, sig_hex, pubkey_hex).is_ok()
}

fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], SignatureError> {
    let bytes = hex::decode(value).map_err(|e| SignatureError::Hex {
        field,
        reason: e.to_string(),
    })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| SignatureError::BadLength {
        field,
        expected: N,
        actual,
    })
}
