//! Ed25519 keys and their libp2p protobuf encoding.
//!
//! Encoded private key: `08 01 12 40 ‖ secret(32) ‖ public(32)`.
//! Encoded public key: `08 01 12 20 ‖ public(32)`.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::PeerId;

/// HKDF info string used for every derived identity.
pub const KEY_DERIVATION_INFO: &[u8] = b"hydra keys";

const KEY_TYPE_ED25519: u8 = 1;
const PRIVATE_KEY_PREFIX: [u8; 4] = [0x08, KEY_TYPE_ED25519, 0x12, 0x40];
const PUBLIC_KEY_PREFIX: [u8; 4] = [0x08, KEY_TYPE_ED25519, 0x12, 0x20];

/// An Ed25519 identity keypair.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Create from a 32-byte secret.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    /// Derive the keypair for `counter` from `seed`.
    ///
    /// HKDF-SHA256 with the seed as input key material, the counter as a
    /// little-endian u32 salt and [`KEY_DERIVATION_INFO`] as info. The same
    /// seed and counter always yield the same key.
    pub fn derive(seed: &[u8], counter: u32) -> Result<Self> {
        let salt = counter.to_le_bytes();
        let hk = Hkdf::<Sha256>::new(Some(&salt), seed);
        let mut secret = [0u8; 32];
        hk.expand(KEY_DERIVATION_INFO, &mut secret)
            .map_err(|e| Error::Derivation(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    /// The verifying half.
    pub fn public(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Peer id of this keypair.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public())
    }

    /// Sign a message.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing.sign(msg).to_bytes()
    }

    /// The 32-byte secret.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Encode as a libp2p protobuf private key.
    pub fn to_protobuf(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PRIVATE_KEY_PREFIX.len() + 64);
        out.extend_from_slice(&PRIVATE_KEY_PREFIX);
        out.extend_from_slice(&self.signing.to_keypair_bytes());
        out
    }

    /// Decode a libp2p protobuf private key.
    pub fn from_protobuf(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(&PRIVATE_KEY_PREFIX[..])
            .ok_or_else(|| Error::InvalidKey("not an ed25519 private key".into()))?;
        let keypair: [u8; 64] = body
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("expected 64 key bytes, got {}", body.len())))?;
        let signing = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self { signing })
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.signing.to_bytes() == other.signing.to_bytes()
    }
}

impl Eq for Keypair {}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

/// Encode a public key in the libp2p protobuf form.
pub fn encode_public_key(key: &VerifyingKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(PUBLIC_KEY_PREFIX.len() + 32);
    out.extend_from_slice(&PUBLIC_KEY_PREFIX);
    out.extend_from_slice(key.as_bytes());
    out
}

/// Decode a libp2p protobuf public key.
pub fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey> {
    let body = bytes
        .strip_prefix(&PUBLIC_KEY_PREFIX[..])
        .ok_or_else(|| Error::InvalidKey("not an ed25519 public key".into()))?;
    let raw: [u8; 32] = body
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("expected 32 key bytes, got {}", body.len())))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Check an Ed25519 signature.
pub fn verify(key: &VerifyingKey, msg: &[u8], signature: &[u8]) -> bool {
    match Signature::from_slice(signature) {
        Ok(sig) => key.verify(msg, &sig).is_ok(),
        Err(_) => false,
    }
}
