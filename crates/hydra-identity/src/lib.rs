//! Hydra Identity
//!
//! Everything that names a peer:
//!
//! - **Keys**: [`Keypair`] wraps an Ed25519 signing key and speaks the libp2p
//!   protobuf key encoding. Keys are derived deterministically from a seed
//!   and a counter with HKDF-SHA256.
//! - **Peer IDs**: [`PeerId`] is the identity multihash of the encoded public
//!   key, displayed as a base32 CIDv1 with the `libp2p-key` codec.
//! - **DHT coordinates**: [`DhtId`] is SHA-256 of the peer-id (or record key)
//!   bytes. XOR distance over it drives routing.
//! - **Addresses**: [`Multiaddr`] and [`AddrInfo`].
//!
//! # Derivation path
//!
//! ```text
//! seed ‖ counter → HKDF → Ed25519 keypair → peer-id → DHT-ID
//! ```

mod addr;
mod dht_id;
mod error;
mod keys;
mod peer_id;

pub use addr::{AddrInfo, Multiaddr};
pub use dht_id::DhtId;
pub use error::{Error, Result};
pub use keys::{decode_public_key, encode_public_key, verify, Keypair, KEY_DERIVATION_INFO};
pub use peer_id::PeerId;

pub use cid::Cid;
pub use ed25519_dalek::VerifyingKey as PublicKey;
pub use multihash::Multihash;

/// Multicodec for SHA2-256 multihashes.
pub const SHA2_256: u64 = 0x12;

/// Multicodec for identity multihashes.
pub const IDENTITY: u64 = 0x00;

/// Multicodec for raw binary CIDs.
pub const RAW: u64 = 0x55;

/// Multicodec for CIDs naming a libp2p public key.
pub const LIBP2P_KEY: u64 = 0x72;

/// Build a CIDv1 with the raw codec around multihash bytes.
pub fn cid_from_multihash_bytes(bytes: &[u8]) -> Result<Cid> {
    let mh = Multihash::<64>::from_bytes(bytes).map_err(|e| Error::InvalidMultihash(e.to_string()))?;
    Ok(Cid::new_v1(RAW, mh))
}
