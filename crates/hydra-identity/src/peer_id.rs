//! Peer identifiers.

use std::str::FromStr;

use cid::Cid;
use ed25519_dalek::VerifyingKey;
use multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::keys::{decode_public_key, encode_public_key};
use crate::{DhtId, IDENTITY, LIBP2P_KEY};

/// A peer identifier: the multihash of the peer's encoded public key.
///
/// Ed25519 keys are short enough to be inlined with the identity hash, so the
/// public key can be recovered from the id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Peer id for a public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        let encoded = encode_public_key(key);
        let mut bytes = Vec::with_capacity(2 + encoded.len());
        bytes.push(IDENTITY as u8);
        bytes.push(encoded.len() as u8);
        bytes.extend_from_slice(&encoded);
        Self(bytes)
    }

    /// Decode from multihash bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Multihash::<64>::from_bytes(bytes).map_err(|e| Error::InvalidPeerId(e.to_string()))?;
        Ok(Self(bytes.to_vec()))
    }

    /// Raw multihash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Owned multihash bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    /// Recover the public key for identity-hashed ids.
    pub fn public_key(&self) -> Option<VerifyingKey> {
        let mh = Multihash::<64>::from_bytes(&self.0).ok()?;
        if mh.code() != IDENTITY {
            return None;
        }
        decode_public_key(mh.digest()).ok()
    }

    /// Position of this peer in the DHT keyspace.
    pub fn dht_id(&self) -> DhtId {
        DhtId::hash(&self.0)
    }

    /// The last 8 characters of the textual form, for logs.
    pub fn short(&self) -> String {
        let full = self.to_string();
        let start = full.len().saturating_sub(8);
        format!("…{}", &full[start..])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match Multihash::<64>::from_bytes(&self.0) {
            Ok(mh) => write!(f, "{}", Cid::new_v1(LIBP2P_KEY, mh)),
            Err(_) => write!(f, "{}", hex::encode(&self.0)),
        }
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let cid = Cid::try_from(s).map_err(|e| Error::InvalidPeerId(e.to_string()))?;
        if cid.codec() != LIBP2P_KEY {
            return Err(Error::InvalidPeerId(format!(
                "unexpected codec 0x{:x}",
                cid.codec()
            )));
        }
        Ok(Self(cid.hash().to_bytes()))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
