//! 256-bit DHT coordinates.

use sha2::{Digest, Sha256};

/// Position in the DHT keyspace: SHA-256 of a peer id or record key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DhtId(pub [u8; 32]);

impl DhtId {
    /// Hash arbitrary bytes into the keyspace.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance to another id.
    pub fn distance(&self, other: &DhtId) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Number of leading bits shared with `other`, MSB first.
    ///
    /// Equal ids share all 256 bits.
    pub fn common_prefix_len(&self, other: &DhtId) -> usize {
        let mut count = 0;
        for byte in self.distance(other) {
            if byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count
    }

    /// The id with every byte bit-reversed, for LSB-first trie descent.
    pub fn bit_reversed(&self) -> [u8; 32] {
        let mut out = self.0;
        for byte in out.iter_mut() {
            *byte = byte.reverse_bits();
        }
        out
    }

    /// Full hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for DhtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}...", &self.to_hex()[..8])
    }
}

impl std::fmt::Debug for DhtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhtId({})", self)
    }
}
