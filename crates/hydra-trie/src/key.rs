//! Fixed-width bit keys.

/// A fixed-length bit string addressable by index.
///
/// Bit `i` is bit `i % 8` of byte `i / 8`, counted from the least significant
/// bit. Callers that need most-significant-bit-first order over a big-endian
/// identifier reverse the bits of every byte before building the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitKey(Vec<u8>);

impl BitKey {
    /// Wrap raw bytes as a key.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Build a key from bytes with the bit order of every byte reversed.
    pub fn from_reversed(bytes: &[u8]) -> Self {
        Self(bytes.iter().map(|b| b.reverse_bits()).collect())
    }

    /// Number of addressable bits.
    pub fn bit_len(&self) -> usize {
        self.0.len() * 8
    }

    /// The bit at `offset`, as 0 or 1.
    ///
    /// Offsets past the end read as 0 so that a key which is a byte-prefix of
    /// another still descends deterministically.
    #[inline]
    pub fn bit_at(&self, offset: usize) -> usize {
        match self.0.get(offset / 8) {
            Some(byte) => ((byte >> (offset % 8)) & 1) as usize,
            None => 0,
        }
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex string of the raw bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<[u8; 32]> for BitKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

impl std::fmt::Display for BitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}...", &hex[..hex.len().min(8)])
    }
}
