//! Two-choice balanced generator.

use async_trait::async_trait;
use hydra_identity::Keypair;
use hydra_trie::{BitKey, XorTrie};
use parking_lot::Mutex;
use rand::RngCore;
use tracing::debug;

use crate::error::{Error, Result};
use crate::IdentityGenerator;

struct State {
    trie: XorTrie,
    counter: u32,
    seed: [u8; 32],
}

impl State {
    /// Advance the counter and derive the key it names.
    fn next_key(&mut self) -> Result<(Keypair, BitKey)> {
        self.counter = self.counter.checked_add(1).ok_or(Error::CounterExhausted)?;
        let key = Keypair::derive(&self.seed, self.counter)?;
        let bits = trie_key(&key);
        Ok((key, bits))
    }
}

/// Trie key of an identity: its DHT-ID with every byte bit-reversed, so that
/// trie prefixes follow DHT common prefixes.
fn trie_key(key: &Keypair) -> BitKey {
    BitKey::from(key.peer_id().dht_id().bit_reversed())
}

/// Depth `bits` would land at, leaving the trie unchanged.
fn trial_depth(trie: &mut XorTrie, bits: &BitKey) -> usize {
    let (depth, added) = trie.insert(bits.clone());
    if added {
        trie.remove(bits);
    }
    depth
}

/// Generates identities whose DHT-IDs spread evenly over the keyspace.
///
/// A single lock covers the trie and the counter.
pub struct BalancedGenerator {
    state: Mutex<State>,
}

impl BalancedGenerator {
    /// Create a generator. The first key is derived from counter `offset + 1`.
    pub fn new(seed: [u8; 32], offset: u32) -> Self {
        Self {
            state: Mutex::new(State {
                trie: XorTrie::new(),
                counter: offset,
                seed,
            }),
        }
    }

    /// Create a generator from a fresh random seed.
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self::new(seed, 0)
    }

    /// Produce the better of two candidate identities and record it.
    ///
    /// The candidate whose DHT-ID lands shallower in the trie wins. Ties go
    /// to the second candidate.
    pub fn add_balanced(&self) -> Result<Keypair> {
        let mut state = self.state.lock();
        let (first, first_bits) = state.next_key()?;
        let (second, second_bits) = state.next_key()?;

        let first_depth = trial_depth(&mut state.trie, &first_bits);
        let second_depth = trial_depth(&mut state.trie, &second_bits);

        let (key, bits, depth) = if first_depth < second_depth {
            (first, first_bits, first_depth)
        } else {
            (second, second_bits, second_depth)
        };
        state.trie.insert(bits);
        debug!(peer = %key.peer_id(), depth, counter = state.counter, "generated identity");
        Ok(key)
    }

    /// Produce the next identity without balancing.
    #[cfg(test)]
    pub(crate) fn add_unbalanced(&self) -> Result<Keypair> {
        let mut state = self.state.lock();
        let (key, bits) = state.next_key()?;
        state.trie.insert(bits);
        Ok(key)
    }

    /// Forget an identity. Returns whether it was live.
    pub fn remove(&self, key: &Keypair) -> bool {
        let bits = trie_key(key);
        let (_, removed) = self.state.lock().trie.remove(&bits);
        removed
    }

    /// Number of live identities.
    pub fn count(&self) -> usize {
        self.state.lock().trie.len()
    }

    /// Depth of the trie of live identities.
    pub fn depth(&self) -> usize {
        self.state.lock().trie.depth()
    }
}

#[async_trait]
impl IdentityGenerator for BalancedGenerator {
    async fn add_balanced(&self) -> Result<Keypair> {
        BalancedGenerator::add_balanced(self)
    }

    async fn remove(&self, key: &Keypair) -> Result<()> {
        BalancedGenerator::remove(self, key);
        Ok(())
    }
}
