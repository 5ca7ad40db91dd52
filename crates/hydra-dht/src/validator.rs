//! Record validators for the `pk` and `ipns` namespaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hydra_identity::{decode_public_key, encode_public_key, verify, Keypair, PeerId};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wire::b64;

/// Checks record values before they are stored or returned.
pub trait Validator: Send + Sync {
    fn validate(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Index of the best of several valid values.
    fn select(&self, key: &str, values: &[Vec<u8>]) -> Result<usize>;
}

/// Split `/<namespace>/<rest>`.
fn split_key(key: &str) -> Result<(&str, &str)> {
    let trimmed = key
        .strip_prefix('/')
        .ok_or_else(|| Error::Validation(format!("key {key:?} has no namespace")))?;
    trimmed
        .split_once('/')
        .ok_or_else(|| Error::Validation(format!("key {key:?} has no namespace")))
}

fn peer_from_key(key: &str, namespace: &str) -> Result<PeerId> {
    let (ns, rest) = split_key(key)?;
    if ns != namespace {
        return Err(Error::Validation(format!("expected /{namespace} key, got {key:?}")));
    }
    rest.parse()
        .map_err(|e| Error::Validation(format!("bad peer id in {key:?}: {e}")))
}

/// `/pk/<peer-id>` must hold the encoded public key of that peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublicKeyValidator;

impl Validator for PublicKeyValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<()> {
        let peer = peer_from_key(key, "pk")?;
        let public = decode_public_key(value)
            .map_err(|e| Error::Validation(format!("bad public key: {e}")))?;
        if PeerId::from_public_key(&public) != peer {
            return Err(Error::Validation("public key does not match peer id".into()));
        }
        Ok(())
    }

    fn select(&self, _key: &str, values: &[Vec<u8>]) -> Result<usize> {
        if values.is_empty() {
            return Err(Error::Validation("no values to select from".into()));
        }
        Ok(0)
    }
}

/// A signed name record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpnsRecord {
    #[serde(with = "b64")]
    pub value: Vec<u8>,
    pub sequence: u64,
    /// Expiry, seconds since the Unix epoch.
    pub validity: u64,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl IpnsRecord {
    /// Create and sign a record.
    pub fn sign(key: &Keypair, value: Vec<u8>, sequence: u64, validity: u64) -> Self {
        let signature = key.sign(&Self::signable(&value, sequence, validity)).to_vec();
        Self {
            value,
            sequence,
            validity,
            public_key: encode_public_key(&key.public()),
            signature,
        }
    }

    fn signable(value: &[u8], sequence: u64, validity: u64) -> Vec<u8> {
        let mut out = b"ipns-signature:".to_vec();
        out.extend_from_slice(value);
        out.extend_from_slice(&validity.to_be_bytes());
        out.extend_from_slice(&sequence.to_be_bytes());
        out
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Validation(format!("bad ipns record: {e}")))
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `/ipns/<peer-id>` must hold an unexpired record signed by that peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpnsValidator;

impl Validator for IpnsValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<()> {
        let name = peer_from_key(key, "ipns")?;
        let record = IpnsRecord::decode(value)?;
        let public = decode_public_key(&record.public_key)
            .map_err(|e| Error::Validation(format!("bad public key: {e}")))?;
        if PeerId::from_public_key(&public) != name {
            return Err(Error::Validation("record key does not match name".into()));
        }
        let signable = IpnsRecord::signable(&record.value, record.sequence, record.validity);
        if !verify(&public, &signable, &record.signature) {
            return Err(Error::Validation("bad record signature".into()));
        }
        if record.validity <= now_secs() {
            return Err(Error::Validation("record expired".into()));
        }
        Ok(())
    }

    /// Highest sequence wins, then the later expiry. Undecodable values lose.
    fn select(&self, _key: &str, values: &[Vec<u8>]) -> Result<usize> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| IpnsRecord::decode(v).ok().map(|r| (i, r)))
            .max_by(|(ia, a), (ib, b)| {
                (a.sequence, a.validity)
                    .cmp(&(b.sequence, b.validity))
                    // Earlier index wins ties.
                    .then(ib.cmp(ia))
            })
            .map(|(i, _)| i)
            .ok_or_else(|| Error::Validation("no valid ipns records".into()))
    }
}

/// Dispatches on the first key segment.
#[derive(Default, Clone)]
pub struct NamespacedValidator {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl NamespacedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validators for `pk` and `ipns`.
    pub fn with_defaults() -> Self {
        let mut v = Self::new();
        v.insert("pk", Arc::new(PublicKeyValidator));
        v.insert("ipns", Arc::new(IpnsValidator));
        v
    }

    pub fn insert(&mut self, namespace: &str, validator: Arc<dyn Validator>) {
        self.validators.insert(namespace.to_string(), validator);
    }

    fn for_key(&self, key: &str) -> Result<&Arc<dyn Validator>> {
        let (ns, _) = split_key(key)?;
        self.validators
            .get(ns)
            .ok_or_else(|| Error::Validation(format!("no validator for namespace {ns:?}")))
    }
}

impl Validator for NamespacedValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<()> {
        self.for_key(key)?.validate(key, value)
    }

    fn select(&self, key: &str, values: &[Vec<u8>]) -> Result<usize> {
        self.for_key(key)?.select(key, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> Keypair {
        Keypair::derive(b"validator", i).unwrap()
    }

    #[test]
    fn public_key_records() {
        let k = key(1);
        let record_key = format!("/pk/{}", k.peer_id());
        let v = PublicKeyValidator;
        assert!(v.validate(&record_key, &encode_public_key(&k.public())).is_ok());
        assert!(v.validate(&record_key, &encode_public_key(&key(2).public())).is_err());
        assert!(v.validate("/pk/garbage", &encode_public_key(&k.public())).is_err());
    }

    #[test]
    fn ipns_records() {
        let k = key(1);
        let name = format!("/ipns/{}", k.peer_id());
        let future = now_secs() + 3600;
        let v = IpnsValidator;

        let good = IpnsRecord::sign(&k, b"/ipfs/bafy".to_vec(), 1, future);
        assert!(v.validate(&name, &good.encode().unwrap()).is_ok());

        let expired = IpnsRecord::sign(&k, b"/ipfs/bafy".to_vec(), 1, now_secs() - 1);
        assert!(v.validate(&name, &expired.encode().unwrap()).is_err());

        let mut tampered = good.clone();
        tampered.sequence = 9;
        assert!(v.validate(&name, &tampered.encode().unwrap()).is_err());

        let foreign = IpnsRecord::sign(&key(2), b"x".to_vec(), 1, future);
        assert!(v.validate(&name, &foreign.encode().unwrap()).is_err());
    }

    #[test]
    fn ipns_select_prefers_higher_sequence() {
        let k = key(1);
        let future = now_secs() + 3600;
        let values = vec![
            IpnsRecord::sign(&k, b"a".to_vec(), 1, future).encode().unwrap(),
            IpnsRecord::sign(&k, b"b".to_vec(), 3, future).encode().unwrap(),
            b"junk".to_vec(),
            IpnsRecord::sign(&k, b"c".to_vec(), 3, future).encode().unwrap(),
        ];
        assert_eq!(IpnsValidator.select("/ipns/x", &values).unwrap(), 1);
    }

    #[test]
    fn namespaced_dispatch() {
        let v = NamespacedValidator::with_defaults();
        let k = key(1);
        assert!(v
            .validate(&format!("/pk/{}", k.peer_id()), &encode_public_key(&k.public()))
            .is_ok());
        assert!(v.validate("/other/x", b"v").is_err());
        assert!(v.validate("nonamespace", b"v").is_err());
    }
}
