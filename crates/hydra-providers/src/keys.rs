//! Provider-record keys to CIDs.

use data_encoding::BASE32_NOPAD;
use hydra_datastore::Key;
use hydra_identity::{Cid, Multihash, RAW, SHA2_256};

use crate::error::KeyError;

/// Recover the CID a provider-record key (or key prefix) refers to.
///
/// The second segment of `/providers/<b32(multihash)>/...` is decoded. A
/// 32-byte SHA2-256 multihash yields a CIDv0, any other multihash a raw
/// CIDv1, and bytes that already hold a full CID are taken as is.
pub fn provider_key_to_cid(key: &Key) -> Result<Cid, KeyError> {
    let segments = key.namespaces();
    let Some(encoded) = segments.get(1) else {
        return Err(KeyError::NotEnoughNamespaces(key.to_string()));
    };
    let bytes = BASE32_NOPAD
        .decode(encoded.as_bytes())
        .map_err(|e| KeyError::InvalidBase32 {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

    if let Ok(mh) = Multihash::<64>::from_bytes(&bytes) {
        if mh.code() == SHA2_256 && mh.size() == 32 {
            if let Ok(cid) = Cid::new_v0(mh) {
                return Ok(cid);
            }
        }
        return Ok(Cid::new_v1(RAW, mh));
    }
    Cid::try_from(bytes.as_slice()).map_err(|e| KeyError::InvalidCid {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_identity::DhtId;

    fn sha256_mh(data: &[u8]) -> Multihash<64> {
        Multihash::wrap(SHA2_256, DhtId::hash(data).as_bytes()).unwrap()
    }

    fn key_for(bytes: &[u8]) -> Key {
        Key::new(format!("/providers/{}", BASE32_NOPAD.encode(bytes)))
    }

    #[test]
    fn v0_cid_round_trips() {
        let cid = Cid::new_v0(sha256_mh(b"content")).unwrap();
        assert_eq!(provider_key_to_cid(&key_for(&cid.hash().to_bytes())).unwrap(), cid);
    }

    #[test]
    fn v1_cid_keeps_its_multihash() {
        let cid = Cid::new_v1(0x71, sha256_mh(b"dag"));
        let decoded = provider_key_to_cid(&key_for(&cid.hash().to_bytes())).unwrap();
        assert_eq!(decoded.hash(), cid.hash());
    }

    #[test]
    fn non_sha256_multihash_becomes_raw_v1() {
        let mh = Multihash::<64>::wrap(0x00, b"inline").unwrap();
        let decoded = provider_key_to_cid(&key_for(&mh.to_bytes())).unwrap();
        assert_eq!(decoded, Cid::new_v1(RAW, mh));
    }

    #[test]
    fn full_record_key_uses_second_segment() {
        let cid = Cid::new_v0(sha256_mh(b"record")).unwrap();
        let key = key_for(&cid.hash().to_bytes()).child("CIQPEER");
        assert_eq!(provider_key_to_cid(&key).unwrap(), cid);
    }

    #[test]
    fn error_kinds_are_distinct() {
        assert!(matches!(
            provider_key_to_cid(&Key::new("/providers")),
            Err(KeyError::NotEnoughNamespaces(_))
        ));
        assert!(matches!(
            provider_key_to_cid(&Key::new("/providers/not-base32!")),
            Err(KeyError::InvalidBase32 { .. })
        ));
        assert!(matches!(
            provider_key_to_cid(&key_for(&[0xff, 0xff, 0xff])),
            Err(KeyError::InvalidCid { .. })
        ));
    }
}
