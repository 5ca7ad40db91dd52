//! Newline-delimited JSON frames exchanged between hosts.
//!
//! A connection opens with a two-step handshake. Both sides send a
//! [`Frame::Hello`] carrying their peer id, listen addresses and a fresh
//! nonce, then a [`Frame::Proof`] signing the other side's nonce. After that
//! requests and responses flow in both directions, correlated by `id`.

use hydra_identity::{AddrInfo, Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

/// One line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Hello(Hello),
    Proof {
        #[serde(with = "b64")]
        signature: Vec<u8>,
    },
    Request {
        id: u64,
        body: Request,
    },
    Response {
        id: u64,
        body: Response,
    },
}

/// First frame of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol id, e.g. `/ipfs/kad/1.0.0`. Mismatches are rejected.
    pub protocol: String,
    pub peer_id: PeerId,
    pub listen_addrs: Vec<Multiaddr>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
}

/// Bytes a peer signs to prove it owns its id: the remote's nonce followed by
/// its own peer-id bytes.
pub fn proof_payload(remote_nonce: &[u8], own_id: &PeerId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(remote_nonce.len() + own_id.as_bytes().len());
    payload.extend_from_slice(remote_nonce);
    payload.extend_from_slice(own_id.as_bytes());
    payload
}

/// DHT requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    FindNode {
        #[serde(with = "b64")]
        key: Vec<u8>,
    },
    /// `key` is the content multihash.
    GetProviders {
        #[serde(with = "b64")]
        key: Vec<u8>,
    },
    AddProvider {
        #[serde(with = "b64")]
        key: Vec<u8>,
        provider: AddrInfo,
    },
    PutValue {
        key: String,
        #[serde(with = "b64")]
        value: Vec<u8>,
    },
    GetValue {
        key: String,
    },
}

/// DHT responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Nodes {
        closer: Vec<AddrInfo>,
    },
    Providers {
        providers: Vec<AddrInfo>,
        closer: Vec<AddrInfo>,
    },
    Ack,
    Value {
        record: Option<Record>,
        closer: Vec<AddrInfo>,
    },
    Error {
        message: String,
    },
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "b64")]
    pub value: Vec<u8>,
}

/// Base64 (standard, padded) encoding for byte fields.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_identity::Keypair;

    #[test]
    fn frames_are_single_lines() {
        let id = Keypair::derive(b"seed", 1).unwrap().peer_id();
        let frame = Frame::Request {
            id: 7,
            body: Request::AddProvider {
                key: vec![0x12, 0x20, 1, 2, 3],
                provider: AddrInfo::new(id, vec!["/ip4/1.2.3.4/tcp/4001".parse().unwrap()]),
            },
        };
        let line = serde_json::to_string(&frame).unwrap();
        assert!(!line.contains('\n'));
        match serde_json::from_str::<Frame>(&line).unwrap() {
            Frame::Request { id, body } => {
                assert_eq!(id, 7);
                assert!(matches!(body, Request::AddProvider { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bytes_are_base64() {
        let line = serde_json::to_string(&Request::FindNode { key: vec![0xff, 0x00] }).unwrap();
        assert_eq!(line, r#"{"op":"find_node","key":"/wA="}"#);
    }

    #[test]
    fn rejects_unknown_ops() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"dance"}"#).is_err());
    }
}
