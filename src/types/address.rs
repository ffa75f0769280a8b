use std::fmt;

use serde::{Deserialize, Serialize};

/// Account identifier. ID addresses are compact aliases assigned on-chain and
/// must be resolved to a key address before anything is signed for them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Address {
    Id(u64),
    Secp256k1(String),
    Bls(String),
}

impl Address {
    pub fn protocol(&self) -> AddressProtocol {
        match self {
            Address::Id(_) => AddressProtocol::Id,
            Address::Secp256k1(_) => AddressProtocol::Secp256k1,
            Address::Bls(_) => AddressProtocol::Bls,
        }
    }

    pub fn is_id(&self) -> bool {
        matches!(self, Address::Id(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Id(id) => write!(f, "tm0{id}"),
            Address::Secp256k1(key) => write!(f, "tm1{key}"),
            Address::Bls(key) => write!(f, "tm2{key}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressProtocol {
    Id,
    Secp256k1,
    Bls,
}

/// Signature algorithm tag. Carried alongside the raw bytes; interpreted by
/// the wallet, never by the pool front-end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureKind {
    Bls,
    Secp256k1,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    pub bytes: Vec<u8>,
}

impl Signature {
    pub fn new(kind: SignatureKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }
}

/// Domain tag attached to wallet signing requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignType {
    ChainMessage,
    Unknown,
}

/// Signing request metadata: the domain tag plus the serialized payload the
/// signature commits to, for wallets that re-derive the digest themselves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignMeta {
    pub msg_type: SignType,
    pub extra: Vec<u8>,
}

impl SignMeta {
    pub fn chain_message(extra: Vec<u8>) -> Self {
        Self {
            msg_type: SignType::ChainMessage,
            extra,
        }
    }

    pub fn unknown() -> Self {
        Self {
            msg_type: SignType::Unknown,
            extra: Vec::new(),
        }
    }
}
