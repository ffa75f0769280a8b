use std::fmt;

use serde::{Deserialize, Serialize};

use super::tipset::{ChainEpoch, TipSetKey};
use super::{Address, Signature, SignatureKind, TokenAmount};

/// Content identifier: blake3 over the canonical encoding of the referenced
/// object. Structural equality of these is what message dedup relies on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid([u8; 32]);

impl Cid {
    pub fn digest(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", hex::encode(self.0))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedMessage {
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub value: TokenAmount,
    pub gas_limit: i64,
    pub gas_fee_cap: TokenAmount,
    pub gas_premium: TokenAmount,
    pub method: u64,
    pub params: Vec<u8>,
}

impl UnsignedMessage {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serializing message")
    }

    pub fn cid(&self) -> Cid {
        Cid::digest(&self.canonical_bytes())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message: UnsignedMessage,
    pub signature: Signature,
}

impl SignedMessage {
    pub fn new(message: UnsignedMessage, signature: Signature) -> Self {
        Self { message, signature }
    }

    /// BLS messages are aggregated on chain, so their identifier is the bare
    /// message CID; secp messages are addressed including the signature.
    pub fn cid(&self) -> Cid {
        match self.signature.kind {
            SignatureKind::Bls => self.message.cid(),
            SignatureKind::Secp256k1 => {
                Cid::digest(&bincode::serialize(self).expect("serializing signed message"))
            }
        }
    }
}

/// Messages carried by a single block, split by signature scheme.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockMessages {
    pub bls: Vec<UnsignedMessage>,
    pub secp: Vec<SignedMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub exit_code: i64,
    pub return_data: Vec<u8>,
    pub gas_used: i64,
}

/// Result of searching the chain for an executed message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageLookup {
    pub message: Cid,
    pub receipt: MessageReceipt,
    pub tipset: TipSetKey,
    pub height: ChainEpoch,
}

/// How far back a message search may walk from its starting tipset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookback {
    Limited(ChainEpoch),
    Unlimited,
}

/// Caller hints for gas estimation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageSendSpec {
    pub max_fee: Option<TokenAmount>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MpoolChange {
    Add,
    Remove,
}

/// Pool membership change broadcast to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MpoolUpdate {
    pub kind: MpoolChange,
    pub message: SignedMessage,
}
