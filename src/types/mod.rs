mod address;
mod message;
mod tipset;

pub use address::{Address, AddressProtocol, SignMeta, SignType, Signature, SignatureKind};
pub use message::{
    BlockMessages, Cid, Lookback, MessageLookup, MessageReceipt, MessageSendSpec, MpoolChange,
    MpoolUpdate, SignedMessage, UnsignedMessage,
};
pub use tipset::{BlockHeader, ChainEpoch, HeadChange, TipSet, TipSetKey, NO_HEIGHT, NO_TIMEOUT};

/// Attotoken balance or price. Arbitrary precision, never negative.
pub type TokenAmount = malachite::Natural;
