//! Collaborator contracts the event engine and pool front-end consume. The
//! chain service, wallet, backing pool, and gas estimator all live behind
//! these traits; the cores never reach past them.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::PoolConfig;
use crate::errors::ChainResult;
use crate::types::{
    Address, BlockHeader, BlockMessages, Cid, Lookback, MessageLookup, MessageSendSpec,
    MpoolUpdate, SignMeta, Signature, SignedMessage, TipSet, TipSetKey, TokenAmount,
    UnsignedMessage,
};

/// Read-only view of the chain the cores depend on. Implementations must be
/// safe for concurrent reads.
pub trait ChainStore: Send + Sync {
    /// The most recent applied tipset.
    fn head(&self) -> ChainResult<Arc<TipSet>>;

    fn tipset(&self, key: &TipSetKey) -> ChainResult<Arc<TipSet>>;

    fn block_messages(&self, block: &Cid) -> ChainResult<BlockMessages>;

    /// Resolves an address to the key address controlling it, as of the state
    /// named by `key`. The empty key means the current head.
    fn resolve_account_key(&self, addr: &Address, key: &TipSetKey) -> ChainResult<Address>;

    /// The next expected nonce of the account, as of the state named by `key`.
    fn account_nonce(&self, addr: &Address, key: &TipSetKey) -> ChainResult<u64>;

    /// Searches the chain backwards from `key` for the execution of `msg`.
    fn search_message(
        &self,
        key: &TipSetKey,
        msg: &Cid,
        lookback: Lookback,
        allow_replaced: bool,
    ) -> ChainResult<Option<MessageLookup>>;
}

/// Signing and balance backend. Wallet backends are frequently
/// single-threaded; callers serialize signing through the pool front-end.
pub trait WalletApi: Send + Sync {
    fn balance(&self, addr: &Address) -> ChainResult<TokenAmount>;

    fn sign(&self, addr: &Address, bytes: &[u8], meta: &SignMeta) -> ChainResult<Signature>;

    fn has(&self, addr: &Address) -> ChainResult<bool>;
}

/// The backing message pool. Owns pending-set state and block-candidate
/// selection; the front-end only orchestrates submissions into it.
pub trait MessagePool: Send + Sync {
    /// Next nonce for the sender, accounting for messages already pending.
    fn next_nonce(&self, addr: &Address) -> ChainResult<u64>;

    fn push(&self, msg: &SignedMessage) -> ChainResult<Cid>;

    fn push_untrusted(&self, msg: &SignedMessage) -> ChainResult<Cid>;

    /// Current pending set together with the tipset it was computed against.
    fn pending(&self) -> ChainResult<(Vec<SignedMessage>, Arc<TipSet>)>;

    fn select(&self, ts: &TipSet, ticket_quality: f64) -> ChainResult<Vec<SignedMessage>>;

    fn select_many(
        &self,
        ts: &TipSet,
        ticket_qualities: &[f64],
    ) -> ChainResult<Vec<Vec<SignedMessage>>>;

    /// Signed messages carried by the given blocks, signatures recovered
    /// where the chain stores them aggregated.
    fn messages_for_blocks(&self, blocks: &[BlockHeader]) -> ChainResult<Vec<SignedMessage>>;

    fn clear(&self, local: bool);

    fn delete_by_address(&self, addr: &Address) -> ChainResult<()>;

    fn config(&self) -> PoolConfig;

    fn set_config(&self, config: PoolConfig) -> ChainResult<()>;

    fn updates(&self) -> broadcast::Receiver<MpoolUpdate>;
}

/// Gas estimation backend.
pub trait GasEstimator: Send + Sync {
    /// Returns a copy of `msg` with unset gas fields populated.
    fn estimate_message_gas(
        &self,
        msg: &UnsignedMessage,
        spec: Option<&MessageSendSpec>,
        key: &TipSetKey,
    ) -> ChainResult<UnsignedMessage>;

    fn estimate_fee_cap(
        &self,
        msg: &UnsignedMessage,
        max_queue_blocks: i64,
        key: &TipSetKey,
    ) -> ChainResult<TokenAmount>;

    fn estimate_gas_premium(
        &self,
        blocks_incl: u64,
        sender: &Address,
        gas_limit: i64,
        key: &TipSetKey,
    ) -> ChainResult<TokenAmount>;
}
