//! Message pool front-end: the submission path between callers and the
//! backing pool. Serializes per-sender pushes, owns nonce assignment, and
//! orchestrates gas estimation, signing, and fan-out into block building.

mod locks;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::PoolConfig;
use crate::errors::{ChainError, ChainResult};
use crate::interfaces::{ChainStore, GasEstimator, MessagePool, WalletApi};
use crate::types::{
    Address, Cid, MessageSendSpec, MpoolUpdate, SignMeta, Signature, SignedMessage, TipSet,
    TipSetKey, TokenAmount, UnsignedMessage,
};

use locks::SenderLocks;

/// Outcome of a batch submission: everything accepted before the first
/// failure, plus the failure itself when one occurred.
pub struct BatchSubmission<T> {
    pub accepted: Vec<T>,
    pub failure: Option<ChainError>,
}

pub struct MpoolService<C, P, W, G> {
    chain: Arc<C>,
    pool: Arc<P>,
    wallet: Arc<W>,
    gas: Arc<G>,
    push_locks: SenderLocks,
    /// Serializes nonce assignment and wallet signing across all senders.
    /// Always acquired inside a sender lock, never the other way around.
    sign_lock: Mutex<()>,
}

impl<C, P, W, G> MpoolService<C, P, W, G>
where
    C: ChainStore,
    P: MessagePool,
    W: WalletApi,
    G: GasEstimator,
{
    pub fn new(chain: Arc<C>, pool: Arc<P>, wallet: Arc<W>, gas: Arc<G>) -> Self {
        Self {
            chain,
            pool,
            wallet,
            gas,
            push_locks: SenderLocks::default(),
            sign_lock: Mutex::new(()),
        }
    }

    /// Atomically assigns a nonce, signs, and pushes a message. The caller
    /// must leave the nonce at zero; assignment belongs to the front-end.
    pub fn push_message(
        &self,
        token: &CancellationToken,
        msg: &UnsignedMessage,
        spec: Option<&MessageSendSpec>,
    ) -> ChainResult<SignedMessage> {
        let from_key = self
            .chain
            .resolve_account_key(&msg.from, &TipSetKey::empty())
            .map_err(|err| ChainError::ChainRead(format!("resolving sender key: {err}")))?;

        self.push_locks.with_locked(&from_key, || {
            if token.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            if msg.nonce != 0 {
                return Err(ChainError::InvalidCaller(format!(
                    "expected message nonce to be 0, was {}",
                    msg.nonce
                )));
            }

            let mut estimated = self
                .gas
                .estimate_message_gas(msg, spec, &TipSetKey::empty())
                .map_err(|err| ChainError::GasEstimation(format!("estimating gas: {err}")))?;

            if estimated.gas_premium > estimated.gas_fee_cap {
                let submitted = serde_json::to_string(msg)?;
                let adjusted = serde_json::to_string(&estimated)?;
                return Err(ChainError::InvalidCaller(format!(
                    "after estimation gas premium is greater than gas fee cap, \
                     inmsg: {submitted}, outmsg: {adjusted}"
                )));
            }

            if estimated.from.is_id() {
                warn!(from = %estimated.from, resolved = %from_key, "push from ID address, adjusting to key address");
                estimated.from = from_key.clone();
            }

            if token.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            let balance = self
                .wallet
                .balance(&estimated.from)
                .map_err(|err| ChainError::Wallet(format!("reading origin balance: {err}")))?;
            if balance < estimated.value {
                return Err(ChainError::InvalidCaller(format!(
                    "mpool push: not enough funds: {balance} < {}",
                    estimated.value
                )));
            }

            let _sign = self.sign_lock.lock();
            let nonce = self
                .pool
                .next_nonce(&estimated.from)
                .map_err(|err| ChainError::Pool(format!("reading next nonce: {err}")))?;
            estimated.nonce = nonce;
            let bytes = estimated.canonical_bytes();
            let cid = estimated.cid();
            let signature = self
                .wallet
                .sign(
                    &estimated.from,
                    cid.as_bytes(),
                    &SignMeta::chain_message(bytes),
                )
                .map_err(|err| ChainError::Wallet(format!("failed to sign message: {err}")))?;
            let signed = SignedMessage::new(estimated, signature);
            self.pool
                .push(&signed)
                .map_err(|err| ChainError::Pool(format!("mpool push: {err}")))?;
            Ok(signed)
        })
    }

    /// Sequential fold over [`MpoolService::push_message`]; stops at the
    /// first failure and reports everything accepted before it.
    pub fn batch_push_message(
        &self,
        token: &CancellationToken,
        msgs: &[UnsignedMessage],
        spec: Option<&MessageSendSpec>,
    ) -> BatchSubmission<SignedMessage> {
        let mut accepted = Vec::with_capacity(msgs.len());
        for msg in msgs {
            match self.push_message(token, msg, spec) {
                Ok(signed) => accepted.push(signed),
                Err(err) => {
                    return BatchSubmission {
                        accepted,
                        failure: Some(err),
                    };
                }
            }
        }
        BatchSubmission {
            accepted,
            failure: None,
        }
    }

    /// Forwards a pre-signed message to the pool.
    pub fn push(&self, token: &CancellationToken, msg: &SignedMessage) -> ChainResult<Cid> {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        self.pool
            .push(msg)
            .map_err(|err| ChainError::Pool(format!("mpool push: {err}")))
    }

    /// Forwards a pre-signed message from an untrusted source to the pool.
    pub fn push_untrusted(
        &self,
        token: &CancellationToken,
        msg: &SignedMessage,
    ) -> ChainResult<Cid> {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        self.pool
            .push_untrusted(msg)
            .map_err(|err| ChainError::Pool(format!("mpool push untrusted: {err}")))
    }

    pub fn batch_push(
        &self,
        token: &CancellationToken,
        msgs: &[SignedMessage],
    ) -> BatchSubmission<Cid> {
        self.batch_signed(msgs, |msg| self.push(token, msg))
    }

    pub fn batch_push_untrusted(
        &self,
        token: &CancellationToken,
        msgs: &[SignedMessage],
    ) -> BatchSubmission<Cid> {
        self.batch_signed(msgs, |msg| self.push_untrusted(token, msg))
    }

    fn batch_signed(
        &self,
        msgs: &[SignedMessage],
        push: impl Fn(&SignedMessage) -> ChainResult<Cid>,
    ) -> BatchSubmission<Cid> {
        let mut accepted = Vec::with_capacity(msgs.len());
        for msg in msgs {
            match push(msg) {
                Ok(cid) => accepted.push(cid),
                Err(err) => {
                    return BatchSubmission {
                        accepted,
                        failure: Some(err),
                    };
                }
            }
        }
        BatchSubmission {
            accepted,
            failure: None,
        }
    }

    /// Pending messages as of `tsk`: the pool's pending set united with
    /// messages on chain between the pool's snapshot tipset and `tsk`.
    pub fn pending(
        &self,
        token: &CancellationToken,
        tsk: &TipSetKey,
    ) -> ChainResult<Vec<SignedMessage>> {
        let ts = self.load_tipset(tsk)?;
        let (mut pending, pool_ts) = self
            .pool
            .pending()
            .map_err(|err| ChainError::Pool(format!("reading pending set: {err}")))?;
        if pool_ts.height() > ts.height() {
            return Ok(pending);
        }

        let mut have: HashSet<Cid> = pending.iter().map(|msg| msg.cid()).collect();
        let mut cursor = ts;
        loop {
            if token.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            if cursor.height() == pool_ts.height() {
                if cursor.key() == pool_ts.key() {
                    return Ok(pending);
                }
                // Same height, different blocks: the convergence tipset's own
                // messages are not pending from the caller's point of view.
                for msg in self.messages_for_tipset(&cursor)? {
                    have.insert(msg.cid());
                }
            }

            for msg in self.messages_for_tipset(&cursor)? {
                if have.insert(msg.cid()) {
                    pending.push(msg);
                }
            }

            if pool_ts.height() >= cursor.height() {
                return Ok(pending);
            }
            cursor = self
                .chain
                .tipset(cursor.parents())
                .map_err(|err| ChainError::ChainRead(format!("loading parent tipset: {err}")))?;
        }
    }

    /// Pending messages chosen for inclusion in the next block built on
    /// `tsk`, weighted by the miner's ticket quality.
    pub fn select(
        &self,
        token: &CancellationToken,
        tsk: &TipSetKey,
        ticket_quality: f64,
    ) -> ChainResult<Vec<SignedMessage>> {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        let ts = self.load_tipset(tsk)?;
        self.pool
            .select(&ts, ticket_quality)
            .map_err(|err| ChainError::Pool(format!("selecting messages: {err}")))
    }

    /// Batched selection for building several block candidates at once.
    pub fn selects(
        &self,
        token: &CancellationToken,
        tsk: &TipSetKey,
        ticket_qualities: &[f64],
    ) -> ChainResult<Vec<Vec<SignedMessage>>> {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        let ts = self.load_tipset(tsk)?;
        self.pool
            .select_many(&ts, ticket_qualities)
            .map_err(|err| ChainError::Pool(format!("selecting message batches: {err}")))
    }

    /// Next nonce for the sender. Not atomic against concurrent pushes; use
    /// [`MpoolService::push_message`] for assignment.
    pub fn nonce(&self, addr: &Address) -> ChainResult<u64> {
        self.pool
            .next_nonce(addr)
            .map_err(|err| ChainError::Pool(format!("reading next nonce: {err}")))
    }

    pub fn clear(&self, local: bool) {
        self.pool.clear(local);
    }

    pub fn delete_by_address(&self, addr: &Address) -> ChainResult<()> {
        self.pool
            .delete_by_address(addr)
            .map_err(|err| ChainError::Pool(format!("deleting by address: {err}")))
    }

    pub fn pool_config(&self) -> PoolConfig {
        self.pool.config()
    }

    pub fn set_pool_config(&self, config: PoolConfig) -> ChainResult<()> {
        self.pool
            .set_config(config)
            .map_err(|err| ChainError::Pool(format!("replacing pool config: {err}")))
    }

    /// Subscribes to pool membership changes.
    pub fn updates(&self) -> broadcast::Receiver<MpoolUpdate> {
        self.pool.updates()
    }

    pub fn estimate_message_gas(
        &self,
        msg: &UnsignedMessage,
        spec: Option<&MessageSendSpec>,
        tsk: &TipSetKey,
    ) -> ChainResult<UnsignedMessage> {
        self.gas
            .estimate_message_gas(msg, spec, tsk)
            .map_err(|err| ChainError::GasEstimation(format!("estimating gas: {err}")))
    }

    pub fn estimate_fee_cap(
        &self,
        msg: &UnsignedMessage,
        max_queue_blocks: i64,
        tsk: &TipSetKey,
    ) -> ChainResult<TokenAmount> {
        self.gas
            .estimate_fee_cap(msg, max_queue_blocks, tsk)
            .map_err(|err| ChainError::GasEstimation(format!("estimating fee cap: {err}")))
    }

    pub fn estimate_gas_premium(
        &self,
        blocks_incl: u64,
        sender: &Address,
        gas_limit: i64,
        tsk: &TipSetKey,
    ) -> ChainResult<TokenAmount> {
        self.gas
            .estimate_gas_premium(blocks_incl, sender, gas_limit, tsk)
            .map_err(|err| ChainError::GasEstimation(format!("estimating gas premium: {err}")))
    }

    /// Signs arbitrary bytes with the key controlling `addr`, resolved
    /// through the current head.
    pub fn wallet_sign(
        &self,
        token: &CancellationToken,
        addr: &Address,
        bytes: &[u8],
    ) -> ChainResult<Signature> {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        let key = self
            .chain
            .resolve_account_key(addr, &TipSetKey::empty())
            .map_err(|err| ChainError::ChainRead(format!("resolving signing key: {err}")))?;
        self.wallet
            .sign(&key, bytes, &SignMeta::unknown())
            .map_err(|err| ChainError::Wallet(format!("signing bytes: {err}")))
    }

    pub fn wallet_has(&self, addr: &Address) -> ChainResult<bool> {
        self.wallet
            .has(addr)
            .map_err(|err| ChainError::Wallet(format!("checking wallet key: {err}")))
    }

    fn load_tipset(&self, tsk: &TipSetKey) -> ChainResult<Arc<TipSet>> {
        if tsk.is_empty() {
            self.chain
                .head()
                .map_err(|err| ChainError::ChainRead(format!("loading chain head: {err}")))
        } else {
            self.chain
                .tipset(tsk)
                .map_err(|err| ChainError::ChainRead(format!("loading tipset {tsk}: {err}")))
        }
    }

    fn messages_for_tipset(&self, ts: &TipSet) -> ChainResult<Vec<SignedMessage>> {
        self.pool
            .messages_for_blocks(ts.blocks())
            .map_err(|err| ChainError::Pool(format!("reading block messages: {err}")))
    }
}
