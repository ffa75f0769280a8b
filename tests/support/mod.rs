#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use tidemark::config::PoolConfig;
use tidemark::errors::{ChainError, ChainResult};
use tidemark::interfaces::{ChainStore, GasEstimator, MessagePool, WalletApi};
use tidemark::types::{
    Address, BlockHeader, BlockMessages, Cid, Lookback, MessageLookup, MessageSendSpec,
    MpoolChange, MpoolUpdate, SignMeta, Signature, SignatureKind, SignedMessage, TipSet,
    TipSetKey, TokenAmount, UnsignedMessage,
};

pub fn tokens(n: u64) -> TokenAmount {
    TokenAmount::from(n)
}

/// Builds a single-block tipset. `salt` differentiates sibling candidates at
/// the same height.
pub fn make_tipset(height: i64, parents: &TipSetKey, salt: u64) -> Arc<TipSet> {
    let header = BlockHeader::new(
        Address::Id(1_000 + salt),
        height,
        parents.clone(),
        height as u64,
    );
    Arc::new(TipSet::new(vec![header]).expect("building tipset"))
}

/// Builds a tipset with several sibling blocks.
pub fn make_wide_tipset(height: i64, parents: &TipSetKey, miners: &[u64]) -> Arc<TipSet> {
    let blocks = miners
        .iter()
        .map(|miner| BlockHeader::new(Address::Id(*miner), height, parents.clone(), height as u64))
        .collect();
    Arc::new(TipSet::new(blocks).expect("building tipset"))
}

pub fn message(from: Address, to: Address, value: u64) -> UnsignedMessage {
    UnsignedMessage {
        from,
        to,
        nonce: 0,
        value: tokens(value),
        gas_limit: 0,
        gas_fee_cap: tokens(0),
        gas_premium: tokens(0),
        method: 0,
        params: Vec::new(),
    }
}

pub fn sign(message: UnsignedMessage) -> SignedMessage {
    SignedMessage::new(
        message,
        Signature::new(SignatureKind::Secp256k1, vec![0xab; 65]),
    )
}

#[derive(Default)]
struct ChainState {
    head: Option<Arc<TipSet>>,
    tipsets: HashMap<TipSetKey, Arc<TipSet>>,
    block_messages: HashMap<Cid, BlockMessages>,
    account_keys: HashMap<Address, Address>,
    account_nonces: HashMap<Address, u64>,
    lookups: HashMap<Cid, MessageLookup>,
}

/// In-memory chain service.
#[derive(Default)]
pub struct TestChain {
    inner: Mutex<ChainState>,
}

impl TestChain {
    pub fn new(head: Arc<TipSet>) -> Arc<Self> {
        let chain = Arc::new(Self::default());
        chain.insert_tipset(head.clone());
        chain.set_head(head);
        chain
    }

    pub fn set_head(&self, ts: Arc<TipSet>) {
        self.inner.lock().head = Some(ts);
    }

    pub fn insert_tipset(&self, ts: Arc<TipSet>) {
        self.inner.lock().tipsets.insert(ts.key().clone(), ts);
    }

    /// Builds, registers, and returns a tipset extending `parent`.
    pub fn extend(&self, parent: &TipSet, height: i64, salt: u64) -> Arc<TipSet> {
        let ts = make_tipset(height, parent.key(), salt);
        self.insert_tipset(ts.clone());
        ts
    }

    pub fn set_block_messages(&self, block: Cid, messages: BlockMessages) {
        self.inner.lock().block_messages.insert(block, messages);
    }

    pub fn map_account_key(&self, addr: Address, key: Address) {
        self.inner.lock().account_keys.insert(addr, key);
    }

    pub fn set_account_nonce(&self, addr: Address, nonce: u64) {
        self.inner.lock().account_nonces.insert(addr, nonce);
    }

    pub fn set_lookup(&self, msg: Cid, lookup: MessageLookup) {
        self.inner.lock().lookups.insert(msg, lookup);
    }
}

impl ChainStore for TestChain {
    fn head(&self) -> ChainResult<Arc<TipSet>> {
        self.inner
            .lock()
            .head
            .clone()
            .ok_or_else(|| ChainError::ChainRead("no head".into()))
    }

    fn tipset(&self, key: &TipSetKey) -> ChainResult<Arc<TipSet>> {
        self.inner
            .lock()
            .tipsets
            .get(key)
            .cloned()
            .ok_or_else(|| ChainError::ChainRead(format!("unknown tipset {key}")))
    }

    fn block_messages(&self, block: &Cid) -> ChainResult<BlockMessages> {
        Ok(self
            .inner
            .lock()
            .block_messages
            .get(block)
            .cloned()
            .unwrap_or_default())
    }

    fn resolve_account_key(&self, addr: &Address, _key: &TipSetKey) -> ChainResult<Address> {
        if addr.is_id() {
            self.inner
                .lock()
                .account_keys
                .get(addr)
                .cloned()
                .ok_or_else(|| ChainError::ChainRead(format!("no key address for {addr}")))
        } else {
            Ok(addr.clone())
        }
    }

    fn account_nonce(&self, addr: &Address, _key: &TipSetKey) -> ChainResult<u64> {
        Ok(self
            .inner
            .lock()
            .account_nonces
            .get(addr)
            .copied()
            .unwrap_or(0))
    }

    fn search_message(
        &self,
        _key: &TipSetKey,
        msg: &Cid,
        _lookback: Lookback,
        _allow_replaced: bool,
    ) -> ChainResult<Option<MessageLookup>> {
        Ok(self.inner.lock().lookups.get(msg).cloned())
    }
}

/// In-memory wallet recording every signing request.
pub struct TestWallet {
    balances: Mutex<HashMap<Address, TokenAmount>>,
    pub sign_calls: AtomicUsize,
    signed_for: Mutex<Vec<(Address, SignMeta)>>,
    /// Concurrent-entry detector for the signing critical section.
    active: AtomicUsize,
    pub peak_active: AtomicUsize,
}

impl Default for TestWallet {
    fn default() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            sign_calls: AtomicUsize::new(0),
            signed_for: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }
}

impl TestWallet {
    pub fn with_balance(addr: Address, amount: TokenAmount) -> Arc<Self> {
        let wallet = Arc::new(Self::default());
        wallet.set_balance(addr, amount);
        wallet
    }

    pub fn set_balance(&self, addr: Address, amount: TokenAmount) {
        self.balances.lock().insert(addr, amount);
    }

    pub fn signed_for(&self) -> Vec<(Address, SignMeta)> {
        self.signed_for.lock().clone()
    }
}

impl WalletApi for TestWallet {
    fn balance(&self, addr: &Address) -> ChainResult<TokenAmount> {
        Ok(self
            .balances
            .lock()
            .get(addr)
            .cloned()
            .unwrap_or_else(|| tokens(0)))
    }

    fn sign(&self, addr: &Address, _bytes: &[u8], meta: &SignMeta) -> ChainResult<Signature> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(2));
        self.active.fetch_sub(1, Ordering::SeqCst);

        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.signed_for.lock().push((addr.clone(), meta.clone()));
        Ok(Signature::new(SignatureKind::Secp256k1, vec![0xcd; 65]))
    }

    fn has(&self, addr: &Address) -> ChainResult<bool> {
        Ok(self.balances.lock().contains_key(addr))
    }
}

#[derive(Default)]
struct PoolState {
    nonces: HashMap<Address, u64>,
    pushed: Vec<SignedMessage>,
    untrusted: Vec<SignedMessage>,
    pending: Vec<SignedMessage>,
    snapshot: Option<Arc<TipSet>>,
    block_messages: HashMap<Cid, Vec<SignedMessage>>,
    select_result: Vec<SignedMessage>,
    selected_qualities: Vec<f64>,
    config: PoolConfig,
}

/// In-memory backing pool.
pub struct TestPool {
    inner: Mutex<PoolState>,
    updates: broadcast::Sender<MpoolUpdate>,
}

impl Default for TestPool {
    fn default() -> Self {
        let (updates, _) = broadcast::channel(32);
        Self {
            inner: Mutex::new(PoolState::default()),
            updates,
        }
    }
}

impl TestPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_snapshot(&self, ts: Arc<TipSet>) {
        self.inner.lock().snapshot = Some(ts);
    }

    pub fn set_pending(&self, msgs: Vec<SignedMessage>) {
        self.inner.lock().pending = msgs;
    }

    pub fn set_block_messages(&self, block: Cid, msgs: Vec<SignedMessage>) {
        self.inner.lock().block_messages.insert(block, msgs);
    }

    pub fn set_select_result(&self, msgs: Vec<SignedMessage>) {
        self.inner.lock().select_result = msgs;
    }

    pub fn pushed(&self) -> Vec<SignedMessage> {
        self.inner.lock().pushed.clone()
    }

    pub fn selected_qualities(&self) -> Vec<f64> {
        self.inner.lock().selected_qualities.clone()
    }
}

impl MessagePool for TestPool {
    fn next_nonce(&self, addr: &Address) -> ChainResult<u64> {
        Ok(self.inner.lock().nonces.get(addr).copied().unwrap_or(0))
    }

    fn push(&self, msg: &SignedMessage) -> ChainResult<Cid> {
        let mut state = self.inner.lock();
        state
            .nonces
            .insert(msg.message.from.clone(), msg.message.nonce + 1);
        state.pushed.push(msg.clone());
        drop(state);
        let _ = self.updates.send(MpoolUpdate {
            kind: MpoolChange::Add,
            message: msg.clone(),
        });
        Ok(msg.cid())
    }

    fn push_untrusted(&self, msg: &SignedMessage) -> ChainResult<Cid> {
        self.inner.lock().untrusted.push(msg.clone());
        self.push(msg)
    }

    fn pending(&self) -> ChainResult<(Vec<SignedMessage>, Arc<TipSet>)> {
        let state = self.inner.lock();
        let snapshot = state
            .snapshot
            .clone()
            .ok_or_else(|| ChainError::Pool("no pool snapshot".into()))?;
        Ok((state.pending.clone(), snapshot))
    }

    fn select(&self, _ts: &TipSet, ticket_quality: f64) -> ChainResult<Vec<SignedMessage>> {
        let mut state = self.inner.lock();
        state.selected_qualities.push(ticket_quality);
        Ok(state.select_result.clone())
    }

    fn select_many(
        &self,
        ts: &TipSet,
        ticket_qualities: &[f64],
    ) -> ChainResult<Vec<Vec<SignedMessage>>> {
        ticket_qualities
            .iter()
            .map(|quality| self.select(ts, *quality))
            .collect()
    }

    fn messages_for_blocks(&self, blocks: &[BlockHeader]) -> ChainResult<Vec<SignedMessage>> {
        let state = self.inner.lock();
        let mut out = Vec::new();
        for block in blocks {
            if let Some(msgs) = state.block_messages.get(&block.id()) {
                out.extend(msgs.iter().cloned());
            }
        }
        Ok(out)
    }

    fn clear(&self, _local: bool) {
        let mut state = self.inner.lock();
        state.pending.clear();
        state.pushed.clear();
    }

    fn delete_by_address(&self, addr: &Address) -> ChainResult<()> {
        self.inner
            .lock()
            .pending
            .retain(|msg| msg.message.from != *addr);
        Ok(())
    }

    fn config(&self) -> PoolConfig {
        self.inner.lock().config.clone()
    }

    fn set_config(&self, config: PoolConfig) -> ChainResult<()> {
        self.inner.lock().config = config;
        Ok(())
    }

    fn updates(&self) -> broadcast::Receiver<MpoolUpdate> {
        self.updates.subscribe()
    }
}

/// Gas estimator stamping fixed prices onto submissions.
pub struct TestGas {
    premium: TokenAmount,
    fee_cap: TokenAmount,
}

impl TestGas {
    pub fn new(premium: u64, fee_cap: u64) -> Arc<Self> {
        Arc::new(Self {
            premium: tokens(premium),
            fee_cap: tokens(fee_cap),
        })
    }
}

impl GasEstimator for TestGas {
    fn estimate_message_gas(
        &self,
        msg: &UnsignedMessage,
        _spec: Option<&MessageSendSpec>,
        _key: &TipSetKey,
    ) -> ChainResult<UnsignedMessage> {
        let mut estimated = msg.clone();
        estimated.gas_limit = 1_000_000;
        estimated.gas_premium = self.premium.clone();
        estimated.gas_fee_cap = self.fee_cap.clone();
        Ok(estimated)
    }

    fn estimate_fee_cap(
        &self,
        _msg: &UnsignedMessage,
        _max_queue_blocks: i64,
        _key: &TipSetKey,
    ) -> ChainResult<TokenAmount> {
        Ok(self.fee_cap.clone())
    }

    fn estimate_gas_premium(
        &self,
        _blocks_incl: u64,
        _sender: &Address,
        _gas_limit: i64,
        _key: &TipSetKey,
    ) -> ChainResult<TokenAmount> {
        Ok(self.premium.clone())
    }
}
