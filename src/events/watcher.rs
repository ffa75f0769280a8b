use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::errors::{ChainError, ChainResult};
use crate::interfaces::ChainStore;
use crate::types::{ChainEpoch, Lookback, MessageReceipt, TipSet, UnsignedMessage};

use super::dispatcher::{
    CheckFn, EventHandlerFn, EventPayload, HeadChangeDispatcher, RevertHandlerFn, StateChange,
    TriggerId,
};

/// Decides whether a state transition between two tipsets is interesting.
/// Returns the opaque payload handed to the handler on a match.
pub type StateMatcherFn =
    Box<dyn Fn(&TipSet, &TipSet) -> ChainResult<Option<StateChange>> + Send + Sync>;

/// Handler for matched state changes. `new_ts` is the timeout tipset when the
/// payload is absent.
pub type StateChangeHandlerFn = Box<
    dyn FnMut(Option<&TipSet>, &TipSet, Option<&StateChange>, ChainEpoch) -> ChainResult<bool>
        + Send,
>;

/// Decides whether an on-chain message is interesting.
pub type MessageMatcherFn = Box<dyn Fn(&UnsignedMessage) -> ChainResult<bool> + Send + Sync>;

/// Handler for matched messages. The receipt is resolved at fire time and
/// absent when the message cannot be found; both are absent on timeout.
pub type MessageHandlerFn = Box<
    dyn FnMut(
            Option<&UnsignedMessage>,
            Option<&MessageReceipt>,
            &TipSet,
            ChainEpoch,
        ) -> ChainResult<bool>
        + Send,
>;

/// Watches head changes for interesting state transitions. Holds only the
/// registration capability of the dispatcher, not the engine itself.
pub(crate) struct StateWatcher {
    dispatcher: Arc<HeadChangeDispatcher>,
    matchers: RwLock<HashMap<TriggerId, StateMatcherFn>>,
}

impl StateWatcher {
    pub fn new(dispatcher: Arc<HeadChangeDispatcher>) -> Self {
        Self {
            dispatcher,
            matchers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        check: CheckFn,
        mut handler: StateChangeHandlerFn,
        revert: RevertHandlerFn,
        confidence: i64,
        timeout: ChainEpoch,
        matcher: StateMatcherFn,
    ) -> ChainResult<TriggerId> {
        let handle: EventHandlerFn = Box::new(move |data, prev_ts, ts, height| {
            let change = match data {
                Some(EventPayload::State(change)) => Some(change),
                Some(EventPayload::Message(_)) => {
                    return Err(ChainError::Subscription(
                        "state trigger received a message payload".into(),
                    ));
                }
                None => None,
            };
            handler(prev_ts, ts, change, height)
        });
        let id = self
            .dispatcher
            .on_head_changed(check, handle, revert, confidence, timeout)?;
        self.matchers.write().insert(id, matcher);
        Ok(id)
    }

    /// Runs every matcher against the transition, collecting the triggers
    /// that want an event queued.
    pub fn check_state_changes(
        &self,
        old_ts: &TipSet,
        new_ts: &TipSet,
    ) -> Vec<(TriggerId, StateChange)> {
        let matchers = self.matchers.read();
        let mut matched = Vec::new();
        for (&id, matcher) in matchers.iter() {
            match matcher(old_ts, new_ts) {
                Ok(Some(data)) => matched.push((id, data)),
                Ok(None) => {}
                Err(err) => warn!(trigger = id, %err, "state matcher failed"),
            }
        }
        matched
    }

    pub fn prune(&self, ids: &[TriggerId]) {
        let mut matchers = self.matchers.write();
        for id in ids {
            matchers.remove(id);
        }
    }
}

/// Watches head changes for interesting actor method calls. Calls are
/// observed when a tipset containing the receipt-bearing parent is applied.
pub(crate) struct MessageWatcher<C> {
    chain: Arc<C>,
    dispatcher: Arc<HeadChangeDispatcher>,
    matchers: RwLock<HashMap<TriggerId, MessageMatcherFn>>,
}

impl<C: ChainStore + 'static> MessageWatcher<C> {
    pub fn new(chain: Arc<C>, dispatcher: Arc<HeadChangeDispatcher>) -> Self {
        Self {
            chain,
            dispatcher,
            matchers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        check: CheckFn,
        mut handler: MessageHandlerFn,
        revert: RevertHandlerFn,
        confidence: i64,
        timeout: ChainEpoch,
        matcher: MessageMatcherFn,
    ) -> ChainResult<TriggerId> {
        let chain = self.chain.clone();
        let handle: EventHandlerFn = Box::new(move |data, _prev_ts, ts, height| {
            let msg = match data {
                Some(EventPayload::Message(msg)) => Some(msg.clone()),
                Some(EventPayload::State(_)) => {
                    return Err(ChainError::Subscription(
                        "message trigger received a state payload".into(),
                    ));
                }
                None => None,
            };
            match msg {
                Some(msg) => {
                    let lookup = chain.search_message(
                        ts.key(),
                        &msg.cid(),
                        Lookback::Unlimited,
                        true,
                    )?;
                    match lookup {
                        Some(lookup) => {
                            handler(Some(msg.as_ref()), Some(&lookup.receipt), ts, height)
                        }
                        None => handler(Some(msg.as_ref()), None, ts, height),
                    }
                }
                None => handler(None, None, ts, height),
            }
        });
        let id = self
            .dispatcher
            .on_head_changed(check, handle, revert, confidence, timeout)?;
        self.matchers.write().insert(id, matcher);
        Ok(id)
    }

    /// Matches messages found in the parent of the applied tipset. Chain read
    /// failures are logged and yield no matches; missing one iteration is
    /// better than stalling every other subscriber.
    pub fn check_new_calls(&self, ts: &TipSet) -> Vec<(TriggerId, Arc<UnsignedMessage>)> {
        let parent = match self.chain.tipset(ts.parents()) {
            Ok(parent) => parent,
            Err(err) => {
                warn!(height = ts.height(), %err, "loading parent tipset for call matching");
                return Vec::new();
            }
        };
        let matchers = self.matchers.read();
        let mut matched = Vec::new();
        self.for_each_message(&parent, |msg| {
            for (&id, matcher) in matchers.iter() {
                match matcher(msg) {
                    Ok(true) => matched.push((id, Arc::new(msg.clone()))),
                    Ok(false) => {}
                    Err(err) => warn!(trigger = id, %err, "message matcher failed"),
                }
            }
        });
        matched
    }

    /// Visits each message in the tipset once, BLS and secp lists deduped
    /// under one seen-set.
    fn for_each_message(&self, ts: &TipSet, mut consume: impl FnMut(&UnsignedMessage)) {
        let mut seen = HashSet::new();
        for block in ts.blocks() {
            let messages = match self.chain.block_messages(&block.id()) {
                Ok(messages) => messages,
                Err(err) => {
                    // Quite bad, but better than dropping every other update.
                    warn!(
                        height = ts.height(),
                        block = %block.id(),
                        %err,
                        "loading block messages"
                    );
                    continue;
                }
            };
            for msg in &messages.bls {
                if seen.insert(msg.cid()) {
                    consume(msg);
                }
            }
            for signed in &messages.secp {
                if seen.insert(signed.message.cid()) {
                    consume(&signed.message);
                }
            }
        }
    }

    pub fn prune(&self, ids: &[TriggerId]) {
        let mut matchers = self.matchers.write();
        for id in ids {
            matchers.remove(id);
        }
    }
}
