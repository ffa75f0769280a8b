//! Chain-head event engine: a confidence-delayed, reorg-aware dispatcher for
//! subscribers reacting to on-chain state changes and actor method calls.
//!
//! The chain service feeds [`ChainEvents::process_head_change`] serially with
//! reverted and applied tipsets. Subscribers register through
//! [`ChainEvents::state_changed`], [`ChainEvents::called`], or
//! [`ChainEvents::called_message`]; their handlers fire once the chain has
//! applied the requested number of tipsets past the event, and their revert
//! callbacks fire if the event's tipset is later withdrawn.

mod cache;
mod dispatcher;
mod watcher;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::EventsConfig;
use crate::errors::{ChainError, ChainResult};
use crate::interfaces::ChainStore;
use crate::types::{ChainEpoch, TipSet, UnsignedMessage};

pub use dispatcher::{
    CheckFn, EventHandlerFn, EventPayload, RevertHandlerFn, StateChange, TriggerId,
};
pub use watcher::{MessageHandlerFn, MessageMatcherFn, StateChangeHandlerFn, StateMatcherFn};

use dispatcher::HeadChangeDispatcher;
use watcher::{MessageWatcher, StateWatcher};

pub struct ChainEvents<C> {
    chain: Arc<C>,
    dispatcher: Arc<HeadChangeDispatcher>,
    state_events: StateWatcher,
    message_events: MessageWatcher<C>,
}

impl<C: ChainStore + 'static> ChainEvents<C> {
    /// Builds the engine seeded with the chain service's current head.
    pub fn new(chain: Arc<C>, config: &EventsConfig) -> ChainResult<Self> {
        let head = chain
            .head()
            .map_err(|err| ChainError::ChainRead(format!("loading chain head: {err}")))?;
        let dispatcher = Arc::new(HeadChangeDispatcher::new(
            head,
            config.gc_confidence as i64,
        )?);
        Ok(Self {
            chain: chain.clone(),
            state_events: StateWatcher::new(dispatcher.clone()),
            message_events: MessageWatcher::new(chain, dispatcher.clone()),
            dispatcher,
        })
    }

    /// Single serial entry point for head changes. Reverts run first and
    /// must name the current head first; applies are ordered oldest to
    /// newest.
    pub fn process_head_change(
        &self,
        token: &CancellationToken,
        revert: &[Arc<TipSet>],
        apply: &[Arc<TipSet>],
    ) -> ChainResult<()> {
        let mut state = self.dispatcher.lock();

        for ts in revert {
            if token.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            state.handle_reverts(ts);
            state.cache_revert(ts)?;
            state.set_last_tipset(ts.clone());
        }

        for ts in apply {
            if token.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            if let Some(head) = state.head_height() {
                if ts.height() <= head {
                    warn!(
                        height = ts.height(),
                        head, "ignoring stale apply below current head"
                    );
                    continue;
                }
            }
            state.cache_apply(ts.clone())?;

            let prev = state.last_tipset();
            for (id, data) in self.state_events.check_state_changes(&prev, ts) {
                state.queue_for_confidence(
                    id,
                    EventPayload::State(data),
                    Some(prev.height()),
                    ts,
                );
            }
            for (id, msg) in self.message_events.check_new_calls(ts) {
                state.queue_for_confidence(id, EventPayload::Message(msg), None, ts);
            }

            // Walk every height the apply covers, nulls included, so queued
            // events and timeouts aimed at a skipped height still run.
            for at in prev.height()..=ts.height() {
                state.apply_with_confidence(at);
                state.apply_timeouts(at);
            }

            state.set_last_tipset(ts.clone());
            let dropped = state.collect_garbage();
            if !dropped.is_empty() {
                self.state_events.prune(&dropped);
                self.message_events.prune(&dropped);
            }
        }

        Ok(())
    }

    /// Registers a callback fired when a matched state change has been on
    /// chain for `confidence` tipsets, or `timeout` is reached without one.
    pub fn state_changed(
        &self,
        token: &CancellationToken,
        check: CheckFn,
        handler: StateChangeHandlerFn,
        revert: RevertHandlerFn,
        confidence: i64,
        timeout: ChainEpoch,
        matcher: StateMatcherFn,
    ) -> ChainResult<TriggerId> {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        self.state_events
            .register(check, handler, revert, confidence, timeout, matcher)
    }

    /// Registers a callback fired when a matched message has been on chain
    /// for `confidence` tipsets, or `timeout` is reached without one. The
    /// message's receipt is resolved at fire time.
    pub fn called(
        &self,
        token: &CancellationToken,
        check: CheckFn,
        handler: MessageHandlerFn,
        revert: RevertHandlerFn,
        confidence: i64,
        timeout: ChainEpoch,
        matcher: MessageMatcherFn,
    ) -> ChainResult<TriggerId> {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        self.message_events
            .register(check, handler, revert, confidence, timeout, matcher)
    }

    /// Convenience form of [`ChainEvents::called`] for a concrete message:
    /// the check probes the sender's on-chain nonce and the matcher demands
    /// structural equality.
    pub fn called_message(
        &self,
        token: &CancellationToken,
        handler: MessageHandlerFn,
        revert: RevertHandlerFn,
        confidence: i64,
        timeout: ChainEpoch,
        message: Arc<UnsignedMessage>,
    ) -> ChainResult<TriggerId> {
        let check = self.check_message(message.clone());
        let matcher = Self::match_message(message);
        self.called(token, check, handler, revert, confidence, timeout, matcher)
    }

    fn check_message(&self, message: Arc<UnsignedMessage>) -> CheckFn {
        let chain = self.chain.clone();
        Box::new(move |ts: &TipSet| {
            let nonce = chain.account_nonce(&message.from, ts.key())?;
            // The account nonce is the next expected one: equal means the
            // message is still in line, so only a strictly higher nonce
            // proves it landed and may cancel the timeout.
            Ok((nonce > message.nonce, nonce <= message.nonce))
        })
    }

    fn match_message(message: Arc<UnsignedMessage>) -> MessageMatcherFn {
        Box::new(move |msg: &UnsignedMessage| {
            if msg.from == message.from && msg.nonce == message.nonce && *msg != *message {
                return Err(ChainError::Subscription(format!(
                    "matching message {} from {}: duplicate origin/nonce {}",
                    message.cid(),
                    message.from,
                    msg.nonce
                )));
            }
            Ok(*msg == *message)
        })
    }
}
