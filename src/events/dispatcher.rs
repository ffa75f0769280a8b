use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::errors::{ChainError, ChainResult};
use crate::types::{ChainEpoch, TipSet, UnsignedMessage, NO_HEIGHT, NO_TIMEOUT};

use super::cache::TipSetCache;

pub type TriggerId = u64;

/// Opaque payload produced by a state matcher and delivered untouched to the
/// matching trigger's handler.
pub type StateChange = Arc<dyn Any + Send + Sync>;

/// Payload routed from a matcher to its trigger. The dispatcher never
/// inspects it, only which arm it is.
#[derive(Clone)]
pub enum EventPayload {
    State(StateChange),
    Message(Arc<UnsignedMessage>),
}

/// Immediate registration probe. Returns `(done, more)`: `done` means the
/// awaited condition already holds (suppresses the timeout), `more = false`
/// means the handler should not receive further events.
pub type CheckFn = Box<dyn FnOnce(&TipSet) -> ChainResult<(bool, bool)> + Send>;

/// Trigger callback. Receives the routed payload (absent on timeout), the
/// previous tipset where relevant, the event tipset, and the height at which
/// the callback fires. Returns whether further events are wanted.
pub type EventHandlerFn = Box<
    dyn FnMut(Option<&EventPayload>, Option<&TipSet>, &TipSet, ChainEpoch) -> ChainResult<bool>
        + Send,
>;

/// Invoked once per prior apply when the event's tipset is reverted.
pub type RevertHandlerFn = Box<dyn FnMut(&TipSet) -> ChainResult<()> + Send>;

struct Trigger {
    confidence: i64,
    /// Height at which the timeout callback would fire, already including
    /// confidence. `NO_TIMEOUT` when none.
    timeout: ChainEpoch,
    disabled: bool,
    handle: EventHandlerFn,
    revert: RevertHandlerFn,
}

struct QueuedEvent {
    trigger: TriggerId,
    prev_height: ChainEpoch,
    height: ChainEpoch,
    data: EventPayload,
    called: bool,
}

/// Dispatcher bookkeeping. A single mutex guards all of it; callbacks run
/// with the lock held and must not call back into the dispatcher.
pub(crate) struct DispatcherState {
    tsc: TipSetCache,
    gc_confidence: i64,
    last_ts: Arc<TipSet>,
    next_trigger: TriggerId,
    triggers: HashMap<TriggerId, Trigger>,
    /// trigger height -> event height -> queued events.
    conf_queue: BTreeMap<ChainEpoch, HashMap<ChainEpoch, Vec<QueuedEvent>>>,
    /// event height -> trigger heights holding events for it.
    revert_queue: HashMap<ChainEpoch, Vec<ChainEpoch>>,
    /// callback height -> trigger -> fire count before that height.
    timeouts: BTreeMap<ChainEpoch, HashMap<TriggerId, u64>>,
}

pub(crate) struct HeadChangeDispatcher {
    state: Mutex<DispatcherState>,
}

impl HeadChangeDispatcher {
    pub fn new(head: Arc<TipSet>, gc_confidence: i64) -> ChainResult<Self> {
        let mut tsc = TipSetCache::new(gc_confidence.max(1) as usize);
        tsc.add(head.clone())?;
        Ok(Self {
            state: Mutex::new(DispatcherState {
                tsc,
                gc_confidence,
                last_ts: head,
                next_trigger: 0,
                triggers: HashMap::new(),
                conf_queue: BTreeMap::new(),
                revert_queue: HashMap::new(),
                timeouts: BTreeMap::new(),
            }),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock()
    }

    /// Registers a trigger. `check` runs immediately against the best known
    /// tipset: `done` cancels the timeout, `!more` creates the trigger
    /// disabled (reverts of already-observed events may still be wanted).
    pub fn on_head_changed(
        &self,
        check: CheckFn,
        handle: EventHandlerFn,
        revert: RevertHandlerFn,
        confidence: i64,
        timeout: ChainEpoch,
    ) -> ChainResult<TriggerId> {
        let mut state = self.state.lock();
        let best = state
            .tsc
            .best()
            .map_err(|err| ChainError::Subscription(format!("reading best tipset: {err}")))?;
        let (done, more) = check(&best).map_err(|err| {
            ChainError::Subscription(format!(
                "check failed at height {}: {err}",
                best.height()
            ))
        })?;
        let timeout = if done { NO_TIMEOUT } else { timeout };

        let id = state.next_trigger;
        state.next_trigger += 1;

        let callback_height = if timeout == NO_TIMEOUT {
            NO_TIMEOUT
        } else {
            timeout.saturating_add(confidence)
        };
        state.triggers.insert(
            id,
            Trigger {
                confidence,
                timeout: callback_height,
                disabled: !more,
                handle,
                revert,
            },
        );
        if callback_height != NO_TIMEOUT {
            state
                .timeouts
                .entry(callback_height)
                .or_default()
                .insert(id, 0);
        }
        Ok(id)
    }
}

impl DispatcherState {
    pub fn last_tipset(&self) -> Arc<TipSet> {
        self.last_ts.clone()
    }

    pub fn set_last_tipset(&mut self, ts: Arc<TipSet>) {
        self.last_ts = ts;
    }

    pub fn head_height(&self) -> Option<ChainEpoch> {
        self.tsc.best().ok().map(|ts| ts.height())
    }

    pub fn cache_apply(&mut self, ts: Arc<TipSet>) -> ChainResult<()> {
        self.tsc.add(ts)
    }

    pub fn cache_revert(&mut self, ts: &TipSet) -> ChainResult<()> {
        self.tsc.revert(ts)
    }

    /// Enqueues a matched event until the chain reaches the height that
    /// reflects the trigger's confidence.
    pub fn queue_for_confidence(
        &mut self,
        id: TriggerId,
        data: EventPayload,
        prev_height: Option<ChainEpoch>,
        ts: &TipSet,
    ) {
        let Some(trigger) = self.triggers.get(&id) else {
            debug!(trigger = id, "matched event for unknown trigger");
            return;
        };
        let applied_height = ts.height();
        let trigger_height = applied_height + trigger.confidence;
        self.conf_queue
            .entry(trigger_height)
            .or_default()
            .entry(applied_height)
            .or_default()
            .push(QueuedEvent {
                trigger: id,
                prev_height: prev_height.unwrap_or(NO_HEIGHT),
                height: applied_height,
                data,
                called: false,
            });
        self.revert_queue
            .entry(applied_height)
            .or_default()
            .push(trigger_height);
    }

    /// Fires queued events whose confidence is reached at `at`.
    pub fn apply_with_confidence(&mut self, at: ChainEpoch) {
        let DispatcherState {
            tsc,
            triggers,
            conf_queue,
            timeouts,
            ..
        } = self;
        let Some(by_event_height) = conf_queue.get_mut(&at) else {
            return;
        };
        for (&event_height, events) in by_event_height.iter_mut() {
            let trigger_ts = match tsc.get(event_height) {
                Ok(ts) => ts,
                Err(err) => {
                    warn!(
                        wanted = event_height,
                        current = at,
                        %err,
                        "missing tipset for queued event"
                    );
                    continue;
                }
            };
            for event in events.iter_mut() {
                if event.called {
                    continue;
                }
                let Some(trigger) = triggers.get_mut(&event.trigger) else {
                    continue;
                };
                if trigger.disabled {
                    continue;
                }
                let prev_ts = if event.prev_height != NO_HEIGHT {
                    match tsc.get(event.prev_height) {
                        Ok(ts) => Some(ts),
                        Err(err) => {
                            warn!(
                                wanted = event.prev_height,
                                current = at,
                                %err,
                                "missing previous tipset for queued event"
                            );
                            continue;
                        }
                    }
                } else {
                    None
                };
                let more = match (trigger.handle)(
                    Some(&event.data),
                    prev_ts.as_deref(),
                    trigger_ts.as_ref(),
                    at,
                ) {
                    Ok(more) => more,
                    Err(err) => {
                        // Permanent failure is the contract; no retry and no
                        // revert for a handler that never ran successfully.
                        warn!(
                            event_height = event.height,
                            triggered_at = at,
                            %err,
                            "event handler failed"
                        );
                        continue;
                    }
                };
                event.called = true;
                let timeout_height = trigger.timeout;
                trigger.disabled = !more;
                if let Some(counts) = timeouts.get_mut(&timeout_height) {
                    if let Some(count) = counts.get_mut(&event.trigger) {
                        *count += 1;
                    }
                }
            }
        }
    }

    /// Fires timeouts scheduled at `at` for triggers that never saw an apply.
    /// The slot is consumed; adjacent applies walk their boundary height
    /// twice and must not deliver the timeout twice.
    pub fn apply_timeouts(&mut self, at: ChainEpoch) {
        let DispatcherState {
            tsc,
            triggers,
            timeouts,
            ..
        } = self;
        let Some(entries) = timeouts.remove(&at) else {
            return;
        };
        for (&id, &calls) in entries.iter() {
            if calls > 0 {
                continue;
            }
            let Some(trigger) = triggers.get_mut(&id) else {
                continue;
            };
            if trigger.disabled {
                continue;
            }
            let timeout_ts = match tsc.get(at - trigger.confidence) {
                Ok(ts) => ts,
                Err(err) => {
                    warn!(
                        wanted = at - trigger.confidence,
                        current = at,
                        %err,
                        "missing tipset for timeout"
                    );
                    continue;
                }
            };
            match (trigger.handle)(None, None, timeout_ts.as_ref(), at) {
                Ok(more) => trigger.disabled = !more,
                Err(err) => {
                    warn!(trigger = id, height = at, %err, "timeout handler failed");
                }
            }
        }
    }

    /// Delivers revert callbacks for events that fired at the reverted
    /// tipset's height, then drops their bookkeeping.
    pub fn handle_reverts(&mut self, ts: &TipSet) {
        let DispatcherState {
            triggers,
            conf_queue,
            revert_queue,
            ..
        } = self;
        let Some(trigger_heights) = revert_queue.remove(&ts.height()) else {
            return;
        };
        for trigger_height in trigger_heights {
            let Some(by_event_height) = conf_queue.get_mut(&trigger_height) else {
                continue;
            };
            let Some(events) = by_event_height.remove(&ts.height()) else {
                continue;
            };
            for event in events {
                if !event.called {
                    continue;
                }
                let Some(trigger) = triggers.get_mut(&event.trigger) else {
                    continue;
                };
                if let Err(err) = (trigger.revert)(ts) {
                    warn!(
                        height = ts.height(),
                        triggered_at = trigger_height,
                        %err,
                        "reverting chain trigger failed"
                    );
                }
            }
            if by_event_height.is_empty() {
                conf_queue.remove(&trigger_height);
            }
        }
    }

    /// Drops bookkeeping that can no longer matter: queue entries whose
    /// trigger height fell behind the reorg horizon, stale timeout slots, and
    /// disabled triggers nothing references anymore. Returns the dropped
    /// trigger ids so matcher registries can prune with them.
    pub fn collect_garbage(&mut self) -> Vec<TriggerId> {
        let horizon = self.last_ts.height() - self.gc_confidence;
        if horizon <= 0 {
            return Vec::new();
        }
        while let Some((&height, _)) = self.conf_queue.first_key_value() {
            if height >= horizon {
                break;
            }
            self.conf_queue.remove(&height);
        }
        self.revert_queue.retain(|_, trigger_heights| {
            trigger_heights.retain(|&th| th >= horizon);
            !trigger_heights.is_empty()
        });
        while let Some((&height, _)) = self.timeouts.first_key_value() {
            if height >= horizon {
                break;
            }
            self.timeouts.remove(&height);
        }

        let mut referenced: HashSet<TriggerId> = self
            .conf_queue
            .values()
            .flat_map(|by_height| by_height.values())
            .flatten()
            .map(|event| event.trigger)
            .collect();
        referenced.extend(self.timeouts.values().flat_map(|counts| counts.keys()));
        let mut dropped = Vec::new();
        self.triggers.retain(|id, trigger| {
            if trigger.disabled && !referenced.contains(id) {
                dropped.push(*id);
                false
            } else {
                true
            }
        });
        dropped
    }
}
