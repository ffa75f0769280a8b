use std::collections::VecDeque;
use std::sync::Arc;

use crate::errors::{ChainError, ChainResult};
use crate::types::{ChainEpoch, TipSet};

/// Bounded height-indexed window over recent tipsets, newest at the front.
/// Null heights are stored as empty slots so index arithmetic by height stays
/// valid across gaps.
pub(crate) struct TipSetCache {
    entries: VecDeque<Option<Arc<TipSet>>>,
    capacity: usize,
}

impl TipSetCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn add(&mut self, ts: Arc<TipSet>) -> ChainResult<()> {
        if let Some(front) = self.front() {
            if front.height() >= ts.height() {
                return Err(ChainError::HeadChange(format!(
                    "expected new tipset height above {}, got {}",
                    front.height(),
                    ts.height()
                )));
            }
            let mut next = front.height() + 1;
            while next < ts.height() {
                self.entries.push_front(None);
                next += 1;
            }
        }
        self.entries.push_front(Some(ts));
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
        Ok(())
    }

    pub fn revert(&mut self, ts: &TipSet) -> ChainResult<()> {
        let Some(front) = self.front() else {
            return Ok(());
        };
        if front.key() != ts.key() {
            return Err(ChainError::HeadChange(format!(
                "reverted tipset {} does not match cache head {}",
                ts.key(),
                front.key()
            )));
        }
        self.entries.pop_front();
        while matches!(self.entries.front(), Some(None)) {
            self.entries.pop_front();
        }
        Ok(())
    }

    /// Returns the tipset cached at exactly `height`, or the next-higher
    /// cached tipset when `height` falls on a null gap.
    pub fn get(&self, height: ChainEpoch) -> ChainResult<Arc<TipSet>> {
        let best = self.best()?;
        let head_height = best.height();
        if height > head_height {
            return Err(ChainError::NotInCache(format!(
                "requested height {height} is ahead of cache head {head_height}"
            )));
        }
        let offset = (head_height - height) as usize;
        if offset >= self.entries.len() {
            return Err(ChainError::NotInCache(format!(
                "requested height {height} is below the cached range"
            )));
        }
        let mut idx = offset;
        loop {
            if let Some(Some(ts)) = self.entries.get(idx) {
                return Ok(ts.clone());
            }
            // Null slot; the front entry is always populated, so this ends.
            idx -= 1;
        }
    }

    pub fn best(&self) -> ChainResult<Arc<TipSet>> {
        self.front()
            .ok_or_else(|| ChainError::NotInCache("tipset cache is empty".into()))
    }

    fn front(&self) -> Option<Arc<TipSet>> {
        self.entries.front().and_then(|slot| slot.clone())
    }
}
