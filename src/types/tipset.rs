use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};

use super::message::Cid;
use super::Address;

/// Chain height. Signed so that sentinel values stay representable.
pub type ChainEpoch = i64;

/// Marker for "no previous height" on queued events.
pub const NO_HEIGHT: ChainEpoch = -1;

/// Marker for triggers that never time out.
pub const NO_TIMEOUT: ChainEpoch = ChainEpoch::MAX;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub miner: Address,
    pub height: ChainEpoch,
    pub parents: TipSetKey,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn new(miner: Address, height: ChainEpoch, parents: TipSetKey, timestamp: u64) -> Self {
        Self {
            miner,
            height,
            parents,
            timestamp,
        }
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serializing block header")
    }

    pub fn id(&self) -> Cid {
        Cid::digest(&self.canonical_bytes())
    }
}

/// Sorted set of block identifiers naming one tipset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TipSetKey(Vec<Cid>);

impl TipSetKey {
    pub fn new(mut ids: Vec<Cid>) -> Self {
        ids.sort();
        ids.dedup();
        Self(ids)
    }

    /// The empty key. Collaborators interpret it as "resolve at the current
    /// head".
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> &[Cid] {
        &self.0
    }
}

impl fmt::Display for TipSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "}}")
    }
}

/// An ordered set of sibling block headers at a common height, sharing a
/// parent set. The canonical unit of chain progress.
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub struct TipSet {
    key: TipSetKey,
    blocks: Vec<BlockHeader>,
    height: ChainEpoch,
    parents: TipSetKey,
}

impl TipSet {
    pub fn new(mut blocks: Vec<BlockHeader>) -> ChainResult<Self> {
        let first = blocks
            .first()
            .ok_or_else(|| ChainError::InvalidTipSet("tipset must contain a block".into()))?;
        let height = first.height;
        let parents = first.parents.clone();
        for block in &blocks {
            if block.height != height {
                return Err(ChainError::InvalidTipSet(format!(
                    "mismatched block heights {} and {height}",
                    block.height
                )));
            }
            if block.parents != parents {
                return Err(ChainError::InvalidTipSet(
                    "blocks reference different parent sets".into(),
                ));
            }
        }
        blocks.sort_by_key(|block| block.id());
        blocks.dedup_by_key(|block| block.id());
        let key = TipSetKey::new(blocks.iter().map(|block| block.id()).collect());
        Ok(Self {
            key,
            blocks,
            height,
            parents,
        })
    }

    pub fn key(&self) -> &TipSetKey {
        &self.key
    }

    pub fn height(&self) -> ChainEpoch {
        self.height
    }

    pub fn parents(&self) -> &TipSetKey {
        &self.parents
    }

    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }
}

impl PartialEq for TipSet {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

/// Head change notification batch. Reverts precede applies and walk back
/// from the old head (newest first); applies are ordered oldest to newest.
#[derive(Clone, Debug, Default)]
pub struct HeadChange {
    pub revert: Vec<Arc<TipSet>>,
    pub apply: Vec<Arc<TipSet>>,
}
