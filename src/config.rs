use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::Address;

/// Tuning for the chain-head event engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Maximum reorganization depth the engine retains state for. Queued
    /// events and cached tipsets older than this are discarded.
    #[serde(default = "default_gc_confidence")]
    pub gc_confidence: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            gc_confidence: default_gc_confidence(),
        }
    }
}

fn default_gc_confidence() -> u64 {
    64
}

/// Runtime configuration of the backing message pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub priority_addrs: Vec<Address>,
    #[serde(default = "default_size_limit_high")]
    pub size_limit_high: usize,
    #[serde(default = "default_size_limit_low")]
    pub size_limit_low: usize,
    #[serde(default = "default_replace_by_fee_ratio")]
    pub replace_by_fee_ratio: f64,
    #[serde(default = "default_gas_limit_overestimation")]
    pub gas_limit_overestimation: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            priority_addrs: Vec::new(),
            size_limit_high: default_size_limit_high(),
            size_limit_low: default_size_limit_low(),
            replace_by_fee_ratio: default_replace_by_fee_ratio(),
            gas_limit_overestimation: default_gas_limit_overestimation(),
        }
    }
}

fn default_size_limit_high() -> usize {
    30_000
}

fn default_size_limit_low() -> usize {
    20_000
}

fn default_replace_by_fee_ratio() -> f64 {
    1.25
}

fn default_gas_limit_overestimation() -> f64 {
    1.25
}

impl EventsConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        read_toml(path)
    }
}

impl PoolConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        read_toml(path)
    }
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> ChainResult<T> {
    let raw = fs::read_to_string(path)
        .map_err(|err| ChainError::Config(format!("reading {}: {err}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|err| ChainError::Config(format!("decoding {}: {err}", path.display())))
}
