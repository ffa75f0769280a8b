//! Core services of the Tidemark node: the chain-head event engine and the
//! message pool front-end.
//!
//! The `events` module houses the reorg-aware dispatcher that lets
//! subscribers react to on-chain state changes and actor method calls with
//! configurable confirmation depth, timeouts, and reversion. The `mpool`
//! module is the account-serialized submission path that assigns nonces,
//! signs, and pushes messages into the backing pool, with batch and
//! multi-quality selection fan-out into block building.
//!
//! Both cores are libraries, not processes. They consume the chain service,
//! wallet, backing pool, and gas estimator through the traits in
//! `interfaces`; the host process wraps them in its RPC surface. Applications
//! typically build a [`events::ChainEvents`] from [`config::EventsConfig`]
//! and feed it head-change notifications, and a [`mpool::MpoolService`] over
//! the same chain handle to serve submissions.

pub mod config;
pub mod errors;
pub mod events;
pub mod interfaces;
pub mod mpool;
pub mod types;
