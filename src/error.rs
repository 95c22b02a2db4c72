//! Error kinds exposed by the selection core: a single `thiserror`-derived
//! enum per concern.

use thiserror::Error;

/// Fatal at pool-construction time; surfaced to the configuration loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no servers in upstream {upstream:?}")]
    EmptyPrimary { upstream: String },

    #[error("no port in upstream {upstream:?}")]
    MissingPort { upstream: String },

    #[error("server {server:?} in upstream {upstream:?} has zero weight")]
    ZeroWeight { upstream: String, server: String },
}

/// Raised by request-scoped construction (the tried-set, the TLS session
/// slab) when the bounded resources behind them are exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("tried-set bitmap requires {needed} words but only {available} are available")]
    TriedSetExhausted { needed: usize, available: usize },

    #[error("TLS session slab exhausted: requested {requested} bytes, {capacity} available")]
    SlabExhausted { requested: usize, capacity: usize },
}

/// Top-level error type for the selector's request-scoped operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Alloc(#[from] AllocError),
}
