//! Error types for the reactive runtime.
//!
//! User callbacks (computed derivations, effect bodies, cleanups) report
//! failure by panicking; those panics unwind straight to whoever triggered
//! the run and are never wrapped here. The variants below cover the
//! runtime's own fatal conditions and configuration loading.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors produced by the reactive runtime itself.
#[derive(Debug, Error)]
pub enum Error {
    /// A computed value was read while it was already being computed.
    #[error("cycle detected: computed {node:?} read itself while computing")]
    Cycle {
        /// The computed that re-entered itself.
        node: NodeId,
    },

    /// Effects kept re-queueing each other past the configured bound.
    #[error("flush did not settle after {rounds} rounds; an effect is likely writing a signal it reads")]
    FlushLimitExceeded {
        /// Number of rounds executed before giving up.
        rounds: usize,
    },

    /// Nested computed evaluation went deeper than the configured bound.
    #[error("computed evaluation exceeded the maximum depth of {limit}")]
    DepthExceeded {
        /// The configured depth limit.
        limit: usize,
    },

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
