//! Error taxonomy for venue calls and hedged execution.

use thiserror::Error;

/// Errors surfaced by venue implementations.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// Network timeout, 5xx, or rate limit. Safe to retry reads.
    #[error("transient venue error: {0}")]
    Transient(String),

    /// Malformed response or unexpected status from the venue.
    #[error("venue protocol error: {0}")]
    Protocol(String),

    /// The venue client has lost its connection.
    #[error("venue not connected: {0}")]
    NotConnected(String),
}

impl VenueError {
    /// Returns true if a read-only call may be retried after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Protocol(_))
    }
}

/// Errors from the hedged execution / close protocol.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The market no longer matches the recorded opportunity.
    #[error("opportunity invalidated: {0}")]
    Invalidated(String),

    /// Book depth cannot cover the required size, even after shrinking.
    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    /// Pre-trade balance check failed.
    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    /// One leg filled, the other failed, and the reversing order also
    /// failed. Requires manual unwinding.
    #[error("hedge imbalance on {pair}: filled leg {filled_leg}, {detail}")]
    HedgeImbalance {
        pair: String,
        filled_leg: String,
        detail: String,
    },

    /// Underlying venue failure.
    #[error(transparent)]
    Venue(#[from] VenueError),
}
