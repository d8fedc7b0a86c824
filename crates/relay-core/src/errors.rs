//! Boundary error types.

use thiserror::Error;

/// Errors raised while decoding or encoding wire events.
///
/// Raised at the connection boundary, before an event reaches the dispatch
/// loop. A protocol error is logged and the offending frame dropped; it never
/// tears down the connection or the dispatcher.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not a valid event payload.
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}
