//! Error taxonomy shared by every crate in this workspace
//!
//! Styled after `fe2o3-amqp-management::error::{AttachError, Error}`: a flat
//! `thiserror`-derived enum, `#[error(transparent)]` for wrapped causes, plain `#[error("...")]`
//! messages carrying condition/description pairs for the cases that don't wrap anything.
//!
//! Every pending operation (a queued send, a put-token request, a twin request) needs to
//! be able to both report its own terminal error *and* let the failure be reused as the
//! "attach_error" cause for every other request sitting in the same queue. That means this
//! type has to be [`Clone`], so causes are captured as rendered strings rather
//! than boxed `dyn Error` trait objects.

use std::fmt;

/// The kinds of errors this protocol core can report.
///
/// These are *kinds*, not wire condition strings: callers that need the AMQP condition
/// (e.g. `amqp:internal-error` for a synthesized link-detached cause) read it off the
/// variant that carries one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TwinError {
    /// Caller passed a value of the wrong shape (non-string where string required,
    /// non-scalar property value). Raised synchronously at the API boundary; never
    /// reaches a state machine.
    #[error("argument error: {0}")]
    Argument(String),

    /// A required argument was falsy/empty.
    #[error("reference error: {0}")]
    Reference(String),

    /// The AMQP client lacked a connection when attach was attempted.
    #[error("not connected")]
    NotConnected,

    /// CBS returned a non-200 status.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A CBS put-token deadline expired before a response arrived.
    #[error("timeout waiting for response")]
    Timeout,

    /// The peer detached while a send was pending, or a link was used after detach.
    #[error("link detached: {condition}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    LinkDetached {
        /// AMQP error condition, synthesized as `amqp:internal-error` when no cause is
        /// available from the underlying client.
        condition: String,
        /// Optional human-readable description.
        description: Option<String>,
    },

    /// Any other AMQP-level error, with the original cause's rendering attached.
    #[error("transport error: {message}{}", cause.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
    Transport {
        /// Human-readable summary, e.g. `"Unable to send Twin message"`.
        message: String,
        /// The underlying cause's `Display` rendering, if the `AmqpClient` surfaced one.
        cause: Option<String>,
    },
}

impl TwinError {
    /// The synthetic condition used when a link detaches with no explicit cause.
    pub const INTERNAL_ERROR_CONDITION: &'static str = "amqp:internal-error";

    /// Builds a [`TwinError::LinkDetached`] with the synthetic `amqp:internal-error`
    /// condition and no description — the fallback used when the underlying `AmqpClient`
    /// detaches a link without reporting a cause.
    pub fn link_detached_no_cause() -> Self {
        TwinError::LinkDetached {
            condition: Self::INTERNAL_ERROR_CONDITION.to_string(),
            description: None,
        }
    }

    /// Wraps an arbitrary error as a [`TwinError::Transport`], attaching `context` as the
    /// human-readable summary (e.g. `"Unable to send Twin message"`).
    pub fn transport(context: impl fmt::Display, cause: impl std::error::Error) -> Self {
        TwinError::Transport {
            message: context.to_string(),
            cause: Some(cause.to_string()),
        }
    }

    /// Wraps a context message with no underlying cause.
    pub fn transport_message(context: impl fmt::Display) -> Self {
        TwinError::Transport {
            message: context.to_string(),
            cause: None,
        }
    }
}
