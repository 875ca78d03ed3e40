#![deny(missing_docs, missing_debug_implementations)]

//! Shared data model for the AMQP link-management and device-twin protocol core.
//!
//! This crate holds the pieces that `amqp-twin-link`, `amqp-twin-cbs`, and
//! `amqp-twin-protocol` all need: the wire-ish [`message::AmqpMessage`] type, link
//! addressing and attach options, the [`error::TwinError`] taxonomy, a correlation-id
//! generator, and a [`clock::Clock`] abstraction used to make timeout logic testable
//! with virtual time.

pub mod address;
pub mod clock;
pub mod error;
pub mod message;
pub mod options;
pub mod value;

pub use address::LinkAddress;
pub use error::TwinError;
pub use message::{AmqpBody, AmqpMessage, DeliveryTag, MessageProperties};
pub use options::{LinkOptions, ReceiverSettleMode, SenderSettleMode};
pub use value::AmqpValue;

use uuid::Uuid;

/// Generates a new correlation id (AMQP `messageId`/`correlationId`).
///
/// Every caller-visible correlation id in this crate family is a UUID v4, generated the
/// same way `fe2o3-amqp`'s transaction IDs are (`Uuid::new_v4()`).
pub fn new_correlation_id() -> Uuid {
    Uuid::new_v4()
}
