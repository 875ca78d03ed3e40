//! The consumed AMQP client boundary
//!
//! This is the external interface this crate consumes: the AMQP 1.0 framing/connection
//! implementation is assumed to exist on the other side of these
//! traits. `SenderLink` and `ReceiverLink` depend only on [`AmqpClient`],
//! [`AmqpSenderLink`], and [`AmqpReceiverLink`] — never on a concrete transport — which is
//! what makes the state machines in this crate unit-testable with a hand-written stub (see
//! `sender::tests`/`receiver::tests`) instead of a live broker, the way `fe2o3-amqp` itself
//! can only be tested against `testcontainers`.

use amqp_twin_types::{AmqpMessage, DeliveryTag, LinkAddress, LinkOptions, TwinError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome of a settled send, mirroring the `MessageEnqueued` disposition name used
/// throughout the source protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was handed to the underlying link and accepted by its disposition.
    MessageEnqueued,
}

/// Outcome of a receiver-side disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionOutcome {
    /// The message was accepted.
    MessageCompleted,
    /// The message was rejected.
    MessageRejected,
    /// The message was abandoned (released back to the broker for redelivery).
    MessageAbandoned,
}

/// Asynchronous events a live sender link can raise after attach.
#[derive(Debug, Clone)]
pub enum SenderLinkEvent {
    /// The peer detached the link. Carries the detach error, if any was reported.
    Detached(Option<TwinError>),
    /// An asynchronous link-level error was received.
    ErrorReceived(TwinError),
}

/// Asynchronous events a live receiver link can raise after attach.
#[derive(Debug, Clone)]
pub enum ReceiverLinkEvent {
    /// An inbound message arrived.
    Message(AmqpMessage),
    /// The peer detached the link. Carries the detach error, if any was reported.
    Detached(Option<TwinError>),
    /// An asynchronous link-level error was received.
    ErrorReceived(TwinError),
}

/// A live, attached outbound link.
///
/// Implementations wrap whatever the underlying transport's sender link object is (e.g. a
/// `fe2o3_amqp::Sender`); `SenderLink` only ever calls `send`/`force_detach` on it and
/// drains `SenderLinkEvent`s from the channel that `AmqpClient::create_sender` returned
/// alongside it.
#[async_trait]
pub trait AmqpSenderLink: Send + Sync + std::fmt::Debug {
    /// Sends one message and waits for its disposition.
    async fn send(&self, message: AmqpMessage) -> Result<(), TwinError>;

    /// Forcibly tears the link down without negotiating a graceful detach.
    async fn force_detach(&self);
}

/// A live, attached inbound link.
#[async_trait]
pub trait AmqpReceiverLink: Send + Sync + std::fmt::Debug {
    /// Accepts (settles) the message with the given delivery tag.
    async fn accept(&self, tag: &DeliveryTag) -> Result<(), TwinError>;

    /// Rejects the message with the given delivery tag.
    async fn reject(&self, tag: &DeliveryTag, description: Option<String>)
        -> Result<(), TwinError>;

    /// Abandons (releases) the message with the given delivery tag.
    async fn abandon(&self, tag: &DeliveryTag) -> Result<(), TwinError>;

    /// Forcibly tears the link down without negotiating a graceful detach.
    async fn force_detach(&self);
}

/// The AMQP client/session this core multiplexes links over.
///
/// `create_sender`/`create_receiver` are the only operations `SenderLink`/`ReceiverLink`
/// ever call; both are expected to resolve once the attach has either succeeded or failed
/// for good (they are not required to race a separate connection-error stream — a
/// connection-level failure during attach should simply surface as the `Err` these
/// methods return, wrapped as [`TwinError::Transport`] with the connection error as the
/// cause).
#[async_trait]
pub trait AmqpClient: Send + Sync + std::fmt::Debug {
    /// Attaches a new sender link at `address` with the given attach properties.
    async fn create_sender(
        &self,
        address: &LinkAddress,
        options: &LinkOptions,
    ) -> Result<(Arc<dyn AmqpSenderLink>, mpsc::Receiver<SenderLinkEvent>), TwinError>;

    /// Attaches a new receiver link at `address` with the given attach properties.
    async fn create_receiver(
        &self,
        address: &LinkAddress,
        options: &LinkOptions,
    ) -> Result<(Arc<dyn AmqpReceiverLink>, mpsc::Receiver<ReceiverLinkEvent>), TwinError>;
}
