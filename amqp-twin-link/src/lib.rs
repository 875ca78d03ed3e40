//! Sender and receiver link actors multiplexing a single AMQP connection into
//! independently-lifecycled links.
//!
//! `SenderLink`/`ReceiverLink` never touch the wire themselves; they drive the four-state
//! attach/detach lifecycle (queueing sends while detached, lazily attaching receivers on
//! first subscription) on top of whatever implements [`client::AmqpClient`].

#![deny(missing_debug_implementations)]

mod client;
mod receiver;
mod sender;

pub use client::{
    AmqpClient, AmqpReceiverLink, AmqpSenderLink, DispositionOutcome, ReceiverLinkEvent,
    SendOutcome, SenderLinkEvent,
};
pub use receiver::{ReceiverLinkHandle, ReceiverSubscription};
pub use sender::SenderLinkHandle;
