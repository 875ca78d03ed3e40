//! Device-twin request/response and desired-property notification protocol, built on top
//! of a correlated `amqp-twin-link` sender/receiver pair.
//!
//! [`TwinClientHandle`] owns both links and multiplexes a single node address
//! (`/devices/<id>/twin/`) into two independent subscriptions (`response`, `post`), the way
//! `fe2o3-amqp-management::MgmtClient` multiplexes one request/response node into many
//! concurrent `call()`s — generalized here with the PUT/DELETE notification churn a twin
//! connection needs on top of plain request/response.

#![deny(missing_docs, missing_debug_implementations)]

mod client;
pub mod config;
mod request;

pub use client::{TwinClientEvent, TwinClientHandle, TwinEventSubscription};
pub use config::TwinClientConfig;
pub use request::{encode_notification_subscription_request, encode_twin_request};
