//! Claims-Based-Security put-token agent.
//!
//! [`CbsAgentHandle`] composes an `amqp-twin-link` sender and receiver bound to the `$cbs`
//! node and implements put-token request/response correlation with a shared 120s deadline
//! swept every 10s, the way `fe2o3-amqp-cbs` composes a management client pair for the
//! same purpose.

#![deny(missing_docs, missing_debug_implementations)]

mod agent;
pub mod constants;

pub use agent::CbsAgentHandle;
