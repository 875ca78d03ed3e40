//! Well-known CBS node addressing and timing constants.

use std::time::Duration;

/// Address of the CBS node, as defined by the CBS working draft.
pub const CBS_NODE_ADDR: &str = "$cbs";

/// `put-token` operation name.
pub const PUT_TOKEN: &str = "put-token";

/// Manageable entity type for a SAS token, as sent in `applicationProperties.type`.
pub const SAS_TOKEN_TYPE: &str = "servicebus.windows.net:sastoken";

/// `reply_to` node the agent listens on for put-token responses.
pub const CBS_REPLY_TO: &str = "cbs";

/// Deadline granted to a single put-token request before it is swept as timed out.
pub const PUT_TOKEN_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval at which the pending put-token list is swept for expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
