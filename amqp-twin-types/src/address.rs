//! Node addressing

use std::fmt;

/// Opaque identifier for an AMQP node, e.g. `/devices/<id>/twin/` or `$cbs`.
///
/// This is a thin newtype, not a parsed URL: the core never interprets the address beyond
/// passing it to the consumed [`crate::AmqpMessage`]-producing `AmqpClient`, trimming a
/// trailing `/` for annotation purposes (see `amqp-twin-protocol`), or comparing it for
/// equality in tests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkAddress(String);

impl LinkAddress {
    /// Creates a new link address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the address with any single trailing `/` removed.
    ///
    /// Used when deriving the `resource` message annotation from an attach address that
    /// itself carries a significant trailing slash (twin attach is `/devices/<id>/twin/`,
    /// but the per-request `resource` annotation must not carry it).
    pub fn trim_trailing_slash(&self) -> &str {
        self.0.strip_suffix('/').unwrap_or(&self.0)
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LinkAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LinkAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_single_trailing_slash() {
        let addr = LinkAddress::new("/devices/dev1/twin/");
        assert_eq!(addr.trim_trailing_slash(), "/devices/dev1/twin");
    }

    #[test]
    fn trim_is_noop_without_trailing_slash() {
        let addr = LinkAddress::new("$cbs");
        assert_eq!(addr.trim_trailing_slash(), "$cbs");
    }

    #[test]
    fn root_slash_trims_to_empty() {
        let addr = LinkAddress::new("/");
        assert_eq!(addr.trim_trailing_slash(), "");
    }
}
